//! Re-addressing of messages sent to `System`.

use tracing::{debug, warn};

use crate::message::{Message, SYSTEM};
use crate::subsystems::entities::EntityExtractor;

/// Bounce notice sent back when no recipient can be found.
pub const BOUNCE_NOTICE: &str =
    "Could not determine the recipient of your message. Address another agent by name.";

/// Turn one `System`-addressed message into deliverable messages.
///
/// Every entity naming a roster agent other than the sender gets a copy of
/// the message, in first-mention order.  With no match the sender receives
/// a bounce from `System` quoting the original text.
pub fn redirect_system_message<S: AsRef<str>>(
    message: &Message,
    roster: &[S],
    extractor: &dyn EntityExtractor,
) -> Vec<Message> {
    if message.from() == SYSTEM {
        warn!(text = %message.text(), "dropping System message addressed to System");
        return Vec::new();
    }

    let mut targets: Vec<&str> = Vec::new();
    for entity in extractor.extract(message.text()) {
        let Some(name) = roster
            .iter()
            .map(AsRef::as_ref)
            .find(|n| same_name(n, &entity))
        else {
            continue;
        };
        if same_name(name, message.from()) || targets.contains(&name) {
            continue;
        }
        targets.push(name);
    }

    let copies: Vec<Message> = targets
        .iter()
        .filter_map(|to| message.readdressed(to).ok())
        .collect();
    if !copies.is_empty() {
        debug!(from = %message.from(), targets = ?targets, "redirected System message");
        return copies;
    }

    debug!(from = %message.from(), "no recipient found, bouncing");
    let text = format!("{BOUNCE_NOTICE}\n\n{}", message.text());
    match Message::new(SYSTEM, Some(message.from()), text) {
        Ok(bounce) => vec![bounce],
        Err(e) => {
            warn!(error = %e, "cannot build bounce message");
            Vec::new()
        }
    }
}

/// Unicode-aware case-insensitive name comparison.
fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}
