//! [`Message`]: the unit of conversation moved between agents, the operator
//! and the router.
//!
//! A message is validated once, at construction: identities and text are
//! never empty.  The token count is optional until the message reaches a
//! queue that feeds the prompt budgeter; [`Message::tokens`] returns `None`
//! until it has been measured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Sender/recipient identity used by the router and by sign-on prompts.
pub const SYSTEM: &str = "System";

/// Sender identity of recalled-memory digests.
pub const MEMORY: &str = "Memory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    from: String,
    to: String,
    text: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tokens: Option<usize>,
}

/// Wire shape of [`Message`]; deserialization goes through [`Message::at`].
#[derive(Deserialize)]
struct RawMessage {
    from: String,
    to: String,
    text: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    tokens: Option<usize>,
}

impl TryFrom<RawMessage> for Message {
    type Error = ValidationError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let message = Message::at(raw.from, Some(&raw.to), raw.text, raw.timestamp)?;
        Ok(match raw.tokens {
            Some(tokens) => message.with_tokens(tokens),
            None => message,
        })
    }
}

impl Message {
    /// Build a message stamped with the current time.
    ///
    /// `to = None` addresses the message to [`SYSTEM`].
    pub fn new(
        from: impl Into<String>,
        to: Option<&str>,
        text: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        Self::at(from, to, text, Utc::now())
    }

    /// Build a message with an explicit timestamp.
    pub fn at(
        from: impl Into<String>,
        to: Option<&str>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let from = from.into();
        let to = to.unwrap_or(SYSTEM).to_string();
        let text = text.into();

        if from.trim().is_empty() {
            return Err(ValidationError::empty("from"));
        }
        if to.trim().is_empty() {
            return Err(ValidationError::empty("to"));
        }
        if text.trim().is_empty() {
            return Err(ValidationError::empty("text"));
        }

        Ok(Self { from, to, text, timestamp, tokens: None })
    }

    /// Attach a measured token count.
    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Copy of this message addressed to `to`; every other field is kept.
    pub fn readdressed(&self, to: &str) -> Result<Self, ValidationError> {
        if to.trim().is_empty() {
            return Err(ValidationError::empty("to"));
        }
        let mut copy = self.clone();
        copy.to = to.to_string();
        Ok(copy)
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tokens(&self) -> Option<usize> {
        self.tokens
    }

    /// Token count, or [`ValidationError::Unmeasured`] when it was never set.
    pub fn measured_tokens(&self) -> Result<usize, ValidationError> {
        self.tokens.ok_or_else(|| ValidationError::Unmeasured { from: self.from.clone() })
    }

    pub fn is_to_system(&self) -> bool {
        self.to == SYSTEM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_recipient_means_system() {
        let m = Message::new("Alice", None, "hello").unwrap();
        assert_eq!(m.to(), SYSTEM);
        assert!(m.is_to_system());
        assert_eq!(m.tokens(), None);
    }

    #[test]
    fn empty_fields_are_rejected() {
        assert_eq!(
            Message::new("", Some("Bob"), "hi").unwrap_err(),
            ValidationError::empty("from")
        );
        assert_eq!(
            Message::new("Alice", Some(""), "hi").unwrap_err(),
            ValidationError::empty("to")
        );
        assert_eq!(
            Message::new("Alice", Some("Bob"), "   ").unwrap_err(),
            ValidationError::empty("text")
        );
    }

    #[test]
    fn readdressed_changes_only_recipient() {
        let m = Message::new("Alice", None, "ping Bob").unwrap().with_tokens(2);
        let r = m.readdressed("Bob").unwrap();
        assert_eq!(r.to(), "Bob");
        assert_eq!(r.from(), m.from());
        assert_eq!(r.text(), m.text());
        assert_eq!(r.timestamp(), m.timestamp());
        assert_eq!(r.tokens(), Some(2));
    }

    #[test]
    fn unmeasured_tokens_error() {
        let m = Message::new("Alice", Some("Bob"), "hi").unwrap();
        assert!(matches!(m.measured_tokens(), Err(ValidationError::Unmeasured { .. })));
        assert_eq!(m.with_tokens(0).measured_tokens().unwrap(), 0);
    }

    #[test]
    fn serde_skips_absent_tokens() {
        let m = Message::new("Alice", Some("Bob"), "hi").unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert!(!json.contains("tokens"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn deserializing_rejects_empty_fields() {
        let json = r#"{"from":"","to":"Bob","text":"","timestamp":"2023-11-14T22:13:20Z"}"#;
        let err = serde_json::from_str::<Message>(json).unwrap_err();
        assert!(err.to_string().contains("from"), "{err}");

        let json = r#"{"from":"Alice","to":" ","text":"hi","timestamp":"2023-11-14T22:13:20Z"}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn deserializing_keeps_token_count() {
        let json = r#"{"from":"Alice","to":"Bob","text":"hi","timestamp":"2023-11-14T22:13:20Z","tokens":3}"#;
        let m: Message = serde_json::from_str(json).unwrap();
        assert_eq!((m.from(), m.to(), m.tokens()), ("Alice", "Bob", Some(3)));
    }
}
