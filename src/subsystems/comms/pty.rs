//! PTY (console) channel: reads operator lines from stdin, prints the
//! routed-message transcript to stdout.
//!
//! Line grammar:
//!
//! ```text
//! exit            stop the swarm (keyword is configurable, any case)
//! @Name text      send `text` from the operator to agent `Name`
//! anything else   send from the operator to System for redirection
//! ```
//!
//! Runs until the `shutdown` token is cancelled, the exit keyword is typed,
//! or stdin is closed.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConsoleLink;
use crate::error::{AppError, ValidationError};
use crate::message::Message;
use crate::subsystems::runtime::{Component, ComponentFuture};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Exit,
    Send(Message),
}

/// Parse a non-empty console line.  `None` for blank lines.
pub fn parse_line(
    line: &str,
    operator: &str,
    exit_command: &str,
) -> Option<Result<ConsoleInput, ValidationError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.eq_ignore_ascii_case(exit_command) {
        return Some(Ok(ConsoleInput::Exit));
    }

    let message = match line.strip_prefix('@') {
        Some(rest) => {
            let (to, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Message::new(operator, Some(to), text.trim())
        }
        None => Message::new(operator, None, line),
    };
    Some(message.map(ConsoleInput::Send))
}

// ── PtyChannel ───────────────────────────────────────────────────────────────

pub struct PtyChannel {
    channel_id: String,
    operator: String,
    exit_command: String,
    link: ConsoleLink,
}

impl PtyChannel {
    pub fn new(
        channel_id: impl Into<String>,
        operator: impl Into<String>,
        exit_command: impl Into<String>,
        link: ConsoleLink,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            operator: operator.into(),
            exit_command: exit_command.into(),
            link,
        }
    }
}

impl Component for PtyChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_pty(*self, shutdown))
    }
}

// ── run_pty ──────────────────────────────────────────────────────────────────

async fn run_pty(channel: PtyChannel, shutdown: CancellationToken) -> Result<(), AppError> {
    let PtyChannel { channel_id, operator, exit_command, link } = channel;
    let ConsoleLink { operator_tx, mut transcript_rx } = link;

    info!(%channel_id, "pty channel started");
    println!("─────────────────────────────────");
    println!(" Swarm console  ('{exit_command}' or Ctrl-C to quit)");
    println!(" @Name text  talks to one agent");
    println!("─────────────────────────────────");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("pty channel shutting down");
                break;
            }

            line = transcript_rx.recv() => {
                match line {
                    Some(line) => {
                        println!("{line}");
                        let _ = std::io::stdout().flush();
                    }
                    None => {
                        info!("router closed the transcript");
                        break;
                    }
                }
            }

            line = lines.next_line() => {
                let input = match line {
                    Err(e) => {
                        warn!("pty read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("pty stdin closed");
                        break;
                    }
                    Ok(Some(input)) => input,
                };

                match parse_line(&input, &operator, &exit_command) {
                    None => {}
                    Some(Ok(ConsoleInput::Exit)) => {
                        info!("exit requested from console");
                        shutdown.cancel();
                        break;
                    }
                    Some(Ok(ConsoleInput::Send(message))) => {
                        debug!(to = %message.to(), "pty received line");
                        if operator_tx.send(message).await.is_err() {
                            warn!("router is gone, pty exiting");
                            break;
                        }
                    }
                    Some(Err(e)) => println!("[console] {e}"),
                }
            }
        }
    }

    Ok(())
}
