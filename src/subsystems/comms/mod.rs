//! Comms subsystem: the operator's side of the swarm.
//!
//! The console and the router meet over two bounded [`mpsc`] channels:
//!
//! ```text
//! console ──Message──▶ router      (operator input)
//! console ◀──String─── router      (transcript lines)
//! ```
//!
//! [`operator_link`] builds both halves; each side captures its half at
//! construction and runs as a [`runtime::Component`](crate::subsystems::runtime::Component).

pub mod pty;

use tokio::sync::mpsc;

use crate::message::Message;

/// Channel capacity used by [`operator_link`] when none is given.
pub const DEFAULT_CAPACITY: usize = 64;

/// Console half: sends operator messages, receives transcript lines.
#[derive(Debug)]
pub struct ConsoleLink {
    pub operator_tx: mpsc::Sender<Message>,
    pub transcript_rx: mpsc::Receiver<String>,
}

/// Router half: receives operator messages, sends transcript lines.
#[derive(Debug)]
pub struct RouterLink {
    pub operator_rx: mpsc::Receiver<Message>,
    pub transcript_tx: mpsc::Sender<String>,
}

pub fn operator_link(capacity: usize) -> (ConsoleLink, RouterLink) {
    let (operator_tx, operator_rx) = mpsc::channel(capacity);
    let (transcript_tx, transcript_rx) = mpsc::channel(capacity);
    (
        ConsoleLink { operator_tx, transcript_rx },
        RouterLink { operator_rx, transcript_tx },
    )
}
