//! Supervisor: the swarm's router loop.
//!
//! The [`Router`] owns the roster.  Each iteration it collects operator
//! input and agent output, routes it, then lets every agent interpret what
//! it received:
//!
//! 1. drain operator input;
//! 2. `deliver()` every agent; `System`-addressed messages are either a
//!    command call or go through [`redirect::redirect_system_message`];
//! 3. drain the FIFO delivery queue into agents (or the operator console);
//! 4. `interpret()` every agent, isolating failures.
//!
//! The loop stops between iterations once `shutdown` is cancelled; an
//! in-flight backend call is never interrupted.

pub mod redirect;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{BudgetRecovery, SwarmConfig};
use crate::error::AppError;
use crate::message::{Message, SYSTEM};
use crate::subsystems::agents::{Agent, AgentError, ConversationError};
use crate::subsystems::commands::{CommandContext, CommandRegistry};
use crate::subsystems::comms::RouterLink;
use crate::subsystems::entities::EntityExtractor;
use crate::subsystems::runtime::{Component, ComponentFuture};
use redirect::redirect_system_message;

pub struct Router {
    agents: BTreeMap<String, Agent>,
    delivery: VecDeque<Message>,
    operator_rx: mpsc::Receiver<Message>,
    operator_open: bool,
    transcript_tx: mpsc::Sender<String>,
    commands: CommandRegistry,
    extractor: Box<dyn EntityExtractor>,
    operator: String,
    recovery: BudgetRecovery,
    idle: Duration,
}

impl Router {
    pub fn new(
        agents: Vec<Agent>,
        commands: CommandRegistry,
        extractor: Box<dyn EntityExtractor>,
        link: RouterLink,
        swarm: &SwarmConfig,
    ) -> Self {
        let agents = agents.into_iter().map(|a| (a.name().to_string(), a)).collect();
        Self {
            agents,
            delivery: VecDeque::new(),
            operator_rx: link.operator_rx,
            operator_open: true,
            transcript_tx: link.transcript_tx,
            commands,
            extractor,
            operator: swarm.operator.clone(),
            recovery: swarm.budget_recovery,
            idle: Duration::from_millis(swarm.idle_ms),
        }
    }

    /// Sign every agent on with the shared `template`.
    pub async fn sign_on_all(&mut self, template: &str, project: &str) -> Result<(), AgentError> {
        for agent in self.agents.values_mut() {
            agent.sign_on(template, project, &self.commands).await?;
        }
        info!(agents = self.agents.len(), "roster signed on");
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    pub fn roster(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// Messages waiting in the delivery queue.
    pub fn pending(&self) -> usize {
        self.delivery.len()
    }

    /// One full routing pass.  Returns how many messages moved.
    pub async fn run_iteration(&mut self) -> usize {
        let mut moved = 0;

        // 1. operator input
        loop {
            match self.operator_rx.try_recv() {
                Ok(m) => {
                    moved += 1;
                    self.route_outgoing(m);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.operator_open = false;
                    break;
                }
            }
        }

        // 2. agent output
        let mut outgoing = Vec::new();
        for agent in self.agents.values_mut() {
            outgoing.extend(agent.deliver().await);
        }
        moved += outgoing.len();
        for m in outgoing {
            self.route_outgoing(m);
        }

        // 3. delivery
        while let Some(m) = self.delivery.pop_front() {
            self.deliver_one(m).await;
        }

        // 4. interpretation
        for agent in self.agents.values_mut() {
            match agent.interpret().await {
                Ok(replies) => moved += replies,
                Err(e) => recover(agent, e, self.recovery),
            }
        }

        moved
    }

    /// Iterate until `shutdown` is cancelled, idling when nothing moves.
    pub async fn serve(mut self, shutdown: CancellationToken) -> Result<(), AppError> {
        info!(roster = ?self.roster(), "router started");
        while !shutdown.is_cancelled() {
            if self.run_iteration().await > 0 {
                continue;
            }

            let incoming = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                m = self.operator_rx.recv(), if self.operator_open => m,
                _ = tokio::time::sleep(self.idle) => continue,
            };
            match incoming {
                Some(m) => self.route_outgoing(m),
                None => {
                    debug!("operator channel closed");
                    self.operator_open = false;
                }
            }
        }
        info!("router shutting down");
        Ok(())
    }

    // ── routing ───────────────────────────────────────────────────────

    fn route_outgoing(&mut self, message: Message) {
        if !message.is_to_system() {
            self.delivery.push_back(message);
            return;
        }

        if let Some(reply) = self.try_command(&message) {
            self.delivery.push_back(reply);
            return;
        }

        let roster: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        let routed = redirect_system_message(&message, &roster, self.extractor.as_ref());
        self.delivery.extend(routed);
    }

    /// Run `message` as a command call, answering the sender from `System`.
    fn try_command(&self, message: &Message) -> Option<Message> {
        if message.from() == SYSTEM {
            return None;
        }
        let call = self.commands.parse_call(message.text())?;
        let ctx = CommandContext {
            agents: self.agents.values().map(|a| a.profile().summary()).collect(),
            caller: message.from().to_string(),
        };

        let result = match self.commands.dispatch(&ctx, &call) {
            Ok(out) => out,
            Err(e) => {
                warn!(caller = %message.from(), command = %call.name, error = %e, "command failed");
                format!("error: {e}")
            }
        };
        debug!(caller = %message.from(), command = %call.name, "command dispatched");

        Message::new(SYSTEM, Some(message.from()), format!("{} -> {result}", call.name)).ok()
    }

    async fn deliver_one(&mut self, message: Message) {
        let line = format!("{} -> {}: {}", message.from(), message.to(), message.text());

        if message.to() == self.operator {
            self.transcript(line);
            return;
        }
        let Some(agent) = self.agents.get_mut(message.to()) else {
            warn!(from = %message.from(), to = %message.to(), "unknown recipient, dropping message");
            return;
        };

        match agent.receive(message).await {
            Ok(()) => self.transcript(line),
            Err(e) => warn!(agent = %agent.name(), error = %e, "message rejected"),
        }
    }

    /// Never waits: a console that is not reading must not stall routing.
    fn transcript(&self, line: String) {
        match self.transcript_tx.try_send(line) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(line)) => {
                warn!(%line, "console backlog full, transcript line dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("console closed, transcript line dropped");
            }
        }
    }
}

/// Apply the recovery policy for a failed conversation.
fn recover(agent: &mut Agent, e: ConversationError, policy: BudgetRecovery) {
    error!(agent = %e.agent, sender = %e.sender, error = %e.source, "interpretation failed");
    match e.source {
        AgentError::Budget(_) => match policy {
            BudgetRecovery::DropOldest => {
                agent.drop_oldest_inbound(&e.sender);
            }
            BudgetRecovery::Abort => {
                let dropped = agent.discard_inbound(&e.sender);
                warn!(agent = %e.agent, sender = %e.sender, dropped, "conversation aborted");
            }
        },
        AgentError::Validation(_) => {
            agent.drop_oldest_inbound(&e.sender);
        }
        AgentError::Provider(_) | AgentError::NotSignedOn(_) => {}
    }
}

impl Component for Router {
    fn id(&self) -> &str {
        "router"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(Router::serve(*self, shutdown))
    }
}
