//! Agents subsystem: one [`Agent`] per persona in the roster.
//!
//! An agent cycles through sign-on (once), then receive → interpret →
//! deliver for as long as the swarm runs.  Inbound and outbound messages
//! live in separate [`ConversationQueues`] keyed by correspondent:
//!
//! * `inbound[x]` holds messages from `x` to this agent;
//! * `outbound[x]` holds this agent's replies to `x`.
//!
//! The system prompt is created at sign-on and placed first in every
//! prompt sent to the backend.

pub mod budget;
pub mod profile;
pub mod prompt;
pub mod queue;

use thiserror::Error;
use tracing::{debug, info, warn};

pub use budget::BudgetError;
pub use profile::AgentProfile;
pub use queue::ConversationQueues;

use crate::error::ValidationError;
use crate::llm::{ChatBackend, ProviderError};
use crate::message::{MEMORY, Message, SYSTEM};
use crate::subsystems::commands::CommandRegistry;
use crate::subsystems::memory::{MemoryHandle, MemoryRecord};
use prompt::PromptBuilder;

/// Suffix appended to recalled-memory digests.
pub const RECALL_NOTICE: &str = "These are messages which might provide important context.";

/// Upper bound on records fetched per recall.
const RECALL_LIMIT: usize = 20;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("budget: {0}")]
    Budget(#[from] BudgetError),

    #[error("backend: {0}")]
    Provider(#[from] ProviderError),

    #[error("agent '{0}' has not signed on")]
    NotSignedOn(String),
}

/// An [`AgentError`] plus the conversation it happened in.
#[derive(Debug, Error)]
#[error("agent '{agent}', conversation with '{sender}': {source}")]
pub struct ConversationError {
    pub agent: String,
    pub sender: String,
    pub source: AgentError,
}

// ── Agent ─────────────────────────────────────────────────────────────────────

pub struct Agent {
    profile: AgentProfile,
    backend: ChatBackend,
    memory: Option<MemoryHandle>,
    recall: bool,
    inbound: ConversationQueues,
    outbound: ConversationQueues,
    system_prompt: Option<Message>,
}

impl Agent {
    pub fn new(profile: AgentProfile, backend: ChatBackend, memory: Option<MemoryHandle>) -> Self {
        Self {
            profile,
            backend,
            memory,
            recall: false,
            inbound: ConversationQueues::new(),
            outbound: ConversationQueues::new(),
            system_prompt: None,
        }
    }

    /// Inject recalled memories after the system prompt.  Needs a memory handle.
    pub fn with_recall(mut self, recall: bool) -> Self {
        self.recall = recall;
        self
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn system_prompt(&self) -> Option<&Message> {
        self.system_prompt.as_ref()
    }

    pub fn inbound(&self) -> &ConversationQueues {
        &self.inbound
    }

    pub fn outbound(&self) -> &ConversationQueues {
        &self.outbound
    }

    /// Build the system prompt from `template` and seat it as the only
    /// entry of the `System` conversation.
    pub async fn sign_on(
        &mut self,
        template: &str,
        project: &str,
        commands: &CommandRegistry,
    ) -> Result<(), AgentError> {
        if template.trim().is_empty() {
            return Err(ValidationError::empty("sign-on template").into());
        }
        if self.system_prompt.is_some() {
            return Err(ValidationError::Invalid(format!("agent '{}' has already signed on", self.name())).into());
        }

        let p = &self.profile;
        let text = PromptBuilder::new(template)
            .with_vars([
                ("name", p.name.as_str()),
                ("supervisor", p.supervisor.as_str()),
                ("role", p.role.as_str()),
                ("guidance", p.guidance.as_str()),
                ("project", project),
            ])
            .with_commands(commands, &p.commands)
            .build()?;

        let prompt = self.measure(Message::new(SYSTEM, Some(self.name()), text)?).await?;
        info!(agent = %self.name(), tokens = ?prompt.tokens(), "signed on");

        self.system_prompt = Some(prompt.clone());
        self.inbound.push(SYSTEM, prompt);
        Ok(())
    }

    /// Accept a routed message: measure it, record it to memory, queue it.
    pub async fn receive(&mut self, message: Message) -> Result<(), AgentError> {
        self.check_addressee(&message)?;
        let message = self.measure(message).await?;
        self.remember(&message).await;
        self.add_to_inbound(message).await
    }

    /// Queue-entry boundary: the message must be addressed to this agent and
    /// is measured if it carries no token count.
    pub async fn add_to_inbound(&mut self, message: Message) -> Result<(), AgentError> {
        self.check_addressee(&message)?;
        let message = self.measure(message).await?;
        debug!(agent = %self.name(), from = %message.from(), tokens = ?message.tokens(), "queued inbound");
        let sender = message.from().to_string();
        self.inbound.push(&sender, message);
        Ok(())
    }

    /// Reply to every correspondent with queued messages, in name order.
    ///
    /// Returns the number of replies queued.  The first failure stops the
    /// pass and leaves that conversation's queue untouched; conversations
    /// already answered stay answered.
    pub async fn interpret(&mut self) -> Result<usize, ConversationError> {
        let Some(system_prompt) = self.system_prompt.clone() else {
            return Err(self.conversation_error(SYSTEM, AgentError::NotSignedOn(self.name().to_string())));
        };

        let mut replies = 0;
        for sender in self.inbound.keys() {
            let reply = self
                .reply_to(&system_prompt, &sender)
                .await
                .map_err(|e| self.conversation_error(&sender, e))?;

            self.inbound.take(&sender);
            self.outbound.push(&sender, reply);
            replies += 1;
        }
        Ok(replies)
    }

    /// Drain every outbound queue, recording each message to memory.
    pub async fn deliver(&mut self) -> Vec<Message> {
        let drained = self.outbound.drain_all();
        for m in &drained {
            self.remember(m).await;
        }
        drained
    }

    /// Drop the oldest queued message from `sender`.
    pub fn drop_oldest_inbound(&mut self, sender: &str) -> Option<Message> {
        self.inbound.pop_oldest(sender)
    }

    /// Discard the whole queue from `sender`, returning how many were dropped.
    pub fn discard_inbound(&mut self, sender: &str) -> usize {
        self.inbound.take(sender).len()
    }

    // ── internals ─────────────────────────────────────────────────────

    async fn reply_to(&self, system_prompt: &Message, sender: &str) -> Result<Message, AgentError> {
        let queue = self.inbound.get(sender);
        let conversation = match queue.first() {
            Some(first) if first == system_prompt => &queue[1..],
            _ => queue,
        };

        let mut prompt = Vec::with_capacity(conversation.len() + 2);
        prompt.push(system_prompt.clone());
        if self.recall {
            if let Some(digest) = self.recall_digest(system_prompt, conversation).await {
                prompt.push(digest);
            }
        }
        prompt.extend(conversation.iter().cloned());

        let ceiling = self.backend.context_size();
        let prompt = budget::assemble(&self.backend, self.name(), prompt, ceiling).await?;
        let text = self.backend.send(&prompt, None).await?;

        debug!(agent = %self.name(), to = %sender, prompt_len = prompt.len(), "reply ready");
        Ok(Message::new(self.name(), Some(sender), text)?)
    }

    /// Summarize memories relevant to the latest turn into one `Memory`
    /// message.  Best-effort: any failure yields `None`.
    async fn recall_digest(&self, system_prompt: &Message, conversation: &[Message]) -> Option<Message> {
        let memory = self.memory.as_ref()?;
        let query = conversation
            .iter()
            .rev()
            .take(2)
            .rev()
            .map(Message::text)
            .collect::<Vec<_>>()
            .join(" ");
        if query.trim().is_empty() {
            return None;
        }

        let records = match memory.recall(&query, RECALL_LIMIT).await {
            Ok(r) => r,
            Err(e) => {
                warn!(agent = %self.name(), error = %e, "recall failed");
                return None;
            }
        };

        let ceiling = self.backend.context_size();
        let prompt_tokens: usize = system_prompt.tokens().unwrap_or_default()
            + conversation.iter().filter_map(Message::tokens).sum::<usize>();
        let mut used = prompt_tokens;
        let mut kept = Vec::new();
        for r in records {
            if r.text == system_prompt.text() || conversation.iter().any(|m| m.text() == r.text) {
                continue;
            }
            let Ok(m) = Message::at(r.from, Some(&r.to), r.text, r.timestamp) else {
                continue;
            };
            let m = match self.measure(m).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(agent = %self.name(), error = %e, "cannot measure recalled record");
                    return None;
                }
            };
            let next = used + m.tokens().unwrap_or_default();
            if !budget::within_margin(next, ceiling) {
                break;
            }
            used = next;
            kept.push(m);
        }
        if kept.is_empty() {
            return None;
        }

        // The digest shares the margin with the prompt it is injected into.
        let budget = budget::margin_tokens(ceiling).saturating_sub(prompt_tokens);
        let summary = match budget::summarize(&self.backend, self.name(), &kept, budget).await {
            Ok(s) => s,
            Err(e) => {
                warn!(agent = %self.name(), error = %e, "recall summary failed");
                return None;
            }
        };

        let text = format!("{}\n\n{RECALL_NOTICE}", summary.text());
        let digest = Message::at(MEMORY, Some(self.name()), text, summary.timestamp()).ok()?;
        match self.measure(digest).await {
            Ok(d) => {
                debug!(agent = %self.name(), records = kept.len(), "recall digest injected");
                Some(d)
            }
            Err(e) => {
                warn!(agent = %self.name(), error = %e, "cannot measure recall digest");
                None
            }
        }
    }

    fn check_addressee(&self, message: &Message) -> Result<(), ValidationError> {
        if message.to() != self.name() {
            return Err(ValidationError::Misaddressed {
                agent: self.name().to_string(),
                to: message.to().to_string(),
            });
        }
        Ok(())
    }

    async fn measure(&self, message: Message) -> Result<Message, AgentError> {
        if message.tokens().is_some() {
            return Ok(message);
        }
        let tokens = self.backend.message_size(message.text()).await?;
        Ok(message.with_tokens(tokens))
    }

    async fn remember(&self, message: &Message) {
        let Some(memory) = &self.memory else {
            return;
        };
        if let Err(e) = memory.remember(MemoryRecord::from(message)).await {
            warn!(agent = %self.name(), error = %e, "failed to record message to memory");
        }
    }

    fn conversation_error(&self, sender: &str, source: AgentError) -> ConversationError {
        ConversationError { agent: self.name().to_string(), sender: sender.to_string(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::llm::providers::dummy::DummyProvider;
    use crate::llm::{LlmProvider, MessageTemplate, RetryPolicy};
    use crate::subsystems::memory::MemoryStore;
    use crate::subsystems::memory::stores::tmp::TmpStore;

    fn backend(context: usize) -> (DummyProvider, ChatBackend) {
        let p = DummyProvider::new(context, MessageTemplate::default());
        (p.clone(), ChatBackend::new(LlmProvider::Dummy(p), RetryPolicy::none()))
    }

    fn profile(name: &str) -> AgentProfile {
        AgentProfile {
            name: name.into(),
            supervisor: "Operator".into(),
            role: "critic".into(),
            guidance: "Be brief.".into(),
            commands: vec![],
        }
    }

    fn no_commands() -> CommandRegistry {
        CommandRegistry::empty().unwrap()
    }

    async fn signed_on(name: &str, context: usize) -> (DummyProvider, Agent) {
        let (p, b) = backend(context);
        let mut agent = Agent::new(profile(name), b, None);
        agent.sign_on("You are <name>, a <role>.", "", &no_commands()).await.unwrap();
        (p, agent)
    }

    // ── sign-on ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn sign_on_seats_one_measured_system_message() {
        let (_, agent) = signed_on("Bob", 100).await;
        let system = agent.inbound().get(SYSTEM);
        assert_eq!(system.len(), 1);
        assert_eq!(system[0].to(), "Bob");
        assert_eq!(system[0].from(), SYSTEM);
        assert_eq!(system[0].text(), "You are Bob, a critic.");
        assert_eq!(system[0].tokens(), Some(5));
        assert_eq!(agent.system_prompt(), Some(&system[0]));
        assert_eq!(agent.inbound().total(), 1);
    }

    #[tokio::test]
    async fn sign_on_fills_project_and_guidance() {
        let (_, b) = backend(100);
        let mut agent = Agent::new(profile("Bob"), b, None);
        agent
            .sign_on("<name> works on <project>. <guidance> Boss: <supervisor>", "a haiku", &no_commands())
            .await
            .unwrap();
        assert_eq!(
            agent.system_prompt().unwrap().text(),
            "Bob works on a haiku. Be brief. Boss: Operator"
        );
    }

    #[tokio::test]
    async fn sign_on_rejects_empty_template_and_repeats() {
        let (_, b) = backend(100);
        let mut agent = Agent::new(profile("Bob"), b, None);
        assert!(matches!(
            agent.sign_on("  ", "", &no_commands()).await,
            Err(AgentError::Validation(ValidationError::Empty { .. }))
        ));
        agent.sign_on("Hi <name>", "", &no_commands()).await.unwrap();
        assert!(matches!(
            agent.sign_on("Hi <name>", "", &no_commands()).await,
            Err(AgentError::Validation(ValidationError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn sign_on_lists_tagged_commands() {
        use crate::config::CommandConfig;
        let registry = CommandRegistry::from_config(&[CommandConfig {
            name: "list_agents".into(),
            tags: vec!["roster".into()],
        }])
        .unwrap();
        let (_, b) = backend(1000);
        let mut p = profile("Bob");
        p.commands = vec!["roster".into()];
        let mut agent = Agent::new(p, b, None);
        agent.sign_on("Commands:\n<commands>", "", &registry).await.unwrap();
        assert!(agent.system_prompt().unwrap().text().contains("list_agents() -> str"));
    }

    // ── receive / queues ──────────────────────────────────────────────

    #[tokio::test]
    async fn receive_fills_only_the_senders_inbound_queue() {
        let (_, mut bob) = signed_on("Bob", 100).await;
        bob.receive(Message::new("Alice", Some("Bob"), "hello there").unwrap()).await.unwrap();

        let from_alice = bob.inbound().get("Alice");
        assert_eq!(from_alice.len(), 1);
        assert_eq!(from_alice[0].tokens(), Some(2));
        assert!(bob.outbound().is_empty());
        assert!(bob.deliver().await.is_empty());
        assert_eq!(bob.inbound().len("Alice"), 1);
    }

    #[tokio::test]
    async fn receive_rejects_misaddressed_messages() {
        let (_, mut bob) = signed_on("Bob", 100).await;
        let err = bob.receive(Message::new("Alice", Some("Carol"), "hi").unwrap()).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(ValidationError::Misaddressed { .. })));
        assert!(bob.inbound().get("Alice").is_empty());
    }

    #[tokio::test]
    async fn receive_keeps_existing_token_counts() {
        let (_, mut bob) = signed_on("Bob", 100).await;
        let m = Message::new("Alice", Some("Bob"), "one two three").unwrap().with_tokens(9);
        bob.receive(m).await.unwrap();
        assert_eq!(bob.inbound().get("Alice")[0].tokens(), Some(9));
    }

    // ── interpret / deliver ───────────────────────────────────────────

    #[tokio::test]
    async fn interpret_before_sign_on_fails() {
        let (_, b) = backend(100);
        let mut agent = Agent::new(profile("Bob"), b, None);
        let err = agent.interpret().await.unwrap_err();
        assert_eq!(err.agent, "Bob");
        assert!(matches!(err.source, AgentError::NotSignedOn(_)));
    }

    #[tokio::test]
    async fn interpret_answers_each_sender_and_clears_inbound() {
        let (p, mut bob) = signed_on("Bob", 100).await;
        bob.receive(Message::new("Carol", Some("Bob"), "from carol").unwrap()).await.unwrap();
        bob.receive(Message::new("Alice", Some("Bob"), "from alice").unwrap()).await.unwrap();

        assert_eq!(bob.interpret().await.unwrap(), 3);
        assert!(bob.inbound().is_empty());

        let calls = p.calls();
        assert_eq!(calls.len(), 3);
        // Alice, Carol, System in name order; system prompt first, once.
        assert_eq!(calls[0].messages.len(), 2);
        assert_eq!(calls[0].messages[1].text(), "from alice");
        assert_eq!(calls[1].messages[1].text(), "from carol");
        assert_eq!(calls[2].messages.len(), 1);
        for call in &calls {
            assert_eq!(call.messages[0], *bob.system_prompt().unwrap());
        }

        let out = bob.deliver().await;
        let routes: Vec<_> = out.iter().map(|m| (m.from(), m.to())).collect();
        assert_eq!(routes, [("Bob", "Alice"), ("Bob", "Carol"), ("Bob", SYSTEM)]);
        assert!(bob.outbound().is_empty());
        assert!(bob.deliver().await.is_empty());
    }

    #[tokio::test]
    async fn later_system_messages_get_the_prompt_prepended() {
        let (p, mut bob) = signed_on("Bob", 100).await;
        bob.interpret().await.unwrap();
        bob.receive(Message::new(SYSTEM, Some("Bob"), "who are you talking to?").unwrap()).await.unwrap();
        bob.interpret().await.unwrap();

        let last = p.calls().pop().unwrap();
        assert_eq!(last.messages.len(), 2);
        assert_eq!(last.messages[0], *bob.system_prompt().unwrap());
    }

    #[tokio::test]
    async fn failure_leaves_the_failing_queue_intact() {
        let (p, mut bob) = signed_on("Bob", 100).await;
        bob.receive(Message::new("Alice", Some("Bob"), "a").unwrap()).await.unwrap();
        bob.receive(Message::new("Carol", Some("Bob"), "c").unwrap()).await.unwrap();
        p.fail_next(1);

        let err = bob.interpret().await.unwrap_err();
        assert_eq!(err.sender, "Alice");
        assert!(matches!(err.source, AgentError::Provider(_)));
        assert_eq!(bob.inbound().len("Alice"), 1);
        assert_eq!(bob.inbound().len("Carol"), 1);
        assert!(bob.outbound().is_empty());
    }

    #[tokio::test]
    async fn budget_error_names_the_conversation() {
        let (_, mut bob) = signed_on("Bob", 10).await;
        let long = (0..20).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        bob.receive(Message::new("Alice", Some("Bob"), long).unwrap()).await.unwrap();

        let err = bob.interpret().await.unwrap_err();
        assert_eq!((err.agent.as_str(), err.sender.as_str()), ("Bob", "Alice"));
        assert!(matches!(err.source, AgentError::Budget(BudgetError::Irreducible { .. })));
        assert!(err.to_string().contains("conversation with 'Alice'"));
    }

    #[tokio::test]
    async fn recovery_helpers_trim_inbound() {
        let (_, mut bob) = signed_on("Bob", 100).await;
        for t in ["one", "two", "three"] {
            bob.receive(Message::new("Alice", Some("Bob"), t).unwrap()).await.unwrap();
        }
        assert_eq!(bob.drop_oldest_inbound("Alice").unwrap().text(), "one");
        assert_eq!(bob.discard_inbound("Alice"), 2);
        assert_eq!(bob.discard_inbound("Alice"), 0);
        assert!(bob.drop_oldest_inbound("Nobody").is_none());
    }

    // ── memory ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn receive_and_deliver_record_to_memory() {
        let store = Arc::new(TmpStore::new());
        let (_, b) = backend(100);
        let handle = MemoryHandle::new("run-Bob", store.clone());
        let mut bob = Agent::new(profile("Bob"), b, Some(handle));
        bob.sign_on("You are <name>.", "", &no_commands()).await.unwrap();

        bob.receive(Message::new("Alice", Some("Bob"), "remember the lighthouse").unwrap()).await.unwrap();
        bob.interpret().await.unwrap();
        let out = bob.deliver().await;
        assert_eq!(out.len(), 2);

        let hits = store.recall("run-Bob", "lighthouse", 10).unwrap();
        // The inbound message plus Bob's echo reply to Alice.
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|r| r.from == "Alice" && r.to == "Bob"));
        assert!(hits.iter().any(|r| r.from == "Bob" && r.to == "Alice"));
    }

    #[tokio::test]
    async fn recall_injects_a_memory_digest_after_the_system_prompt() {
        let store = Arc::new(TmpStore::new());
        store
            .remember(
                "run-Bob",
                &MemoryRecord::from(&Message::new("Carol", Some("Bob"), "the lighthouse keeper is Dana").unwrap()),
            )
            .unwrap();

        let (p, b) = backend(1000);
        let handle = MemoryHandle::new("run-Bob", store);
        let mut bob = Agent::new(profile("Bob"), b, Some(handle)).with_recall(true);
        bob.sign_on("You are <name>.", "", &no_commands()).await.unwrap();
        bob.discard_inbound(SYSTEM);

        bob.receive(Message::new("Alice", Some("Bob"), "who keeps the lighthouse?").unwrap()).await.unwrap();
        bob.interpret().await.unwrap();

        let calls = p.calls();
        // One recall summary, then the reply.
        assert_eq!(calls.len(), 2);
        assert!(calls[0].messages[0].text().contains("the lighthouse keeper is Dana"));
        let reply_prompt = &calls[1].messages;
        assert_eq!(reply_prompt.len(), 3);
        assert_eq!(reply_prompt[1].from(), MEMORY);
        assert!(reply_prompt[1].text().ends_with(RECALL_NOTICE));
        assert_eq!(reply_prompt[2].text(), "who keeps the lighthouse?");
    }

    #[tokio::test]
    async fn recall_without_matches_adds_nothing() {
        let (p, b) = backend(1000);
        let handle = MemoryHandle::new("run-Bob", Arc::new(TmpStore::new()));
        let mut bob = Agent::new(profile("Bob"), b, Some(handle)).with_recall(true);
        bob.sign_on("You are <name>.", "", &no_commands()).await.unwrap();
        bob.discard_inbound(SYSTEM);

        bob.receive(Message::new("Alice", Some("Bob"), "fresh topic").unwrap()).await.unwrap();
        bob.interpret().await.unwrap();
        let calls = p.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages.len(), 2);
    }
}
