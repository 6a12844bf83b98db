//! Memory subsystem: per-agent conversation records with pluggable stores.
//!
//! Every agent gets a [`MemoryHandle`] scoped to the namespace
//! `{session_id}-{agent}`.  The handle dispatches store calls to the blocking
//! thread pool.  From the conversation's point of view memory is best-effort:
//! callers log failures and carry on.
//!
//! ```text
//! {work_dir}/
//! └── memory/
//!     └── {session_id}-{agent}.md      (transcript store only)
//! ```

pub mod stores;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MemoryConfig;
use crate::error::AppError;
use crate::message::Message;

/// A remembered message, minus the transient token count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub from: String,
    pub to: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for MemoryRecord {
    fn from(m: &Message) -> Self {
        Self {
            from: m.from().to_string(),
            to: m.to().to_string(),
            text: m.text().to_string(),
            timestamp: m.timestamp(),
        }
    }
}

/// Pluggable memory store.
///
/// Stores are `Send + Sync` and may do blocking I/O; [`MemoryHandle`] wraps
/// the calls in `spawn_blocking`.  Namespaces are fully independent.
pub trait MemoryStore: Send + Sync {
    /// Unique type name for this store (e.g. `"tmp"`).
    fn store_type(&self) -> &str;

    fn remember(&self, namespace: &str, record: &MemoryRecord) -> Result<(), AppError>;

    /// Up to `limit` records relevant to `query`, most relevant first.
    fn recall(&self, namespace: &str, query: &str, limit: usize)
    -> Result<Vec<MemoryRecord>, AppError>;

    /// Remove records whose text contains `query` (case-insensitive); an
    /// empty query clears the namespace.  Returns the number removed.
    fn forget(&self, namespace: &str, query: &str) -> Result<usize, AppError>;
}

// ── Relevance ─────────────────────────────────────────────────────────────────

/// Lowercased alphanumeric words of three or more characters.
pub(crate) fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

/// Rank `records` against `query` by keyword overlap; newest wins ties.
/// Records sharing no keyword with the query are left out.
pub(crate) fn rank(records: &[MemoryRecord], query: &str, limit: usize) -> Vec<MemoryRecord> {
    let terms = keywords(query);
    if terms.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &MemoryRecord)> = records
        .iter()
        .map(|r| (keywords(&r.text).intersection(&terms).count(), r))
        .filter(|(score, _)| *score > 0)
        .collect();

    scored.sort_by(|(sa, ra), (sb, rb)| sb.cmp(sa).then(rb.timestamp.cmp(&ra.timestamp)));
    scored.into_iter().take(limit).map(|(_, r)| r.clone()).collect()
}

pub(crate) fn matches_forget(record: &MemoryRecord, query: &str) -> bool {
    query.is_empty() || record.text.to_lowercase().contains(&query.to_lowercase())
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Async-safe handle to one namespace of a store.
///
/// Cheaply cloneable (`Arc`-backed).
#[derive(Clone)]
pub struct MemoryHandle {
    namespace: String,
    store: Arc<dyn MemoryStore>,
}

impl MemoryHandle {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn MemoryStore>) -> Self {
        Self { namespace: namespace.into(), store }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn remember(&self, record: MemoryRecord) -> Result<(), AppError> {
        let store = self.store.clone();
        let namespace = self.namespace.clone();
        tokio::task::spawn_blocking(move || store.remember(&namespace, &record))
            .await
            .map_err(|e| AppError::Memory(format!("join error: {e}")))?
    }

    pub async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, AppError> {
        let store = self.store.clone();
        let namespace = self.namespace.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || store.recall(&namespace, &query, limit))
            .await
            .map_err(|e| AppError::Memory(format!("join error: {e}")))?
    }

    pub async fn forget(&self, query: &str) -> Result<usize, AppError> {
        let store = self.store.clone();
        let namespace = self.namespace.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || store.forget(&namespace, &query))
            .await
            .map_err(|e| AppError::Memory(format!("join error: {e}")))?
    }
}

impl std::fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("namespace", &self.namespace)
            .field("store", &self.store.store_type())
            .finish()
    }
}

// ── Memory system ─────────────────────────────────────────────────────────────

/// The configured store plus the run's session id.
pub struct MemorySystem {
    session_id: String,
    store: Arc<dyn MemoryStore>,
}

impl MemorySystem {
    /// Build the store named in `config`.  `work_dir` hosts the transcript
    /// store's `memory/` directory.
    pub fn new(config: &MemoryConfig, work_dir: &Path, session_id: &str) -> Result<Self, AppError> {
        let store: Arc<dyn MemoryStore> = match config.store.as_str() {
            "tmp" => Arc::new(stores::tmp::TmpStore::new()),
            "transcript" => Arc::new(stores::transcript::TranscriptStore::new(
                work_dir.join("memory"),
                config.transcript_cap,
            )?),
            other => return Err(AppError::Memory(format!("unknown memory store: {other}"))),
        };
        info!(store = store.store_type(), session_id, "memory system ready");
        Ok(Self { session_id: session_id.to_string(), store })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handle scoped to `{session_id}-{agent}`.
    pub fn handle(&self, agent: &str) -> MemoryHandle {
        MemoryHandle::new(format!("{}-{agent}", self.session_id), self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(text: &str, secs: i64) -> MemoryRecord {
        MemoryRecord {
            from: "Alice".into(),
            to: "Bob".into(),
            text: text.into(),
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn record_drops_token_count() {
        let m = Message::new("Alice", Some("Bob"), "hello").unwrap().with_tokens(1);
        let r = MemoryRecord::from(&m);
        assert_eq!(r.text, "hello");
        assert_eq!(r.timestamp, m.timestamp());
        assert!(!serde_json::to_string(&r).unwrap().contains("tokens"));
    }

    #[test]
    fn rank_orders_by_overlap_then_recency() {
        let records = [
            record("the haiku about autumn", 0),
            record("autumn leaves and haiku meter", 1),
            record("unrelated lunch plans", 2),
            record("another autumn note", 3),
        ];
        let hits = rank(&records, "Haiku, autumn?", 10);
        let texts: Vec<_> = hits.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(
            texts,
            ["autumn leaves and haiku meter", "the haiku about autumn", "another autumn note"]
        );
        assert_eq!(rank(&records, "autumn", 1).len(), 1);
    }

    #[test]
    fn short_query_words_match_nothing() {
        let records = [record("an ox is by me", 0)];
        assert!(rank(&records, "ox by", 5).is_empty());
    }

    #[test]
    fn unknown_store_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MemoryConfig { store: "nope".into(), transcript_cap: None };
        assert!(MemorySystem::new(&cfg, dir.path(), "s").is_err());
    }

    #[tokio::test]
    async fn handles_are_namespaced_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MemoryConfig { store: "tmp".into(), transcript_cap: None };
        let system = MemorySystem::new(&cfg, dir.path(), "run1").unwrap();
        let alice = system.handle("Alice");
        let bob = system.handle("Bob");
        assert_eq!(alice.namespace(), "run1-Alice");

        alice.remember(record("secret garden plans", 0)).await.unwrap();
        assert_eq!(alice.recall("garden", 5).await.unwrap().len(), 1);
        assert!(bob.recall("garden", 5).await.unwrap().is_empty());
        assert_eq!(alice.forget("GARDEN").await.unwrap(), 1);
        assert!(alice.recall("garden", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handle_forget_clears_only_its_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MemoryConfig { store: "transcript".into(), transcript_cap: None };
        let system = MemorySystem::new(&cfg, dir.path(), "run2").unwrap();
        let alice = system.handle("Alice");
        let carol = system.handle("Carol");

        alice.remember(record("river crossing notes", 0)).await.unwrap();
        alice.remember(record("mountain pass notes", 1)).await.unwrap();
        carol.remember(record("river delta notes", 2)).await.unwrap();

        assert_eq!(alice.forget("").await.unwrap(), 2);
        assert!(alice.recall("notes", 5).await.unwrap().is_empty());
        assert_eq!(carol.recall("river", 5).await.unwrap().len(), 1);
        assert_eq!(alice.forget("river").await.unwrap(), 0);
    }
}
