//! `transcript` store: capped Markdown transcript per namespace.
//!
//! One file per namespace under the store root:
//!
//! ```text
//! ### {from} -> {to} — {rfc3339 timestamp}
//!
//! {text}
//! ```
//!
//! Capped by entry count (FIFO, oldest entries dropped first).  Text lines
//! that would read as a header are written with a leading `\`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::subsystems::memory::{MemoryRecord, MemoryStore, matches_forget, rank};

/// Default maximum number of transcript entries before FIFO eviction.
const DEFAULT_TRANSCRIPT_CAP: usize = 500;

const HEADER_PREFIX: &str = "### ";
const ESCAPED_HEADER_PREFIX: &str = "\\### ";

pub struct TranscriptStore {
    root: PathBuf,
    cap: usize,
    /// Serialises read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl TranscriptStore {
    /// Create the store, making `root` if needed.
    pub fn new(root: PathBuf, cap: Option<usize>) -> Result<Self, AppError> {
        fs::create_dir_all(&root)
            .map_err(|e| AppError::Memory(format!("cannot create {}: {e}", root.display())))?;
        Ok(Self { root, cap: cap.unwrap_or(DEFAULT_TRANSCRIPT_CAP), write_lock: Mutex::new(()) })
    }

    fn path(&self, namespace: &str) -> PathBuf {
        let safe: String = namespace
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.md"))
    }

    fn read(path: &Path) -> Result<Vec<MemoryRecord>, AppError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(parse_transcript(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(AppError::Memory(format!("cannot read {}: {e}", path.display()))),
        }
    }

    fn write(path: &Path, records: &[MemoryRecord]) -> Result<(), AppError> {
        fs::write(path, serialise_transcript(records))
            .map_err(|e| AppError::Memory(format!("cannot write {}: {e}", path.display())))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, AppError> {
        self.write_lock
            .lock()
            .map_err(|_| AppError::Memory("transcript store lock poisoned".into()))
    }
}

impl MemoryStore for TranscriptStore {
    fn store_type(&self) -> &str {
        "transcript"
    }

    fn remember(&self, namespace: &str, record: &MemoryRecord) -> Result<(), AppError> {
        let _guard = self.lock()?;
        let path = self.path(namespace);
        let mut records = Self::read(&path)?;
        records.push(record.clone());

        // FIFO cap: drop oldest.
        let excess = records.len().saturating_sub(self.cap);
        records.drain(..excess);

        Self::write(&path, &records)
    }

    fn recall(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, AppError> {
        let records = Self::read(&self.path(namespace))?;
        Ok(rank(&records, query, limit))
    }

    fn forget(&self, namespace: &str, query: &str) -> Result<usize, AppError> {
        let _guard = self.lock()?;
        let path = self.path(namespace);
        let mut records = Self::read(&path)?;
        let before = records.len();
        records.retain(|r| !matches_forget(r, query));
        let removed = before - records.len();
        if removed > 0 {
            Self::write(&path, &records)?;
        }
        Ok(removed)
    }
}

/// Parse a transcript into records by splitting on `### ` headers.
/// Entries with a malformed header are skipped.
fn parse_transcript(text: &str) -> Vec<MemoryRecord> {
    let mut records = Vec::new();
    let mut current: Option<(Option<(String, String, DateTime<Utc>)>, Vec<&str>)> = None;

    let mut flush = |entry: Option<(Option<(String, String, DateTime<Utc>)>, Vec<&str>)>| {
        if let Some((Some((from, to, timestamp)), lines)) = entry {
            let text = lines
                .into_iter()
                .map(|l| if l.starts_with(ESCAPED_HEADER_PREFIX) { &l[1..] } else { l })
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
            records.push(MemoryRecord { from, to, text, timestamp });
        }
    };

    for line in text.lines() {
        if let Some(header) = line.strip_prefix(HEADER_PREFIX) {
            flush(current.take());
            current = Some((parse_header(header), Vec::new()));
        } else if let Some((_, ref mut lines)) = current {
            lines.push(line);
        }
    }
    flush(current);
    records
}

/// `"{from} -> {to} — {timestamp}"`
fn parse_header(header: &str) -> Option<(String, String, DateTime<Utc>)> {
    let (route, ts) = header.rsplit_once(" — ")?;
    let (from, to) = route.split_once(" -> ")?;
    let timestamp = DateTime::parse_from_rfc3339(ts.trim()).ok()?.with_timezone(&Utc);
    Some((from.trim().to_string(), to.trim().to_string(), timestamp))
}

fn serialise_transcript(records: &[MemoryRecord]) -> String {
    let mut out = String::new();
    for r in records {
        let body = r
            .text
            .lines()
            .map(|l| {
                if l.starts_with(HEADER_PREFIX) {
                    format!("\\{l}")
                } else {
                    l.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str(&format!(
            "{HEADER_PREFIX}{} -> {} — {}\n\n{body}\n\n",
            r.from,
            r.to,
            r.timestamp.to_rfc3339()
        ));
    }
    out
}
