//! Command registry: capabilities agents can call by addressing `System`.
//!
//! Commands are registered at startup from `[commands.<name>]` config
//! sections.  Each carries a [`CommandDescriptor`] that is both rendered into
//! sign-on prompts and used to validate calls of the form
//! `name(arg=value, ...)` before [`Command::invoke`] runs.

pub mod builtins;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::config::CommandConfig;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },
    #[error("{command} failed: {reason}")]
    Failed { command: String, reason: String },
}

impl CommandError {
    pub fn invalid(command: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments { command: command.to_string(), reason: reason.into() }
    }

    pub fn failed(command: &str, reason: impl Into<String>) -> Self {
        Self::Failed { command: command.to_string(), reason: reason.into() }
    }
}

// ── Descriptors ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgKind::String => "str",
            ArgKind::Integer => "int",
            ArgKind::Boolean => "bool",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl ArgValue {
    fn parse(kind: ArgKind, raw: &str) -> Option<Self> {
        match kind {
            ArgKind::String => Some(ArgValue::String(raw.to_string())),
            ArgKind::Integer => raw.parse().ok().map(ArgValue::Integer),
            ArgKind::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" => Some(ArgValue::Boolean(true)),
                "false" => Some(ArgValue::Boolean(false)),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgumentSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub description: &'static str,
    pub required: bool,
    /// Raw default, parsed with `kind` when the argument is omitted.
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ReturnSpec {
    pub kind: ArgKind,
    pub description: &'static str,
}

#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: Vec<String>,
    pub arguments: Vec<ArgumentSpec>,
    pub returns: ReturnSpec,
}

impl CommandDescriptor {
    /// Doc block followed by the signature line.
    ///
    /// ```text
    /// # Describe one agent.
    /// #   name: agent to describe
    /// #   returns: the agent's role and supervisor
    /// describe_agent(name: str) -> str
    /// ```
    pub fn render(&self) -> String {
        let mut out = format!("# {}\n", self.description);
        for a in &self.arguments {
            out.push_str(&format!("#   {}: {}\n", a.name, a.description));
        }
        out.push_str(&format!("#   returns: {}\n", self.returns.description));

        let args = self
            .arguments
            .iter()
            .map(|a| match a.default {
                Some(d) => format!("{}: {} = {d}", a.name, a.kind),
                None => format!("{}: {}", a.name, a.kind),
            })
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("{}({args}) -> {}", self.name, self.returns.kind));
        out
    }

    /// Check `call` against the argument list and produce typed values,
    /// defaults filled in.  Positional arguments bind in declaration order.
    pub fn validate(&self, call: &CommandCall) -> Result<Arguments, CommandError> {
        let mut values = BTreeMap::new();
        let mut seen_named = false;

        for (i, (key, raw)) in call.args.iter().enumerate() {
            let spec = match key {
                Some(k) => {
                    seen_named = true;
                    self.arguments
                        .iter()
                        .find(|a| a.name == k.as_str())
                        .ok_or_else(|| CommandError::invalid(self.name, format!("unknown argument '{k}'")))?
                }
                None if seen_named => {
                    return Err(CommandError::invalid(
                        self.name,
                        "positional argument after named argument",
                    ));
                }
                None => self.arguments.get(i).ok_or_else(|| {
                    CommandError::invalid(self.name, format!("too many arguments (expected {})", self.arguments.len()))
                })?,
            };

            let value = ArgValue::parse(spec.kind, raw).ok_or_else(|| {
                CommandError::invalid(self.name, format!("'{}' expects {}, got '{raw}'", spec.name, spec.kind))
            })?;
            if values.insert(spec.name, value).is_some() {
                return Err(CommandError::invalid(self.name, format!("'{}' given twice", spec.name)));
            }
        }

        for spec in &self.arguments {
            if values.contains_key(spec.name) {
                continue;
            }
            match spec.default.and_then(|d| ArgValue::parse(spec.kind, d)) {
                Some(v) => {
                    values.insert(spec.name, v);
                }
                None if spec.required => {
                    return Err(CommandError::invalid(self.name, format!("missing argument '{}'", spec.name)));
                }
                None => {}
            }
        }

        Ok(Arguments(values))
    }
}

/// Validated, typed arguments keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(BTreeMap<&'static str, ArgValue>);

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }
}

// ── Calls ─────────────────────────────────────────────────────────────────────

/// A parsed `name(arg=value, ...)` call; values still raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    pub name: String,
    pub args: Vec<(Option<String>, String)>,
}

/// Split the argument list on commas outside quotes.
fn split_args(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in list.chars() {
        match (quote, c) {
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, ',') => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    for q in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

// ── Runtime context ───────────────────────────────────────────────────────────

/// One roster entry as commands see it.
#[derive(Debug, Clone)]
pub struct AgentSummary {
    pub name: String,
    pub supervisor: String,
    pub role: String,
}

/// Read-only swarm state handed to [`Command::invoke`].
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub agents: Vec<AgentSummary>,
    /// The caller's name.
    pub caller: String,
}

// ── Command trait and registry ────────────────────────────────────────────────

/// A callable capability.  `validate` runs after the descriptor has checked
/// and typed the arguments.
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn arguments(&self) -> Vec<ArgumentSpec>;
    fn returns(&self) -> ReturnSpec;

    fn validate(&self, _ctx: &CommandContext, _args: &Arguments) -> Result<(), CommandError> {
        Ok(())
    }

    fn invoke(&self, ctx: &CommandContext, args: &Arguments) -> Result<String, CommandError>;
}

struct Entry {
    descriptor: CommandDescriptor,
    command: Arc<dyn Command>,
}

/// Startup-time registry, sorted by command name.
pub struct CommandRegistry {
    entries: BTreeMap<String, Entry>,
    call_re: Regex,
}

impl CommandRegistry {
    pub fn empty() -> Result<Self, CommandError> {
        let call_re = Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$")
            .map_err(|e| CommandError::failed("registry", e.to_string()))?;
        Ok(Self { entries: BTreeMap::new(), call_re })
    }

    /// Register the built-in command named by each config section.
    pub fn from_config(sections: &[CommandConfig]) -> Result<Self, CommandError> {
        let mut registry = Self::empty()?;
        for section in sections {
            let command = builtins::lookup(&section.name)
                .ok_or_else(|| CommandError::Unknown(section.name.clone()))?;
            registry.register(command, section.tags.clone());
        }
        Ok(registry)
    }

    pub fn register(&mut self, command: Arc<dyn Command>, tags: Vec<String>) {
        let descriptor = CommandDescriptor {
            name: command.name(),
            description: command.description(),
            tags,
            arguments: command.arguments(),
            returns: command.returns(),
        };
        self.entries.insert(command.name().to_string(), Entry { descriptor, command });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptor(&self, name: &str) -> Option<&CommandDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Descriptors carrying any of `tags`, each once, in name order.
    pub fn descriptors_for_tags(&self, tags: &[String]) -> Vec<&CommandDescriptor> {
        self.entries
            .values()
            .map(|e| &e.descriptor)
            .filter(|d| d.tags.iter().any(|t| tags.contains(t)))
            .collect()
    }

    /// Rendered descriptors for `tags`, joined by blank lines.
    pub fn render_for_tags(&self, tags: &[String]) -> String {
        self.descriptors_for_tags(tags)
            .iter()
            .map(|d| d.render())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Parse `text` as a call of a registered command.  `None` when the text
    /// is not call-shaped or names no registered command.
    pub fn parse_call(&self, text: &str) -> Option<CommandCall> {
        let caps = self.call_re.captures(text)?;
        let name = caps.get(1)?.as_str();
        if !self.entries.contains_key(name) {
            return None;
        }

        let list = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        let args = if list.is_empty() {
            Vec::new()
        } else {
            split_args(list)
                .into_iter()
                .map(|part| match part.split_once('=') {
                    Some((k, v)) if is_identifier(k.trim()) => {
                        (Some(k.trim().to_string()), unquote(v).to_string())
                    }
                    _ => (None, unquote(&part).to_string()),
                })
                .collect()
        };

        Some(CommandCall { name: name.to_string(), args })
    }

    /// Validate then invoke.
    pub fn dispatch(&self, ctx: &CommandContext, call: &CommandCall) -> Result<String, CommandError> {
        let entry = self
            .entries
            .get(&call.name)
            .ok_or_else(|| CommandError::Unknown(call.name.clone()))?;
        let args = entry.descriptor.validate(call)?;
        entry.command.validate(ctx, &args)?;
        entry.command.invoke(ctx, &args)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
