//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (or the path given with `-f`), then applies `ARALIYA_WORK_DIR` and
//! `ARALIYA_LOG_LEVEL` env overrides.  `LLM_API_KEY` is the only source of
//! the provider API key.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;
use crate::message::{MEMORY, SYSTEM};
use crate::subsystems::agents::AgentProfile;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// What the router does with a conversation that cannot fit the context
/// window even after summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetRecovery {
    /// Drop the oldest message of the conversation and retry next iteration.
    DropOldest,
    /// Discard the whole conversation's inbound queue.
    Abort,
}

/// Swarm-level settings (`[swarm]`).
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub name: String,
    /// Free-text project description filled into `<project>`.
    pub project: String,
    /// Resolved sign-on template text.
    pub sign_on_template: String,
    /// Identity the operator console speaks as.
    pub operator: String,
    /// Console keyword that stops the swarm (compared case-insensitively).
    pub exit_command: String,
    /// Idle sleep between iterations that moved no messages.
    pub idle_ms: u64,
    pub budget_recovery: BudgetRecovery,
}

/// Dummy provider configuration (`[llm.dummy]`).
#[derive(Debug, Clone)]
pub struct DummyConfig {
    pub context_size: usize,
}

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// Overrides the built-in model table when set.
    pub context_size: Option<usize>,
}

/// text-generation-webui provider configuration (`[llm.tgwui]`).
#[derive(Debug, Clone)]
pub struct TgwuiConfig {
    /// Server root, e.g. `http://127.0.0.1:5000`.
    pub api_base_url: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub context_size: usize,
}

/// LLM subsystem configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`, `"openai-completion"`,
    /// `"tgwui"`).
    /// Maps to `default` in `[llm]`.
    pub provider: String,
    /// Per-message render template; `<from>`, `<to>` and `<text>` are filled.
    pub message_template: String,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub backoff_ms: u64,
    pub dummy: DummyConfig,
    pub openai: OpenAiConfig,
    /// Legacy `/v1/completions` endpoint (`[llm.openai_completion]`).
    pub openai_completion: OpenAiConfig,
    pub tgwui: TgwuiConfig,
}

/// Memory subsystem configuration (`[memory]`).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Store type: `"tmp"` or `"transcript"`.
    pub store: String,
    pub transcript_cap: Option<usize>,
}

/// Agents configuration (`[agents]`).
#[derive(Debug, Clone)]
pub struct AgentsConfig {
    /// Inject recalled memories after the system prompt.
    pub recall: bool,
    pub profiles: Vec<AgentProfile>,
}

/// One `[commands.<name>]` section.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub name: String,
    pub tags: Vec<String>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Append logs here instead of stderr.
    pub log_file: Option<PathBuf>,
    pub swarm: SwarmConfig,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY`, `None` for keyless local models.
    pub llm_api_key: Option<String>,
    pub memory: MemoryConfig,
    pub agents: AgentsConfig,
    /// Sorted by name.
    pub commands: Vec<CommandConfig>,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    swarm: RawSwarm,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    memory: RawMemory,
    #[serde(default)]
    agents: RawAgents,
    #[serde(default)]
    commands: std::collections::BTreeMap<String, RawCommand>,
}

#[derive(Deserialize)]
struct RawSwarm {
    #[serde(default = "default_swarm_name")]
    name: String,
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    project: String,
    #[serde(default)]
    sign_on_template: Option<String>,
    /// Relative paths resolve against the config file's directory.
    #[serde(default)]
    sign_on_template_file: Option<String>,
    #[serde(default = "default_operator")]
    operator: String,
    #[serde(default = "default_exit_command")]
    exit_command: String,
    #[serde(default = "default_idle_ms")]
    idle_ms: u64,
    #[serde(default = "default_budget_recovery")]
    budget_recovery: BudgetRecovery,
}

#[derive(Deserialize)]
struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default = "default_message_template")]
    message_template: String,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default = "default_backoff_ms")]
    backoff_ms: u64,
    #[serde(default)]
    dummy: RawDummy,
    #[serde(default)]
    openai: RawOpenAi,
    #[serde(default)]
    openai_completion: RawOpenAiCompletion,
    #[serde(default)]
    tgwui: RawTgwui,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            message_template: default_message_template(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            dummy: RawDummy::default(),
            openai: RawOpenAi::default(),
            openai_completion: RawOpenAiCompletion::default(),
            tgwui: RawTgwui::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawDummy {
    #[serde(default = "default_context_size")]
    context_size: usize,
}

impl Default for RawDummy {
    fn default() -> Self {
        Self { context_size: default_context_size() }
    }
}

#[derive(Deserialize)]
struct RawOpenAi {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    context_size: Option<usize>,
}

impl Default for RawOpenAi {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
            context_size: None,
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAiCompletion {
    #[serde(default = "default_completion_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_completion_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    context_size: Option<usize>,
}

impl Default for RawOpenAiCompletion {
    fn default() -> Self {
        Self {
            api_base_url: default_completion_api_base_url(),
            model: default_completion_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
            context_size: None,
        }
    }
}

#[derive(Deserialize)]
struct RawTgwui {
    #[serde(default = "default_tgwui_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_context_size")]
    context_size: usize,
}

impl Default for RawTgwui {
    fn default() -> Self {
        Self {
            api_base_url: default_tgwui_api_base_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
            context_size: default_context_size(),
        }
    }
}

#[derive(Deserialize)]
struct RawMemory {
    #[serde(default = "default_memory_store")]
    store: String,
    #[serde(default)]
    transcript_cap: Option<usize>,
}

impl Default for RawMemory {
    fn default() -> Self {
        Self { store: default_memory_store(), transcript_cap: None }
    }
}

#[derive(Deserialize, Default)]
struct RawAgents {
    #[serde(default)]
    recall: bool,
    #[serde(default)]
    profiles: Vec<RawAgentProfile>,
}

#[derive(Deserialize)]
struct RawAgentProfile {
    name: String,
    #[serde(default)]
    supervisor: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    guidance: String,
    /// Command tags this agent is told about at sign-on.
    #[serde(default)]
    commands: Vec<String>,
    /// Defaults to `true`; set to `false` to disable without removing the entry.
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_swarm_name() -> String { "araliya-swarm".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_operator() -> String { "Operator".to_string() }
fn default_exit_command() -> String { "exit".to_string() }
fn default_idle_ms() -> u64 { 250 }
fn default_budget_recovery() -> BudgetRecovery { BudgetRecovery::DropOldest }
fn default_sign_on_template() -> String { "Agent <name> has signed on.".to_string() }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_message_template() -> String { "<from>: <text>".to_string() }
fn default_retries() -> u32 { 5 }
fn default_backoff_ms() -> u64 { 3000 }
fn default_context_size() -> usize { 2048 }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_completion_api_base_url() -> String { "https://api.openai.com/v1/completions".to_string() }
fn default_completion_model() -> String { "text-davinci-003".to_string() }
fn default_tgwui_api_base_url() -> String { "http://127.0.0.1:5000".to_string() }
fn default_temperature() -> f32 { 0.5 }
fn default_timeout_seconds() -> u64 { 120 }
fn default_memory_store() -> String { "tmp".to_string() }

fn default_true() -> bool {
    true
}

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("ARALIYA_WORK_DIR").ok();
    let log_level_override = env::var("ARALIYA_LOG_LEVEL").ok();
    let mut config = load_from(
        Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH)),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
    )?;
    config.llm_api_key = env::var("LLM_API_KEY").ok();
    Ok(config)
}

/// Internal loader, accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let s = parsed.swarm;

    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();
    let log_file = s.log_file.map(|p| {
        let p = expand_home(&p);
        if p.is_absolute() { p } else { work_dir.join(p) }
    });

    let sign_on_template = match (s.sign_on_template, s.sign_on_template_file) {
        (Some(_), Some(_)) => {
            return Err(AppError::Config(
                "set either sign_on_template or sign_on_template_file, not both".into(),
            ));
        }
        (Some(text), None) => text,
        (None, Some(file)) => {
            let p = expand_home(&file);
            let p = if p.is_absolute() { p } else { config_dir.join(p) };
            fs::read_to_string(&p)
                .map_err(|e| AppError::Config(format!("cannot read {}: {e}", p.display())))?
        }
        (None, None) => default_sign_on_template(),
    };

    if s.operator.trim().is_empty() {
        return Err(AppError::Config("swarm.operator must not be empty".into()));
    }
    if s.exit_command.trim().is_empty() {
        return Err(AppError::Config("swarm.exit_command must not be empty".into()));
    }

    let profiles = resolve_profiles(parsed.agents.profiles, &s.operator)?;

    let commands = parsed
        .commands
        .into_iter()
        .filter(|(_, c)| c.enabled)
        .map(|(name, c)| CommandConfig { name, tags: c.tags })
        .collect();

    Ok(Config {
        work_dir,
        log_level,
        log_file,
        swarm: SwarmConfig {
            name: s.name,
            project: s.project,
            sign_on_template,
            operator: s.operator,
            exit_command: s.exit_command,
            idle_ms: s.idle_ms,
            budget_recovery: s.budget_recovery,
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            message_template: parsed.llm.message_template,
            retries: parsed.llm.retries,
            backoff_ms: parsed.llm.backoff_ms,
            dummy: DummyConfig { context_size: parsed.llm.dummy.context_size },
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
                context_size: parsed.llm.openai.context_size,
            },
            openai_completion: OpenAiConfig {
                api_base_url: parsed.llm.openai_completion.api_base_url,
                model: parsed.llm.openai_completion.model,
                temperature: parsed.llm.openai_completion.temperature,
                timeout_seconds: parsed.llm.openai_completion.timeout_seconds,
                context_size: parsed.llm.openai_completion.context_size,
            },
            tgwui: TgwuiConfig {
                api_base_url: parsed.llm.tgwui.api_base_url,
                temperature: parsed.llm.tgwui.temperature,
                timeout_seconds: parsed.llm.tgwui.timeout_seconds,
                context_size: parsed.llm.tgwui.context_size,
            },
        },
        llm_api_key: None,
        memory: MemoryConfig {
            store: parsed.memory.store,
            transcript_cap: parsed.memory.transcript_cap,
        },
        agents: AgentsConfig { recall: parsed.agents.recall, profiles },
        commands,
    })
}

/// Build the roster profiles, rejecting empty, reserved, and duplicate names.
fn resolve_profiles(
    raw: Vec<RawAgentProfile>,
    operator: &str,
) -> Result<Vec<AgentProfile>, AppError> {
    let mut seen = HashSet::new();
    let mut profiles = Vec::new();

    for p in raw.into_iter().filter(|p| p.enabled) {
        let name = p.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Config("agent name must not be empty".into()));
        }
        if [SYSTEM, MEMORY, operator].iter().any(|r| r.eq_ignore_ascii_case(&name)) {
            return Err(AppError::Config(format!("agent name '{name}' is reserved")));
        }
        if !seen.insert(name.to_lowercase()) {
            return Err(AppError::Config(format!("duplicate agent name '{name}'")));
        }
        profiles.push(AgentProfile {
            name,
            supervisor: p.supervisor,
            role: p.role,
            guidance: p.guidance,
            commands: p.commands,
        });
    }

    Ok(profiles)
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// `SwarmConfig` for tests, default identities, no idle wait.
impl SwarmConfig {
    pub fn test_default() -> Self {
        Self {
            name: default_swarm_name(),
            project: String::new(),
            sign_on_template: default_sign_on_template(),
            operator: default_operator(),
            exit_command: default_exit_command(),
            idle_ms: 0,
            budget_recovery: default_budget_recovery(),
        }
    }
}

/// `LlmConfig` for tests, dummy provider, no retries, no external calls.
impl LlmConfig {
    pub fn test_default(context_size: usize) -> Self {
        Self {
            provider: "dummy".into(),
            message_template: default_message_template(),
            retries: 0,
            backoff_ms: 0,
            dummy: DummyConfig { context_size },
            openai: OpenAiConfig {
                api_base_url: "http://localhost:0/v1/chat/completions".into(),
                model: "test-model".into(),
                temperature: 0.0,
                timeout_seconds: 1,
                context_size: None,
            },
            openai_completion: OpenAiConfig {
                api_base_url: "http://localhost:0/v1/completions".into(),
                model: default_completion_model(),
                temperature: 0.0,
                timeout_seconds: 1,
                context_size: None,
            },
            tgwui: TgwuiConfig {
                api_base_url: "http://localhost:0".into(),
                temperature: 0.0,
                timeout_seconds: 1,
                context_size,
            },
        }
    }
}
