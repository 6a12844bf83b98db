//! araliya-swarm: entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build memory, backend, command registry and the roster
//!   6. Sign every agent on
//!   7. Spawn Ctrl-C → shutdown watcher
//!   8. Run router + console until shutdown

use tokio_util::sync::CancellationToken;
use tracing::info;

use araliya_swarm::config::{self, Config};
use araliya_swarm::error::AppError;
use araliya_swarm::llm::providers;
use araliya_swarm::logger::{self, LevelSource, LogSink};
use araliya_swarm::subsystems::agents::Agent;
use araliya_swarm::subsystems::commands::CommandRegistry;
use araliya_swarm::subsystems::comms::{self, pty::PtyChannel};
use araliya_swarm::subsystems::entities::ProperNounExtractor;
use araliya_swarm::subsystems::memory::MemorySystem;
use araliya_swarm::subsystems::runtime::{Component, spawn_components};
use araliya_swarm::supervisor::Router;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present, ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    let level_source = if args.log_level.is_some() { LevelSource::Cli } else { LevelSource::Config };
    logger::init(effective_log_level, level_source, &LogSink::from_option(config.log_file.as_deref()))?;

    info!(
        swarm = %config.swarm.name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        provider = %config.llm.provider,
        "config loaded"
    );

    let session_id = uuid::Uuid::new_v4().to_string();
    let memory = MemorySystem::new(&config.memory, &config.work_dir, &session_id)?;
    let backend = providers::build_backend(&config.llm, config.llm_api_key.clone())?;

    let commands = CommandRegistry::from_config(&config.commands)
        .map_err(|e| AppError::Config(e.to_string()))?;

    let agents: Vec<Agent> = config
        .agents
        .profiles
        .iter()
        .map(|p| {
            Agent::new(p.clone(), backend.clone(), Some(memory.handle(&p.name)))
                .with_recall(config.agents.recall)
        })
        .collect();
    if agents.is_empty() {
        return Err(AppError::Config("no agents configured under [[agents.profiles]]".into()));
    }

    let (console_link, router_link) = comms::operator_link(comms::DEFAULT_CAPACITY);
    let mut router = Router::new(
        agents,
        commands,
        Box::new(ProperNounExtractor),
        router_link,
        &config.swarm,
    );
    router.sign_on_all(&config.swarm.sign_on_template, &config.swarm.project).await?;

    print_startup_summary(&config, &session_id, &router.roster());

    // Shared shutdown token, Ctrl-C and the console exit keyword cancel it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let console = PtyChannel::new(
        "pty0",
        config.swarm.operator.clone(),
        config.swarm.exit_command.clone(),
        console_link,
    );
    let components: Vec<Box<dyn Component>> = vec![Box::new(router), Box::new(console)];
    let result = spawn_components(components, shutdown.clone()).join().await;
    shutdown.cancel();

    {
        use std::io::Write as _;
        println!("\nBye :) ...");
        let _ = std::io::stdout().flush();
    }
    result
}

fn print_startup_summary(config: &Config, session_id: &str, roster: &[&str]) {
    let model = match config.llm.provider.as_str() {
        "openai" | "openai-compatible" => config.llm.openai.model.as_str(),
        "openai-completion" => config.llm.openai_completion.model.as_str(),
        other => other,
    };
    println!("─────────────────────────────────");
    println!(" {} ", config.swarm.name);
    println!("   session : {session_id}");
    println!("   backend : {} ({model})", config.llm.provider);
    println!("   memory  : {}", config.memory.store);
    println!("   agents  : {}", roster.join(", "));
    if !config.swarm.project.is_empty() {
        println!("   project : {}", config.swarm.project);
    }
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: araliya-swarm [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: {})", config::DEFAULT_CONFIG_PATH);
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug
    //   -vvvv+  → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
