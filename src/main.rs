#![forbid(unsafe_code)]

//! `agent-link`: talk to an agent app-server over stdio.
//!
//! Launches the configured agent, performs the handshake, runs one command
//! and shuts the agent down again.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_link::api::LoginMethod;
use agent_link::config::GlobalConfig;
use agent_link::launcher::spawn_agent;
use agent_link::render::{PlainRenderer, TextRenderer};
use agent_link::rpc::transport::Transport;
use agent_link::{run_turn, AppError, NotificationPump, Result, Session};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-link", about = "JSON-RPC client for agent app-servers", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the workspace root the agent runs in.
    #[arg(long)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one turn and print the agent's reply.
    Run {
        /// Input text for the turn.
        #[arg(long)]
        prompt: String,
        /// Resume this thread instead of starting a new one.
        #[arg(long)]
        thread: Option<String>,
        /// Print the full turn result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List available models.
    Models,
    /// List stored threads.
    Threads {
        /// Maximum number of threads to list.
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show the signed-in account.
    Account,
    /// Start a login flow (browser unless an API key is given).
    Login {
        /// API key to log in with.
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Run a command through the agent's sandbox.
    Exec {
        /// Command and arguments.
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(ws) = &args.workspace {
        config.set_workspace_root(ws)?;
    }

    let process = spawn_agent(&config.launch_config(), "primary")?;
    let session = Session::handshake(Transport::from_process(process), config.session_options())
        .await?;

    let outcome = tokio::select! {
        outcome = execute(&session, &config, args.command) => outcome,
        () = shutdown_signal() => {
            warn!("interrupted, closing session");
            Ok(())
        }
    };

    session.close().await;
    if let Err(err) = &outcome {
        error!(%err, "command failed");
    }
    outcome
}

async fn execute(session: &Session, config: &GlobalConfig, command: Command) -> Result<()> {
    match command {
        Command::Run {
            prompt,
            thread,
            json,
        } => {
            let thread = match thread {
                Some(id) => session.resume_thread(&id).await?,
                None => {
                    session
                        .start_thread(Some(&config.agent.workspace_root))
                        .await?
                }
            };
            info!(thread_id = %thread.id, "thread ready");

            let pump = NotificationPump::new(session, config.approval_policy())
                .with_read_slice(config.read_slice());
            let result = run_turn(&pump, &thread.id, &prompt, &config.turn_options()).await?;

            if json {
                print_json(&serde_json::json!({
                    "threadId": thread.id,
                    "turnId": result.turn_id,
                    "status": result.status,
                    "text": result.text,
                    "items": result.items,
                    "errors": result.errors,
                }))?;
            } else {
                print!("{}", PlainRenderer.render(&result.text));
                if !result.is_complete() {
                    warn!(status = %result.status, state = ?result.state, "turn did not complete");
                }
            }
            Ok(())
        }
        Command::Models => {
            let page = session.list_models(None, None).await?;
            print_json(&serde_json::to_value(page)?)
        }
        Command::Threads { limit } => {
            let page = session.list_threads(None, limit).await?;
            print_json(&serde_json::to_value(page)?)
        }
        Command::Account => print_json(&session.read_account().await?),
        Command::Login { api_key } => {
            let method = api_key.map_or(LoginMethod::Browser, LoginMethod::ApiKey);
            print_json(&session.start_login(&method).await?)
        }
        Command::Exec { argv } => {
            let output = session
                .exec_command(&argv, Some(&config.agent.workspace_root), None)
                .await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if output.exit_code != 0 {
                warn!(exit_code = output.exit_code, "command exited with non-zero status");
            }
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to format output: {err}")))?;
    println!("{text}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
