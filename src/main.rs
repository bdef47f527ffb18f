#![forbid(unsafe_code)]

//! `editlink`: editor host and agent-side edit tool.
//!
//! `editlink serve` runs the editor host over a file-backed surface, with the
//! control socket for `editlink-ctl`. `editlink edit` and `editlink write`
//! act as the agent: they propose a change and report the decision.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use editlink::config::GlobalConfig;
use editlink::driver::tools::{edit_file, write_file};
use editlink::driver::{AgentBridge, BridgeEvent, ProposeOutcome};
use editlink::host::EditorHost;
use editlink::ipc::{spawn_control_server, ControlContext};
use editlink::surface::FileSurface;
use editlink::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "editlink", about = "Agent edit bridge", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Workspace root; repeat for several. Overrides the config file.
    #[arg(long, global = true)]
    workspace: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the editor host until interrupted.
    Serve,

    /// Replace the first occurrence of `--old` with `--new` in a file.
    Edit {
        /// Target file.
        file: PathBuf,
        /// Text to replace.
        #[arg(long)]
        old: String,
        /// Replacement text.
        #[arg(long)]
        new: String,
        /// Summary shown to the reviewer.
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Replace a file's content with the content of another file.
    Write {
        /// Target file.
        file: PathBuf,
        /// File holding the new content.
        #[arg(long)]
        from: PathBuf,
        /// Summary shown to the reviewer.
        #[arg(long, default_value = "")]
        description: String,
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
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::load_default()?,
    };
    if !args.workspace.is_empty() {
        config.set_workspace_roots(args.workspace.clone())?;
    }
    info!(roots = ?config.workspace_roots, "configuration loaded");

    match args.command {
        Command::Serve => serve(Arc::new(config)).await,
        Command::Edit {
            file,
            old,
            new,
            description,
        } => {
            let bridge = AgentBridge::connect(&config).await;
            let decisions = bridge.subscribe();
            let outcome = edit_file(&bridge, &file, &old, &new, &description).await?;
            report(&bridge, &config, &file, outcome, decisions).await
        }
        Command::Write {
            file,
            from,
            description,
        } => {
            let content = std::fs::read_to_string(&from)?;
            let bridge = AgentBridge::connect(&config).await;
            let decisions = bridge.subscribe();
            let outcome = write_file(&bridge, &file, &content, &description).await?;
            report(&bridge, &config, &file, outcome, decisions).await
        }
    }
}

async fn serve(config: Arc<GlobalConfig>) -> Result<()> {
    let host = EditorHost::bind(Arc::clone(&config), FileSurface::new())?;
    let ct = host.cancel_token();

    let ctx = Arc::new(ControlContext {
        dispatcher: host.dispatcher(),
        sessions: host.sessions(),
        auth_token: Some(host.auth_token().to_owned()),
    });
    let control = spawn_control_server(ctx, &config.control_endpoint(), ct.clone())?;

    let mut terminal = match config.terminal_command.as_deref() {
        Some(command) => {
            let mut parts = command.split_whitespace().map(str::to_owned);
            match parts.next() {
                Some(program) => {
                    let rest: Vec<String> = parts.collect();
                    Some(host.spawn_terminal(&program, &rest)?)
                }
                None => None,
            }
        }
        None => None,
    };

    let host_handle = tokio::spawn(host.run());

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Some(ref mut child) = terminal {
        if let Err(err) = child.kill().await {
            warn!(%err, "failed to stop terminal process");
        }
    }
    let _ = tokio::join!(host_handle, control);
    info!("editlink shut down");
    Ok(())
}

/// Print what happened to a proposal, waiting for the reviewer if needed.
async fn report(
    bridge: &AgentBridge,
    config: &GlobalConfig,
    file: &std::path::Path,
    outcome: ProposeOutcome,
    mut decisions: broadcast::Receiver<BridgeEvent>,
) -> Result<()> {
    let target = bridge.resolve(file)?;
    match outcome {
        ProposeOutcome::Unchanged => println!("unchanged: {}", target.display()),
        ProposeOutcome::Created(path) => println!("created: {}", path.display()),
        ProposeOutcome::Applied(report) => println!(
            "applied {} edit(s) to {}",
            report.edits_applied,
            report.file.display()
        ),
        ProposeOutcome::Proposed => {
            println!("proposed: {} (awaiting review)", target.display());
            let decision = tokio::time::timeout(config.decision_timeout(), async {
                loop {
                    match decisions.recv().await {
                        Ok(BridgeEvent::Accepted {
                            file,
                            accepted,
                            rejected,
                        }) if file == target => {
                            return format!("accepted {accepted:?}, rejected {rejected:?}");
                        }
                        Ok(BridgeEvent::Rejected { file }) if file == target => {
                            return "rejected".to_owned();
                        }
                        Ok(BridgeEvent::Error {
                            message,
                            code,
                            file: Some(file),
                        }) if file == target => {
                            return format!("error ({code}): {message}");
                        }
                        Ok(BridgeEvent::Error { message, code, .. }) => {
                            warn!(%code, %message, "host error for another request");
                        }
                        Ok(BridgeEvent::Disconnected { reason }) => {
                            return format!("host disconnected: {reason}");
                        }
                        Ok(BridgeEvent::Status { message, .. }) => info!(%message, "host status"),
                        Ok(_) => {}
                        Err(err) => {
                            error!(%err, "decision stream ended");
                            return "no decision".to_owned();
                        }
                    }
                }
            })
            .await
            .unwrap_or_else(|_| "no decision before timeout".to_owned());
            println!("{decision}");
        }
    }
    bridge.close().await;
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
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

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
