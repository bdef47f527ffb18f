#![forbid(unsafe_code)]

//! `editlink-ctl`: review pending proposals from the command line.
//!
//! Connects to the host's control socket and sends one JSON command per
//! invocation. Decisions are reported to the proposing agent exactly as if
//! they had been made in the editor.
//!
//! Every request carries the host's auth token: `--token`, else
//! `EDITLINK_TOKEN`, else the token in the host's rendezvous record.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use editlink::config::GlobalConfig;
use editlink::registry::TOKEN_ENV;
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "editlink-ctl",
    about = "Review pending editlink proposals",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file the host was started with.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host endpoint; defaults to the configured `endpoint`.
    ///
    /// The control socket is this name with a `-ctl` suffix.
    #[arg(long)]
    endpoint: Option<String>,

    /// Auth token of the running host.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List pending proposals.
    List,

    /// Show a proposal with its edits and annotations.
    Show {
        /// Target file.
        file: PathBuf,
    },

    /// Accept every pending edit for a file.
    Accept {
        /// Target file.
        file: PathBuf,
    },

    /// Reject every pending edit for a file.
    Reject {
        /// Target file.
        file: PathBuf,
    },

    /// Accept a single edit.
    AcceptEdit {
        /// Target file.
        file: PathBuf,
        /// Edit index within the proposal.
        index: usize,
    },

    /// Reject a single edit.
    RejectEdit {
        /// Target file.
        file: PathBuf,
        /// Edit index within the proposal.
        index: usize,
    },

    /// Drop the proposal without notifying the agent.
    Close {
        /// Target file.
        file: PathBuf,
    },
}

/// Make relative paths absolute against the current directory so the host
/// resolves them the way the user sees them.
fn absolute(file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| file.to_path_buf(), |cwd| cwd.join(file))
}

/// Reply line written by the host's control server.
#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl Command {
    fn to_request(&self, auth_token: Option<&str>) -> Value {
        let mut request = self.body();
        if let Some(token) = auth_token {
            request["auth_token"] = json!(token);
        }
        request
    }

    fn body(&self) -> Value {
        match self {
            Self::List => json!({ "command": "list" }),
            Self::Show { file } => json!({ "command": "show", "file": absolute(file) }),
            Self::Accept { file } => json!({ "command": "accept", "file": absolute(file) }),
            Self::Reject { file } => json!({ "command": "reject", "file": absolute(file) }),
            Self::Close { file } => json!({ "command": "close", "file": absolute(file) }),
            Self::AcceptEdit { file, index } => {
                json!({ "command": "accept-edit", "file": absolute(file), "index": index })
            }
            Self::RejectEdit { file, index } => {
                json!({ "command": "reject-edit", "file": absolute(file), "index": index })
            }
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    let loaded = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path),
        None => GlobalConfig::load_default(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let endpoint = args.endpoint.clone().unwrap_or_else(|| config.endpoint.clone());
    let control_name = format!("{endpoint}-ctl");
    let token = resolve_token(args.token.clone(), &config, &endpoint);

    let reply = match round_trip(&control_name, &args.command.to_request(token.as_deref())) {
        Ok(reply) => reply,
        Err(err) => {
            eprintln!("cannot reach editlink host on '{control_name}': {err}");
            eprintln!("is `editlink serve` running with endpoint '{endpoint}'?");
            return ExitCode::FAILURE;
        }
    };

    if !reply.ok {
        eprintln!(
            "error: {}",
            reply.error.as_deref().unwrap_or("host gave no reason")
        );
        return ExitCode::FAILURE;
    }
    match reply.data {
        Some(data) => match serde_json::to_string_pretty(&data) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{data}"),
        },
        None => println!("ok"),
    }
    ExitCode::SUCCESS
}

/// The token to present: explicit, inherited, or read from the record the
/// host published for `endpoint`.
fn resolve_token(explicit: Option<String>, config: &GlobalConfig, endpoint: &str) -> Option<String> {
    if explicit.is_some() {
        return explicit;
    }
    if let Some(token) = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()) {
        return Some(token);
    }
    let record = config.registry().ok()?.read()?;
    if record.endpoint == endpoint {
        record.auth_token
    } else {
        None
    }
}

/// Send one request line and read one reply line.
fn round_trip(control_name: &str, request: &Value) -> Result<Reply, Box<dyn std::error::Error>> {
    let name = control_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    writeln!(stream, "{request}")?;
    stream.flush()?;

    let mut line = String::new();
    BufReader::new(&stream).read_line(&mut line)?;
    if line.trim().is_empty() {
        return Err("host closed the connection without replying".into());
    }
    Ok(serde_json::from_str(line.trim())?)
}
