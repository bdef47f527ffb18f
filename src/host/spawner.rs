//! Terminal process spawner.
//!
//! Child processes inherit the host endpoint and auth token through
//! [`ENDPOINT_ENV`](crate::registry::ENDPOINT_ENV) and
//! [`TOKEN_ENV`](crate::registry::TOKEN_ENV), so a driver started inside
//! them connects without reading the rendezvous file.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, info_span};

use crate::registry::{ENDPOINT_ENV, TOKEN_ENV};
use crate::{AppError, Result};

/// Launch `program` with `args` in `cwd`, exporting `endpoint` and
/// `auth_token`.
///
/// Standard streams are inherited so the terminal stays interactive. The
/// child is killed when its handle is dropped.
///
/// # Errors
///
/// Returns `AppError::Io` if the process fails to spawn.
pub fn spawn_terminal(
    program: &str,
    args: &[String],
    cwd: &Path,
    endpoint: &str,
    auth_token: &str,
) -> Result<Child> {
    let span = info_span!("spawn_terminal", program, endpoint);
    let _guard = span.enter();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env(ENDPOINT_ENV, endpoint)
        .env(TOKEN_ENV, auth_token)
        .current_dir(cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Io(format!("failed to spawn {program}: {err}")))?;
    info!(pid = child.id(), "terminal spawned");
    Ok(child)
}
