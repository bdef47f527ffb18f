//! Local IPC layer for `editlink-ctl` interaction.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line commands from the companion CLI.

pub mod server;

pub use server::{spawn_control_server, ControlContext};
