#![forbid(unsafe_code)]

pub mod config;
pub mod diff;
pub mod dispatcher;
pub mod driver;
pub mod errors;
pub mod host;
pub mod ipc;
pub mod models;
pub mod registry;
pub mod store;
pub mod surface;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
