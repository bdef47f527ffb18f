//! Terminal-driver side of the bridge.
//!
//! [`AgentBridge`] connects an agent process to an editor host, or stands in
//! for one by editing files directly. [`tools`] maps the agent's file tools
//! onto it.

pub mod bridge;
pub mod tools;

pub use bridge::{AgentBridge, BridgeEvent, BridgeMode, ProposeOutcome};
