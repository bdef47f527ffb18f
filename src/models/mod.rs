//! Domain model module declarations.

pub mod edit;
pub mod proposal;
pub mod session;

pub use edit::{Edit, Position, Range};
pub use proposal::{EditStatus, FileState, Proposal};
pub use session::{PeerIdentity, SessionId};
