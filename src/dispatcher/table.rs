//! Dispatch table from inbound envelope kind to handler.
//!
//! Every envelope variant is matched explicitly. Kinds that only ever flow
//! from the host to a driver land in the default branch and are answered
//! with a protocol error; unknown `type` values never get this far because
//! the session rejects them while parsing.

use tracing::{error, info, warn};

use crate::dispatcher::{Action, Outcome};
use crate::models::{FileState, SessionId};
use crate::transport::{Envelope, StatusLevel};
use crate::AppError;

pub(crate) enum Route {
    /// Needs the transition function.
    Act(Action),
    /// Fully handled here.
    Done(Outcome),
}

pub(crate) fn route(session: &SessionId, envelope: Envelope) -> Route {
    let origin = Some(session.clone());
    match envelope {
        Envelope::ProposeDiff {
            file,
            edits,
            description,
        } => Route::Act(Action::ProposeDiff {
            origin,
            file,
            edits,
            description,
        }),
        Envelope::OpenDiff {
            file,
            before,
            after,
            description,
        } => Route::Act(Action::OpenDiff {
            origin,
            file,
            before,
            after,
            description,
        }),
        Envelope::ApplyDiff { file, edits } => Route::Act(Action::ApplyDiff {
            origin,
            file,
            edits,
        }),
        Envelope::CloseDiff { file } => Route::Act(Action::CloseDiff { file }),
        Envelope::Status { message, level } => {
            match level {
                StatusLevel::Info => info!(session_id = %session, %message, "peer status"),
                StatusLevel::Warning => warn!(session_id = %session, %message, "peer status"),
                StatusLevel::Error => error!(session_id = %session, %message, "peer status"),
            }
            Route::Done(Outcome::idle())
        }
        Envelope::Response { content } => {
            info!(session_id = %session, bytes = content.len(), "agent response");
            Route::Done(Outcome::idle())
        }
        Envelope::ToolExecuted { tool, result, .. } => {
            info!(session_id = %session, %tool, result_bytes = result.len(), "agent ran tool");
            Route::Done(Outcome::idle())
        }
        Envelope::Error { message, code, file } => {
            warn!(session_id = %session, %code, %message, ?file, "peer reported an error");
            Route::Done(Outcome::idle())
        }
        other => {
            let err = AppError::Protocol(format!(
                "{} is not accepted after the handshake",
                other.kind()
            ));
            warn!(session_id = %session, %err, "unexpected envelope");
            Route::Done(Outcome::failed(None, FileState::None, err, Some(session)))
        }
    }
}
