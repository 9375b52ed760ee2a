use thiserror::Error;

use super::request::{RequestKind, RequestToken};

/// Failures the transport can cause by handing back replies we never asked for.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WmError {
    #[error("No pending request for {0:?}")]
    UnknownRequest(RequestToken),
    #[error("Reply to {token:?} is a {got} reply, but a {expected} reply was expected")]
    ReplyMismatch {
        token: RequestToken,
        expected: RequestKind,
        got: RequestKind,
    },
}
