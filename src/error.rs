#![forbid(unsafe_code)]

//! Caller-visible failure taxonomy shared by every engagement operation.

use thiserror::Error;

/// Primary result codes; extended codes carry them in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum EngagementError {
    /// A referenced video, comment, vote or playlist does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The caller is authenticated but does not own the resource.
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    InvalidInput(String),

    /// A write lost a race that the store could not settle by retrying.
    #[error("{0}")]
    Conflict(&'static str),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type EngagementResult<T> = Result<T, EngagementError>;

impl EngagementError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Transient failures are retried by the store instead of being surfaced.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Internal(err) => err.chain().any(|cause| {
                matches!(
                    cause.downcast_ref::<libsql::Error>(),
                    Some(libsql::Error::SqliteFailure(code, _))
                        if matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)
                )
            }),
            _ => false,
        }
    }
}

impl From<libsql::Error> for EngagementError {
    fn from(err: libsql::Error) -> Self {
        Self::Internal(err.into())
    }
}
