//! Harness error types.

use std::time::Duration;

use thiserror::Error;

use crate::{Role, Step};

/// Boxed error from a database driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The engine chose this transaction as deadlock victim.
    Deadlock,
    /// A lock could not be acquired within the engine's lock timeout.
    LockTimeout,
    /// The session is closed or the transport failed.
    Connection,
    /// Anything else the engine reported.
    Other,
}

/// A failure reported by a database backend.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct DbError {
    kind: DbErrorKind,
    message: String,
    code: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl DbError {
    /// Create an error without an underlying driver error.
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Shorthand for a deadlock-victim error.
    pub fn deadlock(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Deadlock, message)
    }

    /// Attach the engine's error code (SQLSTATE for PostgreSQL).
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach the underlying driver error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> DbErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Whether the engine refused a lock (deadlock victim or lock timeout).
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self.kind, DbErrorKind::Deadlock | DbErrorKind::LockTimeout)
    }
}

/// Result type for backend operations.
pub type DbResult<T> = Result<T, DbError>;

/// A failed participant run.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// A statement was refused by the engine's lock manager.
    #[error("{step} was refused by the lock manager: {source}")]
    LockConflict {
        step: Step,
        #[source]
        source: DbError,
    },

    /// The partner never signalled completion of its first statement.
    #[error("{role} waited {waited:?} for partner to complete its exclusive lock")]
    PartnerTimeout { role: Role, waited: Duration },

    /// A statement failed for a reason unrelated to locking.
    #[error("{step} failed: {source}")]
    Statement {
        step: Step,
        #[source]
        source: DbError,
    },

    /// The worker could not open its own session.
    #[error("failed to open worker session: {0}")]
    Connect(#[source] DbError),

    /// The worker could not start its own transaction.
    #[error("failed to begin worker transaction: {0}")]
    Begin(#[source] DbError),

    /// The worker's transaction did not commit.
    #[error("failed to commit worker transaction: {0}")]
    Commit(#[source] DbError),
}

impl ParticipantError {
    /// Wrap a statement failure, separating lock refusals from other errors.
    pub fn at_step(step: Step, source: DbError) -> Self {
        if source.is_lock_conflict() {
            Self::LockConflict { step, source }
        } else {
            Self::Statement { step, source }
        }
    }

    /// Whether this failure came from the engine's lock manager.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// The database error underneath, if any.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            Self::LockConflict { source, .. } | Self::Statement { source, .. } => Some(source),
            Self::Connect(source) | Self::Begin(source) | Self::Commit(source) => Some(source),
            Self::PartnerTimeout { .. } => None,
        }
    }
}

/// Result type for a participant run.
pub type ParticipantResult<T> = Result<T, ParticipantError>;

/// Invalid harness configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Identifier would not be safe to splice into SQL.
    #[error("invalid SQL identifier for {field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    /// Both roles would lock the same rows.
    #[error("victim and winner share row group {0}")]
    SameGroup(i32),

    /// A zero wait bound can never be met.
    #[error("partner wait must be greater than zero")]
    ZeroPartnerWait,

    /// Longer than the backend accepts as a lock timeout.
    #[error(
        "partner wait of {0} ms exceeds the {max} ms maximum",
        max = crate::MAX_PARTNER_WAIT_MS
    )]
    PartnerWaitTooLong(u64),

    /// An environment override did not parse.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
