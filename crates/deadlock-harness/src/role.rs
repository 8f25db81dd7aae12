//! Participant roles, row groups and protocol steps.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A partition key over the shared table.
///
/// The victim locks the small group and the winner the large one, so an
/// engine that aborts the transaction with the least work to undo picks the
/// victim every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowGroup(pub i32);

impl fmt::Display for RowGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the deadlock a participant is meant to end up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Runs on the caller's thread inside the caller's transaction.
    Victim,
    /// Runs on the worker thread inside its own transaction.
    Winner,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Victim => "victim",
            Self::Winner => "winner",
        }
    }

    #[must_use]
    pub const fn partner(self) -> Self {
        match self {
            Self::Victim => Self::Winner,
            Self::Winner => Self::Victim,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statement of the participant protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Write-style update of every row in the participant's group.
    ExclusiveLock,
    /// Read-style scan of the whole table under share locks.
    SharedLock,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExclusiveLock => "exclusive lock",
            Self::SharedLock => "shared lock",
        })
    }
}
