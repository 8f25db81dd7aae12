//! Outcome classification and reporting.
//!
//! The caller-side result is the harness's output and is never altered. The
//! worker-side result only ever reaches the log.

use core::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::participant::{LockCounts, ParticipantRun};
use crate::{ParticipantError, ParticipantResult};

/// How a participant's result reads against the scenario's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Chosen as deadlock victim. The intended outcome on the caller path;
    /// on the worker it means the engine swapped the roles.
    ExpectedLockConflict,
    /// The partner never finished its first statement. Harness malfunction.
    PartnerTimeout,
    /// The worker failed for a reason other than the intended deadlock.
    UnexpectedWinnerFailure,
    /// The caller path failed for a reason other than locking.
    UnexpectedCallerFailure,
    /// The caller path succeeded: the expected deadlock was not raised.
    SilentSuccess,
}

impl FailureClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExpectedLockConflict => "expected_lock_conflict",
            Self::PartnerTimeout => "partner_timeout",
            Self::UnexpectedWinnerFailure => "unexpected_winner_failure",
            Self::UnexpectedCallerFailure => "unexpected_caller_failure",
            Self::SilentSuccess => "silent_success",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the caller-side result.
pub fn classify_caller(result: &ParticipantResult<LockCounts>) -> FailureClass {
    match result {
        Ok(_) => FailureClass::SilentSuccess,
        Err(err) if err.is_lock_conflict() => FailureClass::ExpectedLockConflict,
        Err(ParticipantError::PartnerTimeout { .. }) => FailureClass::PartnerTimeout,
        Err(_) => FailureClass::UnexpectedCallerFailure,
    }
}

/// What became of the worker thread.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The worker ran to completion and sent its record.
    Finished(ParticipantRun),
    /// The worker thread panicked before sending a record.
    Panicked(String),
    /// The worker thread could not be spawned.
    NotStarted(String),
}

impl WorkerOutcome {
    /// `None` when the worker committed.
    ///
    /// A worker refused by the lock manager is `ExpectedLockConflict`: the
    /// deadlock happened, but the engine aborted the worker instead of the
    /// caller.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Finished(run) => match &run.result {
                Ok(_) => None,
                Err(err) if err.is_lock_conflict() => Some(FailureClass::ExpectedLockConflict),
                Err(ParticipantError::PartnerTimeout { .. }) => Some(FailureClass::PartnerTimeout),
                Err(_) => Some(FailureClass::UnexpectedWinnerFailure),
            },
            Self::Panicked(_) | Self::NotStarted(_) => Some(FailureClass::UnexpectedWinnerFailure),
        }
    }

    pub fn run(&self) -> Option<&ParticipantRun> {
        match self {
            Self::Finished(run) => Some(run),
            Self::Panicked(_) | Self::NotStarted(_) => None,
        }
    }

    pub fn committed(&self) -> bool {
        self.run().is_some_and(|run| run.result.is_ok())
    }
}

/// Both outcome records of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub caller: ParticipantRun,
    pub worker: WorkerOutcome,
}

impl ScenarioReport {
    pub fn caller_class(&self) -> FailureClass {
        classify_caller(&self.caller.result)
    }

    /// How many participants the lock manager refused.
    pub fn lock_conflicts(&self) -> usize {
        let caller = usize::from(
            self.caller
                .result
                .as_ref()
                .is_err_and(ParticipantError::is_lock_conflict),
        );
        let worker = usize::from(self.worker.run().is_some_and(|run| {
            run.result
                .as_ref()
                .is_err_and(ParticipantError::is_lock_conflict)
        }));
        caller + worker
    }

    /// Log the worker's result and any caller-side anomaly.
    pub(crate) fn log(&self) {
        match &self.worker {
            WorkerOutcome::Finished(run) => match &run.result {
                Ok(counts) => info!(
                    exclusive_rows = counts.exclusive_rows,
                    shared_rows = counts.shared_rows,
                    "winner committed"
                ),
                Err(err) => warn!(
                    error = %err,
                    class = ?self.worker.failure_class(),
                    "winner thread failed"
                ),
            },
            WorkerOutcome::Panicked(message) => warn!(panic = %message, "winner thread panicked"),
            WorkerOutcome::NotStarted(message) => {
                warn!(error = %message, "winner thread could not be spawned");
            }
        }

        if self.caller.result.is_ok() {
            warn!(
                class = %FailureClass::SilentSuccess,
                "expected a deadlock for the victim, but it was not raised"
            );
        }
    }

    /// The caller-side result, untouched.
    pub fn into_caller_result(self) -> ParticipantResult<LockCounts> {
        self.caller.result
    }
}
