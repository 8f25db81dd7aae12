//! Deterministic two-party deadlock harness.
//!
//! Forces the caller's transaction and a worker transaction into a real lock
//! cycle so the database's deadlock detector aborts one of them, letting a
//! calling system check that it sees and classifies the victim failure.
//!
//! # Protocol
//!
//! ```text
//!   caller thread (victim, small group)     worker thread (winner, large group)
//!   ───────────────────────────────────     ───────────────────────────────────
//!   UPDATE group 1 (exclusive)              UPDATE group 3 (exclusive)
//!   release victim_done ─────────┐   ┌───── release winner_done
//!   wait winner_done  ◄──────────┼───┘
//!                                └────────► wait victim_done
//!   SELECT .. FOR SHARE (blocks on 3)       SELECT .. FOR SHARE (blocks on 1)
//!                  └────── cycle: engine aborts one side ──────┘
//! ```
//!
//! The barrier guarantees both exclusive locks are held before either shared
//! request is issued, so the two statements cannot serialize. The victim's
//! group is smaller, so an engine that aborts the transaction with the least
//! work to undo always picks the caller.
//!
//! # Usage
//!
//! ```ignore
//! use deadlock_harness::{DeadlockHarness, FailureClass, HarnessConfig, classify_caller};
//! use deadlock_harness::pg::PgConnector;
//!
//! let config = HarnessConfig::from_env()?;
//! let connector = PgConnector::new(&url, &config)?;
//! let harness = DeadlockHarness::new(config)?;
//!
//! let mut client = postgres::Client::connect(&url, postgres::NoTls)?;
//! let mut txn = client.transaction()?;
//! let result = harness.force_deadlock(&mut connector.session(&mut txn), &connector);
//!
//! assert_eq!(classify_caller(&result), FailureClass::ExpectedLockConflict);
//! ```

pub mod barrier;
mod config;
mod error;
mod orchestrator;
mod outcome;
pub mod participant;
pub mod pg;
mod role;
pub mod session;

pub use config::{
    DEFAULT_PARTNER_WAIT, DEFAULT_VICTIM_GROUP, DEFAULT_WINNER_GROUP, HarnessConfig,
    MAX_PARTNER_WAIT_MS, TableSpec,
};
pub use error::{
    BoxError, ConfigError, DbError, DbErrorKind, DbResult, ParticipantError, ParticipantResult,
};
pub use orchestrator::{DeadlockHarness, WORKER_THREAD_NAME};
pub use outcome::{FailureClass, ScenarioReport, WorkerOutcome, classify_caller};
pub use participant::{LockCounts, ParticipantRun, StepTimings};
pub use role::{Role, RowGroup, Step};
pub use session::{Connection, Connector, Session, Transaction};
