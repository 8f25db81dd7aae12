//! The symmetric participant protocol.
//!
//! Both sides run the same four steps; only the row group differs.
//!
//! 1. Exclusive-lock the participant's own group.
//! 2. Release the participant's own signal, even if step 1 failed.
//! 3. Wait, bounded, for the partner's signal.
//! 4. Shared-lock the whole table, which now needs the partner's rows.
//!
//! After step 3 both sides hold their exclusive locks, so step 4 closes a
//! cycle in the database's wait-for graph and the engine aborts one side.

use std::time::{Duration, Instant};

use tracing::{debug, error, info_span};

use crate::barrier::Signal;
use crate::{ParticipantError, ParticipantResult, Role, RowGroup, Session, Step};

/// Rows touched by each statement of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockCounts {
    pub exclusive_rows: u64,
    pub shared_rows: u64,
}

/// Timestamps of a participant run.
#[derive(Debug, Clone, Copy)]
pub struct StepTimings {
    pub started: Instant,
    /// Step 1 returned, successfully or not.
    pub exclusive_done: Option<Instant>,
    /// Step 4 was issued.
    pub shared_started: Option<Instant>,
    pub finished: Option<Instant>,
}

impl StepTimings {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            exclusive_done: None,
            shared_started: None,
            finished: None,
        }
    }

    /// Wall time of the run, once finished.
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished.map(|end| end.duration_since(self.started))
    }
}

/// The outcome record of one participant.
#[derive(Debug)]
pub struct ParticipantRun {
    pub role: Role,
    pub result: ParticipantResult<LockCounts>,
    pub timings: StepTimings,
}

impl ParticipantRun {
    /// A run that failed before reaching step 1.
    pub(crate) fn aborted(role: Role, error: ParticipantError) -> Self {
        let mut timings = StepTimings::start();
        timings.finished = Some(timings.started);
        Self {
            role,
            result: Err(error),
            timings,
        }
    }
}

/// One side of the rendezvous.
pub struct Participant<'a> {
    role: Role,
    group: RowGroup,
    own: &'a Signal,
    partner: &'a Signal,
    partner_wait: Duration,
}

impl<'a> Participant<'a> {
    pub fn new(
        role: Role,
        group: RowGroup,
        own: &'a Signal,
        partner: &'a Signal,
        partner_wait: Duration,
    ) -> Self {
        Self {
            role,
            group,
            own,
            partner,
            partner_wait,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Run the protocol against `session`.
    ///
    /// The own signal is released exactly once, whatever happens.
    pub fn run<S: Session + ?Sized>(&self, session: &mut S) -> ParticipantRun {
        let span = info_span!("participant", role = %self.role, group = %self.group);
        let _enter = span.enter();

        let mut timings = StepTimings::start();
        let result = self.drive(session, &mut timings);
        timings.finished = Some(Instant::now());

        ParticipantRun {
            role: self.role,
            result,
            timings,
        }
    }

    fn drive<S: Session + ?Sized>(
        &self,
        session: &mut S,
        timings: &mut StepTimings,
    ) -> ParticipantResult<LockCounts> {
        let exclusive_rows = {
            let _done = self.own.release_on_drop();
            let locked = session.lock_group_exclusive(self.group);
            timings.exclusive_done = Some(Instant::now());
            locked.map_err(|source| ParticipantError::at_step(Step::ExclusiveLock, source))?
        };
        debug!(rows = exclusive_rows, "exclusive lock held, signalled partner");

        if let Err(timed_out) = self.partner.wait(self.partner_wait) {
            error!(waited = ?timed_out.waited, "partner never finished its exclusive lock");
            return Err(ParticipantError::PartnerTimeout {
                role: self.role,
                waited: timed_out.waited,
            });
        }
        debug!("partner holds its exclusive lock, requesting shared lock");

        timings.shared_started = Some(Instant::now());
        let shared_rows = session
            .lock_table_shared()
            .map_err(|source| ParticipantError::at_step(Step::SharedLock, source))?;
        debug!(rows = shared_rows, "shared lock granted");

        Ok(LockCounts {
            exclusive_rows,
            shared_rows,
        })
    }
}
