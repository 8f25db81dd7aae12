//! Runs both participants and collects their outcome records.

use std::any::Any;
use std::thread;

use crossbeam_channel::bounded;
use tracing::{Dispatch, debug, dispatcher, info};

use crate::barrier::Rendezvous;
use crate::outcome::{ScenarioReport, WorkerOutcome};
use crate::participant::{LockCounts, Participant, ParticipantRun};
use crate::session::{Connection, Connector, Session, Transaction};
use crate::{ConfigError, HarnessConfig, ParticipantError, ParticipantResult, Role};

/// Name of the thread that runs the winner role.
pub const WORKER_THREAD_NAME: &str = "deadlock-winner";

/// Forces the caller's transaction into a deadlock with a worker transaction.
///
/// The caller-side participant runs on the calling thread, inside whatever
/// transaction the caller's [`Session`] already has open. The worker opens
/// its own unpooled connection through the [`Connector`] and runs in a
/// brand-new transaction that it commits only if its protocol run succeeds.
///
/// Log records go to the injected [`Dispatch`], on both threads.
pub struct DeadlockHarness {
    config: HarnessConfig,
    dispatch: Dispatch,
}

impl DeadlockHarness {
    /// Create a harness that logs to the dispatcher current at construction.
    pub fn new(config: HarnessConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            dispatch: dispatcher::get_default(Dispatch::clone),
        })
    }

    /// Log to `dispatch` instead.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run the scenario and return the caller-side result unmodified.
    ///
    /// `Err` is the expected outcome; [`crate::classify_caller`] tells a
    /// deadlock victim apart from a harness malfunction. `Ok` means the
    /// deadlock was not raised, which has already been logged as an anomaly.
    pub fn force_deadlock<S, C>(
        &self,
        caller: &mut S,
        connector: &C,
    ) -> ParticipantResult<LockCounts>
    where
        S: Session + ?Sized,
        C: Connector,
    {
        self.run_scenario(caller, connector).into_caller_result()
    }

    /// Run the scenario and return both outcome records.
    ///
    /// Blocks until the worker has been joined, on every path.
    pub fn run_scenario<S, C>(&self, caller: &mut S, connector: &C) -> ScenarioReport
    where
        S: Session + ?Sized,
        C: Connector,
    {
        dispatcher::with_default(&self.dispatch, || {
            let report = self.run_both(caller, connector);
            report.log();
            report
        })
    }

    fn run_both<S, C>(&self, caller: &mut S, connector: &C) -> ScenarioReport
    where
        S: Session + ?Sized,
        C: Connector,
    {
        let partner_wait = self.config.partner_wait();
        let rendezvous = Rendezvous::new();
        let participant = |role: Role| {
            let (own, partner) = rendezvous.signals(role);
            Participant::new(role, self.config.group(role), own, partner, partner_wait)
        };
        let victim = participant(Role::Victim);
        let winner = participant(Role::Winner);

        info!(
            victim_group = %self.config.victim_group,
            winner_group = %self.config.winner_group,
            ?partner_wait,
            "forcing deadlock"
        );

        let (result_tx, result_rx) = bounded::<ParticipantRun>(1);

        thread::scope(|scope| {
            let dispatch = self.dispatch.clone();
            let winner = &winner;
            let spawned = thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_owned())
                .spawn_scoped(scope, move || {
                    dispatcher::with_default(&dispatch, || {
                        // Capacity 1 and a single send: never blocks.
                        let _ = result_tx.send(run_winner(connector, winner));
                    });
                });

            let caller_run = victim.run(caller);

            let worker = match spawned {
                Ok(handle) => match handle.join() {
                    Ok(()) => result_rx.try_recv().map_or_else(
                        |_| WorkerOutcome::Panicked("worker exited without a result".to_owned()),
                        WorkerOutcome::Finished,
                    ),
                    Err(payload) => WorkerOutcome::Panicked(panic_message(payload.as_ref())),
                },
                Err(err) => WorkerOutcome::NotStarted(err.to_string()),
            };

            ScenarioReport {
                caller: caller_run,
                worker,
            }
        })
    }
}

/// The worker side: own connection, own transaction, commit on success.
fn run_winner<C: Connector>(connector: &C, winner: &Participant<'_>) -> ParticipantRun {
    let mut connection = match connector.connect_unpooled() {
        Ok(connection) => connection,
        Err(err) => return ParticipantRun::aborted(winner.role(), ParticipantError::Connect(err)),
    };
    let mut transaction = match connection.begin() {
        Ok(transaction) => transaction,
        Err(err) => return ParticipantRun::aborted(winner.role(), ParticipantError::Begin(err)),
    };

    let mut run = winner.run(&mut transaction);
    if run.result.is_ok() {
        match transaction.commit() {
            Ok(()) => debug!("winner transaction committed"),
            Err(err) => run.result = Err(ParticipantError::Commit(err)),
        }
    }
    run
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
