//! Rendezvous barrier between the two participants.
//!
//! Each participant owns one [`Signal`] and waits on its partner's. A signal
//! is a counting semaphore that starts at zero, is released once when the
//! owner's first statement has finished (successfully or not), and is waited
//! on once with a bound. Signals live for exactly one run.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::Role;

/// The bounded wait on a [`Signal`] ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("signal not released within {waited:?}")]
pub struct WaitTimedOut {
    pub waited: Duration,
}

/// One-shot, bounded-wait counting signal.
#[derive(Debug, Default)]
pub struct Signal {
    permits: Mutex<u32>,
    released: Condvar,
}

impl Signal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permit and wake a waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.released.notify_one();
    }

    /// Take one permit, blocking for at most `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<(), WaitTimedOut> {
        let deadline = Instant::now().checked_add(timeout);
        let mut permits = self.permits.lock();

        while *permits == 0 {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut permits, deadline).timed_out() && *permits == 0
                    {
                        return Err(WaitTimedOut { waited: timeout });
                    }
                }
                None => self.released.wait(&mut permits),
            }
        }

        *permits -= 1;
        Ok(())
    }

    /// Permits currently available.
    pub fn available(&self) -> u32 {
        *self.permits.lock()
    }

    /// Release this signal when the returned guard drops.
    pub fn release_on_drop(&self) -> ReleaseGuard<'_> {
        ReleaseGuard { signal: self }
    }
}

/// Releases its signal on every exit path of the enclosing scope.
#[must_use = "the signal is released when the guard drops"]
pub struct ReleaseGuard<'a> {
    signal: &'a Signal,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.signal.release();
    }
}

/// The signal pair for one run.
#[derive(Debug, Default)]
pub struct Rendezvous {
    victim_done: Signal,
    winner_done: Signal,
}

impl Rendezvous {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(own, partner)` signals for `role`.
    pub fn signals(&self, role: Role) -> (&Signal, &Signal) {
        match role {
            Role::Victim => (&self.victim_done, &self.winner_done),
            Role::Winner => (&self.winner_done, &self.victim_done),
        }
    }
}
