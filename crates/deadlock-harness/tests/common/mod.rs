//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

pub mod lock_engine;

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use deadlock_harness::{
    Connection, Connector, DbError, DbErrorKind, DbResult, HarnessConfig, RowGroup, Session,
    Transaction,
};
use parking_lot::Mutex;
use tracing::Dispatch;

/// Short bound so failure-path tests finish quickly.
pub const SHORT_PARTNER_WAIT: Duration = Duration::from_millis(400);

/// Roomy bound for runs where both participants are healthy.
pub fn scenario_config() -> HarnessConfig {
    HarnessConfig::default().with_partner_wait(Duration::from_secs(10))
}

pub fn short_wait_config() -> HarnessConfig {
    HarnessConfig::default().with_partner_wait(SHORT_PARTNER_WAIT)
}

/// Collects formatted log output from an injected dispatcher.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn dispatch(&self) -> Dispatch {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Session whose statements always succeed immediately.
#[derive(Default)]
pub struct QuietSession {
    pub delay_exclusive: Duration,
    pub statements: usize,
}

impl QuietSession {
    pub fn hanging(delay: Duration) -> Self {
        Self {
            delay_exclusive: delay,
            statements: 0,
        }
    }
}

impl Session for QuietSession {
    fn lock_group_exclusive(&mut self, _group: RowGroup) -> DbResult<u64> {
        std::thread::sleep(self.delay_exclusive);
        self.statements += 1;
        Ok(0)
    }

    fn lock_table_shared(&mut self) -> DbResult<u64> {
        self.statements += 1;
        Ok(0)
    }
}

impl Transaction for QuietSession {
    fn commit(self) -> DbResult<()> {
        Ok(())
    }
}

/// How a [`StubConnector`] behaves when the worker connects.
#[derive(Clone, Copy)]
pub enum StubBehavior {
    /// Sessions never conflict; the exclusive step sleeps first.
    Quiet(Duration),
    /// The connection attempt is refused.
    Refuse,
    /// The worker thread panics while holding a fresh connection.
    Panic,
}

/// Hands out [`QuietSession`] transactions and counts live connections.
pub struct StubConnector {
    behavior: StubBehavior,
    open: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl StubConnector {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            open: Arc::default(),
            opened: AtomicUsize::new(0),
        }
    }

    /// Connections not yet dropped.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Connections ever handed out.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn open(&self, delay: Duration) -> StubConnection {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        StubConnection {
            delay,
            open: Arc::clone(&self.open),
        }
    }
}

impl Connector for StubConnector {
    type Connection = StubConnection;

    fn connect_unpooled(&self) -> DbResult<StubConnection> {
        match self.behavior {
            StubBehavior::Quiet(delay) => Ok(self.open(delay)),
            StubBehavior::Refuse => Err(DbError::new(
                DbErrorKind::Connection,
                "connection refused",
            )),
            StubBehavior::Panic => {
                let _connection = self.open(Duration::ZERO);
                panic!("worker exploded while connecting");
            }
        }
    }
}

pub struct StubConnection {
    delay: Duration,
    open: Arc<AtomicUsize>,
}

impl Connection for StubConnection {
    type Transaction<'c>
        = QuietSession
    where
        Self: 'c;

    fn begin(&mut self) -> DbResult<QuietSession> {
        Ok(QuietSession::hanging(self.delay))
    }
}

impl Drop for StubConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
