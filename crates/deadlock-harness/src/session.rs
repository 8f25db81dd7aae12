//! Database seams the participants drive.
//!
//! The caller supplies a [`Session`] that already runs inside its own
//! transaction. The worker gets a [`Connector`], opens a fresh
//! [`Connection`] on its own thread and begins a brand-new [`Transaction`]
//! on it. Nothing here is shared between threads: every lock the two
//! participants contend on lives in the database.

use crate::{DbResult, RowGroup};

/// A transactional session a participant runs its statements on.
pub trait Session {
    /// Write every row of `group`, taking exclusive row locks.
    ///
    /// Returns the number of rows touched.
    fn lock_group_exclusive(&mut self, group: RowGroup) -> DbResult<u64>;

    /// Read the whole table under shared locks.
    ///
    /// Returns the number of rows read.
    fn lock_table_shared(&mut self) -> DbResult<u64>;
}

/// A transaction owned by the worker.
///
/// Dropping it without calling [`Transaction::commit`] rolls it back.
pub trait Transaction: Session {
    fn commit(self) -> DbResult<()>;
}

/// A physical session owned by the worker. Closed on drop.
pub trait Connection {
    type Transaction<'c>: Transaction
    where
        Self: 'c;

    /// Start a new transaction, independent of any other session.
    fn begin(&mut self) -> DbResult<Self::Transaction<'_>>;
}

/// Opens worker sessions from the caller's connection settings.
pub trait Connector: Sync {
    type Connection: Connection;

    /// Open a new physical session, bypassing any client-side pool.
    fn connect_unpooled(&self) -> DbResult<Self::Connection>;
}
