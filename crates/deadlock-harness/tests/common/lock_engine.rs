//! In-memory row lock manager with deadlock detection.
//!
//! Rows carry a group id. Transactions take exclusive locks on a group and
//! shared locks on the whole table, all-or-nothing. A request that would
//! block records who it waits for; if that closes a cycle, the transaction
//! in the cycle with the fewest rows to undo is aborted (ties go to the
//! requester), its locks are released and every waiter re-checks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use deadlock_harness::{
    Connection, Connector, DbError, DbErrorKind, DbResult, RowGroup, Session, Transaction,
};
use parking_lot::{Condvar, Mutex};

pub type TxnId = u64;

#[derive(Clone, Copy)]
enum Mode {
    Exclusive,
    Shared,
}

#[derive(Default)]
struct TxnState {
    undo_rows: u64,
    waiting_for: Vec<TxnId>,
    aborted: bool,
}

#[derive(Default)]
struct State {
    row_groups: Vec<i32>,
    exclusive: HashMap<usize, TxnId>,
    shared: HashMap<usize, HashSet<TxnId>>,
    txns: HashMap<TxnId, TxnState>,
    next_txn: TxnId,
}

impl State {
    fn rows_in(&self, group: i32) -> Vec<usize> {
        self.row_groups
            .iter()
            .enumerate()
            .filter_map(|(row, g)| (*g == group).then_some(row))
            .collect()
    }

    fn blockers(&self, txn: TxnId, rows: &[usize], mode: Mode) -> Vec<TxnId> {
        let mut blockers = HashSet::new();
        for row in rows {
            if let Some(&holder) = self.exclusive.get(row) {
                if holder != txn {
                    blockers.insert(holder);
                }
            }
            if let Mode::Exclusive = mode {
                if let Some(readers) = self.shared.get(row) {
                    blockers.extend(readers.iter().copied().filter(|&reader| reader != txn));
                }
            }
        }
        blockers.into_iter().collect()
    }

    fn grant(&mut self, txn: TxnId, rows: &[usize], mode: Mode) {
        for &row in rows {
            match mode {
                Mode::Exclusive => {
                    self.exclusive.insert(row, txn);
                }
                Mode::Shared => {
                    self.shared.entry(row).or_default().insert(txn);
                }
            }
        }
        if let Some(state) = self.txns.get_mut(&txn) {
            state.waiting_for.clear();
            if let Mode::Exclusive = mode {
                state.undo_rows += rows.len() as u64;
            }
        }
    }

    /// Transactions on a wait-for path from `start` back to itself.
    fn find_cycle(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut seen = HashSet::new();
        let mut stack = vec![vec![start]];

        while let Some(path) = stack.pop() {
            let node = *path.last()?;
            let Some(state) = self.txns.get(&node) else {
                continue;
            };
            for &next in &state.waiting_for {
                if next == start {
                    return Some(path);
                }
                if seen.insert(next) {
                    let mut extended = path.clone();
                    extended.push(next);
                    stack.push(extended);
                }
            }
        }
        None
    }

    fn pick_victim(&self, requester: TxnId, cycle: &[TxnId]) -> TxnId {
        cycle
            .iter()
            .copied()
            .min_by_key(|id| {
                let undo = self.txns.get(id).map_or(0, |state| state.undo_rows);
                (undo, u8::from(*id != requester))
            })
            .unwrap_or(requester)
    }

    fn release(&mut self, txn: TxnId) {
        self.exclusive.retain(|_, holder| *holder != txn);
        for readers in self.shared.values_mut() {
            readers.remove(&txn);
        }
    }
}

/// A shared table plus its lock manager.
#[derive(Default)]
pub struct LockEngine {
    state: Mutex<State>,
    changed: Condvar,
    open_connections: AtomicUsize,
    deadlocks: AtomicUsize,
    commits: AtomicUsize,
}

impl LockEngine {
    /// A table seeded with `(group, rows)` pairs.
    pub fn seeded(groups: &[(i32, usize)]) -> Arc<Self> {
        let engine = Self::default();
        {
            let mut state = engine.state.lock();
            for &(group, rows) in groups {
                state.row_groups.extend(std::iter::repeat_n(group, rows));
            }
        }
        Arc::new(engine)
    }

    /// The default 10 / 100 split between groups 1 and 3.
    pub fn biased() -> Arc<Self> {
        Self::seeded(&[(1, 10), (3, 100)])
    }

    pub fn begin(self: &Arc<Self>) -> EngineTxn {
        let mut state = self.state.lock();
        state.next_txn += 1;
        let id = state.next_txn;
        state.txns.insert(id, TxnState::default());
        EngineTxn {
            engine: Arc::clone(self),
            id,
            finished: false,
        }
    }

    pub fn connector(self: &Arc<Self>) -> EngineConnector {
        EngineConnector {
            engine: Arc::clone(self),
        }
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    pub fn active_transactions(&self) -> usize {
        self.state.lock().txns.len()
    }

    pub fn held_locks(&self) -> usize {
        let state = self.state.lock();
        state.exclusive.len() + state.shared.values().map(HashSet::len).sum::<usize>()
    }

    pub fn deadlocks(&self) -> usize {
        self.deadlocks.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn acquire(&self, txn: TxnId, group: Option<i32>, mode: Mode) -> DbResult<u64> {
        let mut state = self.state.lock();
        let rows = match group {
            Some(group) => state.rows_in(group),
            None => (0..state.row_groups.len()).collect(),
        };

        loop {
            if state.txns.get(&txn).is_none_or(|t| t.aborted) {
                return Err(DbError::deadlock(format!(
                    "transaction {txn} was chosen as deadlock victim"
                ))
                .with_code("40P01"));
            }

            let blockers = state.blockers(txn, &rows, mode);
            if blockers.is_empty() {
                state.grant(txn, &rows, mode);
                return Ok(rows.len() as u64);
            }

            if let Some(waiter) = state.txns.get_mut(&txn) {
                waiter.waiting_for = blockers;
            }

            if let Some(cycle) = state.find_cycle(txn) {
                let victim = state.pick_victim(txn, &cycle);
                state.release(victim);
                if let Some(victim) = state.txns.get_mut(&victim) {
                    victim.aborted = true;
                    victim.waiting_for.clear();
                }
                self.deadlocks.fetch_add(1, Ordering::SeqCst);
                self.changed.notify_all();
                continue;
            }

            self.changed.wait(&mut state);
        }
    }

    fn finish(&self, txn: TxnId, commit: bool) -> DbResult<()> {
        let mut state = self.state.lock();
        state.release(txn);
        let aborted = state.txns.remove(&txn).is_some_and(|t| t.aborted);
        self.changed.notify_all();

        if commit && aborted {
            return Err(DbError::new(
                DbErrorKind::Other,
                format!("transaction {txn} was aborted"),
            ));
        }
        if commit {
            self.commits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A transaction on the engine. Rolls back on drop.
pub struct EngineTxn {
    engine: Arc<LockEngine>,
    id: TxnId,
    finished: bool,
}

impl EngineTxn {
    pub fn id(&self) -> TxnId {
        self.id
    }
}

impl Session for EngineTxn {
    fn lock_group_exclusive(&mut self, group: RowGroup) -> DbResult<u64> {
        self.engine.acquire(self.id, Some(group.0), Mode::Exclusive)
    }

    fn lock_table_shared(&mut self) -> DbResult<u64> {
        self.engine.acquire(self.id, None, Mode::Shared)
    }
}

impl Transaction for EngineTxn {
    fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        self.engine.finish(self.id, true)
    }
}

impl Drop for EngineTxn {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.engine.finish(self.id, false);
        }
    }
}

/// Opens counted connections on the engine.
pub struct EngineConnector {
    engine: Arc<LockEngine>,
}

impl Connector for EngineConnector {
    type Connection = EngineConnection;

    fn connect_unpooled(&self) -> DbResult<EngineConnection> {
        self.engine.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(EngineConnection {
            engine: Arc::clone(&self.engine),
        })
    }
}

pub struct EngineConnection {
    engine: Arc<LockEngine>,
}

impl Connection for EngineConnection {
    type Transaction<'c>
        = EngineTxn
    where
        Self: 'c;

    fn begin(&mut self) -> DbResult<EngineTxn> {
        Ok(self.engine.begin())
    }
}

impl Drop for EngineConnection {
    fn drop(&mut self) {
        self.engine.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}
