//! PostgreSQL backend.
//!
//! The exclusive step updates the role's group; the shared step takes
//! `FOR SHARE` row locks on the whole table, which blocks on the partner's
//! updated rows. PostgreSQL reports the resulting cycle as SQLSTATE `40P01`
//! on one of the two sessions.
//!
//! PostgreSQL picks the victim by which backend's `deadlock_timeout` fires
//! first, not by undo cost, so the row-group bias is advisory here. Exactly
//! one side still fails.

use std::str::FromStr;
use std::sync::Arc;

use postgres::{Client, Config, GenericClient, NoTls};

use crate::session::{Connection, Connector, Session, Transaction};
use crate::{
    DbError, DbErrorKind, DbResult, HarnessConfig, MAX_PARTNER_WAIT_MS, RowGroup, TableSpec,
};

/// Statements for a validated [`TableSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSql {
    exclusive: String,
    shared: String,
}

impl LockSql {
    /// Build the statements. Identifiers must already be validated.
    pub fn new(table: &TableSpec) -> Self {
        let TableSpec {
            name,
            group_column,
            data_column,
        } = table;

        Self {
            exclusive: format!(
                "UPDATE {name} SET {data_column} = md5(random()::text) WHERE {group_column} = $1"
            ),
            shared: format!("SELECT count(*) FROM (SELECT 1 FROM {name} FOR SHARE) AS locked"),
        }
    }

    pub fn exclusive(&self) -> &str {
        &self.exclusive
    }

    pub fn shared(&self) -> &str {
        &self.shared
    }
}

/// Map a SQLSTATE to the harness's error kinds.
pub fn kind_for_sqlstate(code: &str) -> DbErrorKind {
    match code {
        "40P01" => DbErrorKind::Deadlock,
        "55P03" => DbErrorKind::LockTimeout,
        _ if code.starts_with("08") || code.starts_with("57P") => DbErrorKind::Connection,
        _ => DbErrorKind::Other,
    }
}

/// Convert a driver error, keeping the SQLSTATE and the driver error as source.
pub fn classify(err: postgres::Error) -> DbError {
    let code = err.code().map(|state| state.code().to_owned());
    let kind = match &code {
        Some(code) => kind_for_sqlstate(code),
        None if err.is_closed() => DbErrorKind::Connection,
        None if is_io(&err) => DbErrorKind::Connection,
        None => DbErrorKind::Other,
    };
    let message = err
        .as_db_error()
        .map_or_else(|| err.to_string(), |db| db.message().to_owned());

    let mut db_err = DbError::new(kind, message);
    if let Some(code) = code {
        db_err = db_err.with_code(code);
    }
    db_err.with_source(err)
}

fn is_io(err: &postgres::Error) -> bool {
    std::error::Error::source(err).is_some_and(|source| source.is::<std::io::Error>())
}

fn lock_group<C: GenericClient>(client: &mut C, sql: &LockSql, group: RowGroup) -> DbResult<u64> {
    client.execute(sql.exclusive(), &[&group.0]).map_err(classify)
}

fn lock_table<C: GenericClient>(client: &mut C, sql: &LockSql) -> DbResult<u64> {
    let row = client.query_one(sql.shared(), &[]).map_err(classify)?;
    let count: i64 = row.try_get(0).map_err(classify)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Opens worker sessions from the caller's connection string.
///
/// The client keeps no pool, so every [`Connector::connect_unpooled`] call
/// is a fresh backend process.
pub struct PgConnector {
    config: Config,
    sql: Arc<LockSql>,
    lock_timeout_ms: u64,
}

impl PgConnector {
    pub fn new(connection_string: &str, harness: &HarnessConfig) -> DbResult<Self> {
        let mut config = Config::from_str(connection_string).map_err(classify)?;
        config.application_name(&harness.worker_application_name);

        Ok(Self {
            config,
            sql: Arc::new(LockSql::new(&harness.table)),
            lock_timeout_ms: harness.partner_wait_ms.min(MAX_PARTNER_WAIT_MS),
        })
    }

    fn set_lock_timeout(&self) -> String {
        format!("SET lock_timeout = {}", self.lock_timeout_ms)
    }

    /// Wrap the caller's open client or transaction as the victim's session.
    pub fn session<'a, C: GenericClient>(&self, client: &'a mut C) -> PgSession<'a, C> {
        PgSession {
            client,
            sql: Arc::clone(&self.sql),
        }
    }
}

impl Connector for PgConnector {
    type Connection = PgConnection;

    fn connect_unpooled(&self) -> DbResult<PgConnection> {
        let mut client = self.config.connect(NoTls).map_err(classify)?;
        // Bounds the worker's waits if the caller's transaction never lets go.
        client
            .batch_execute(&self.set_lock_timeout())
            .map_err(classify)?;

        Ok(PgConnection {
            client,
            sql: Arc::clone(&self.sql),
        })
    }
}

/// The worker's own backend session.
pub struct PgConnection {
    client: Client,
    sql: Arc<LockSql>,
}

impl Connection for PgConnection {
    type Transaction<'c>
        = PgTransaction<'c>
    where
        Self: 'c;

    fn begin(&mut self) -> DbResult<PgTransaction<'_>> {
        let txn = self.client.transaction().map_err(classify)?;
        Ok(PgTransaction {
            txn,
            sql: Arc::clone(&self.sql),
        })
    }
}

/// The worker's transaction. Rolled back on drop unless committed.
pub struct PgTransaction<'c> {
    txn: postgres::Transaction<'c>,
    sql: Arc<LockSql>,
}

impl Session for PgTransaction<'_> {
    fn lock_group_exclusive(&mut self, group: RowGroup) -> DbResult<u64> {
        lock_group(&mut self.txn, &self.sql, group)
    }

    fn lock_table_shared(&mut self) -> DbResult<u64> {
        lock_table(&mut self.txn, &self.sql)
    }
}

impl Transaction for PgTransaction<'_> {
    fn commit(self) -> DbResult<()> {
        self.txn.commit().map_err(classify)
    }
}

/// The caller's session. Whether its transaction commits is the caller's call.
pub struct PgSession<'a, C> {
    client: &'a mut C,
    sql: Arc<LockSql>,
}

impl<C: GenericClient> Session for PgSession<'_, C> {
    fn lock_group_exclusive(&mut self, group: RowGroup) -> DbResult<u64> {
        lock_group(&mut *self.client, &self.sql, group)
    }

    fn lock_table_shared(&mut self) -> DbResult<u64> {
        lock_table(&mut *self.client, &self.sql)
    }
}
