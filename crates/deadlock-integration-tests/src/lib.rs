//! Live PostgreSQL fixture for the deadlock harness.
//!
//! Tests in this crate talk to a real server and only run when
//! `DEADLOCK_INTEGRATION_TESTS` is set. The server is taken from
//! `DEADLOCK_DATABASE_URL`.
//!
//! # Example
//!
//! ```rust,ignore
//! use deadlock_integration_tests::{Fixture, SeedPlan, database_url, is_enabled};
//!
//! if !is_enabled() {
//!     return;
//! }
//! let mut fixture = Fixture::connect(&database_url(), HarnessConfig::default())?;
//! fixture.provision(&SeedPlan::default())?;
//! ```

use std::thread;
use std::time::{Duration, Instant};

use deadlock_harness::HarnessConfig;
use eyre::{Result, WrapErr, bail};
use postgres::{Client, NoTls};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Connection string used when `DEADLOCK_DATABASE_URL` is unset.
pub const DEFAULT_DATABASE_URL: &str = "host=localhost user=postgres dbname=postgres";

/// Check if integration tests are enabled
///
/// Tests are enabled when the `DEADLOCK_INTEGRATION_TESTS` environment variable is set.
#[must_use]
pub fn is_enabled() -> bool {
    std::env::var("DEADLOCK_INTEGRATION_TESTS").is_ok()
}

/// Connection string of the server under test.
#[must_use]
pub fn database_url() -> String {
    std::env::var("DEADLOCK_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned())
}

/// Install error reports and a test-friendly subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = color_eyre::install();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// How many rows go into each group.
///
/// The victim's group gets `small_rows` and the winner's gets `large_rows`, so
/// a lock manager that aborts the cheapest transaction picks the victim.
#[derive(Debug, Clone, Copy)]
pub struct SeedPlan {
    pub small_rows: u32,
    pub large_rows: u32,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            small_rows: 10,
            large_rows: 100,
        }
    }
}

/// Owns the helper table on a live server.
pub struct Fixture {
    url: String,
    client: Client,
    config: HarnessConfig,
    plan: SeedPlan,
}

impl Fixture {
    /// Connect an administrative session. Nothing is created yet.
    pub fn connect(url: &str, config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::connect(url, NoTls)
            .wrap_err_with(|| format!("failed to connect to {url}"))?;
        Ok(Self {
            url: url.to_owned(),
            client,
            config,
            plan: SeedPlan::default(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// A fresh client for the caller side of a scenario.
    pub fn caller_client(&self) -> Result<Client> {
        Client::connect(&self.url, NoTls).wrap_err("failed to open caller session")
    }

    /// Drop and recreate the helper table, then seed it per `plan`.
    pub fn provision(&mut self, plan: &SeedPlan) -> Result<()> {
        let table = &self.config.table;
        info!(table = %table.name, small = plan.small_rows, large = plan.large_rows, "provisioning");

        self.client
            .batch_execute(&format!(
                "DROP TABLE IF EXISTS {name};
                 CREATE TABLE {name} (
                     id serial PRIMARY KEY,
                     {group} integer NOT NULL,
                     {data} text NOT NULL
                 );",
                name = table.name,
                group = table.group_column,
                data = table.data_column,
            ))
            .wrap_err("failed to create helper table")?;

        self.plan = *plan;
        self.seed()
    }

    /// Remove all rows and reseed with the last plan.
    pub fn reset(&mut self) -> Result<()> {
        self.client
            .batch_execute(&format!("TRUNCATE {}", self.config.table.name))
            .wrap_err("failed to truncate helper table")?;
        self.seed()
    }

    fn seed(&mut self) -> Result<()> {
        let table = &self.config.table;
        let insert = format!(
            "INSERT INTO {name} ({group}, {data})
             SELECT $1, md5(n::text) FROM generate_series(1, $2) AS n",
            name = table.name,
            group = table.group_column,
            data = table.data_column,
        );
        let groups = [
            (self.config.victim_group.0, self.plan.small_rows),
            (self.config.winner_group.0, self.plan.large_rows),
        ];
        for (group, rows) in groups {
            let rows = i32::try_from(rows).wrap_err("seed row count out of range")?;
            self.client
                .execute(insert.as_str(), &[&group, &rows])
                .wrap_err_with(|| format!("failed to seed group {group}"))?;
        }
        debug!("helper table seeded");
        Ok(())
    }

    /// Number of server sessions with the given `application_name`.
    pub fn open_sessions(&mut self, application_name: &str) -> Result<i64> {
        let row = self
            .client
            .query_one(
                "SELECT count(*) FROM pg_stat_activity WHERE application_name = $1",
                &[&application_name],
            )
            .wrap_err("failed to query pg_stat_activity")?;
        Ok(row.get(0))
    }

    /// Poll [`Self::open_sessions`] until it reaches zero.
    ///
    /// Backends exit asynchronously after the client hangs up.
    pub fn wait_sessions_closed(&mut self, application_name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let open = self.open_sessions(application_name)?;
            if open == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("{open} session(s) named {application_name:?} still open after {timeout:?}");
            }
            thread::sleep(Duration::from_millis(50));
        }
    }
}
