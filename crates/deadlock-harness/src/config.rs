//! Harness configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Role, RowGroup};

/// Default bound on the wait for the partner's first statement.
pub const DEFAULT_PARTNER_WAIT: Duration = Duration::from_secs(120);

/// Largest accepted partner wait, in milliseconds.
///
/// PostgreSQL stores `lock_timeout` as a 32-bit millisecond count.
pub const MAX_PARTNER_WAIT_MS: u64 = i32::MAX as u64;

/// Default group locked by the victim (the small one).
pub const DEFAULT_VICTIM_GROUP: RowGroup = RowGroup(1);

/// Default group locked by the winner (the large one).
pub const DEFAULT_WINNER_GROUP: RowGroup = RowGroup(3);

/// Location of the shared table. Provisioning it is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSpec {
    pub name: String,
    pub group_column: String,
    pub data_column: String,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self {
            name: "deadlock_helper".to_owned(),
            group_column: "cl_id".to_owned(),
            data_column: "data".to_owned(),
        }
    }
}

/// Tunables for one deadlock scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How long a participant waits for its partner's first statement.
    pub partner_wait_ms: u64,
    /// Group locked by the caller-side participant.
    pub victim_group: RowGroup,
    /// Group locked by the worker-side participant.
    pub winner_group: RowGroup,
    pub table: TableSpec,
    /// Tags the worker session so external probes can count it.
    pub worker_application_name: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            partner_wait_ms: millis(DEFAULT_PARTNER_WAIT),
            victim_group: DEFAULT_VICTIM_GROUP,
            winner_group: DEFAULT_WINNER_GROUP,
            table: TableSpec::default(),
            worker_application_name: "deadlock-harness-winner".to_owned(),
        }
    }
}

impl HarnessConfig {
    /// Defaults overlaid with `DEADLOCK_*` environment variables.
    ///
    /// Recognised variables: `DEADLOCK_PARTNER_WAIT_MS`, `DEADLOCK_VICTIM_GROUP`,
    /// `DEADLOCK_WINNER_GROUP` and `DEADLOCK_TABLE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`HarnessConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("DEADLOCK_PARTNER_WAIT_MS") {
            config.partner_wait_ms = parse_env("DEADLOCK_PARTNER_WAIT_MS", &value)?;
        }
        if let Some(value) = lookup("DEADLOCK_VICTIM_GROUP") {
            config.victim_group = RowGroup(parse_env("DEADLOCK_VICTIM_GROUP", &value)?);
        }
        if let Some(value) = lookup("DEADLOCK_WINNER_GROUP") {
            config.winner_group = RowGroup(parse_env("DEADLOCK_WINNER_GROUP", &value)?);
        }
        if let Some(value) = lookup("DEADLOCK_TABLE") {
            config.table.name = value;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration can drive a scenario.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partner_wait_ms == 0 {
            return Err(ConfigError::ZeroPartnerWait);
        }
        if self.partner_wait_ms > MAX_PARTNER_WAIT_MS {
            return Err(ConfigError::PartnerWaitTooLong(self.partner_wait_ms));
        }
        if self.victim_group == self.winner_group {
            return Err(ConfigError::SameGroup(self.victim_group.0));
        }
        check_identifier("table.name", &self.table.name)?;
        check_identifier("table.group_column", &self.table.group_column)?;
        check_identifier("table.data_column", &self.table.data_column)?;
        Ok(())
    }

    #[must_use]
    pub fn partner_wait(&self) -> Duration {
        Duration::from_millis(self.partner_wait_ms)
    }

    #[must_use]
    pub fn with_partner_wait(mut self, wait: Duration) -> Self {
        self.partner_wait_ms = millis(wait);
        self
    }

    #[must_use]
    pub fn with_groups(mut self, victim: RowGroup, winner: RowGroup) -> Self {
        self.victim_group = victim;
        self.winner_group = winner;
        self
    }

    /// Row group assigned to `role`.
    #[must_use]
    pub fn group(&self, role: Role) -> RowGroup {
        match role {
            Role::Victim => self.victim_group,
            Role::Winner => self.winner_group,
        }
    }
}

/// Whole milliseconds, saturating instead of wrapping.
fn millis(wait: Duration) -> u64 {
    u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)
}

fn parse_env<T: core::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_owned(),
    })
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_owned(),
        })
    }
}
