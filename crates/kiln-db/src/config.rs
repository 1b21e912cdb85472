//! # Engine Configuration
//!
//! Configuration for the Kiln engine: where the database lives, how write
//! transactions retry, and how much production overrun is tolerated.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KILN_DATABASE_PATH=/var/lib/kiln/kiln.db                           │
//! │     KILN_MAX_CONNECTIONS=8                                             │
//! │     KILN_WRITE_ATTEMPTS=5                                              │
//! │     KILN_OVERRUN_TOLERANCE_PERCENT=5                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kiln/kiln.toml (Linux)                                   │
//! │     ~/Library/Application Support/com.kiln.kiln/kiln.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # kiln.toml
//! [database]
//! path = "./kiln.db"
//! max_connections = 5
//!
//! [ledger]
//! write_attempts = 5
//! retry_backoff_ms = 20
//! max_retry_backoff_ms = 500
//!
//! [production]
//! overrun_tolerance_percent = "0"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use backoff::ExponentialBackoff;
use kiln_core::Percentage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Path to the SQLite file. `:memory:` gives an isolated in-memory store.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./kiln.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSection {
    fn default() -> Self {
        DatabaseSection {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// `[ledger]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// Attempts per write transaction when SQLite reports lock contention.
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Backoff before the first retry; grows exponentially after that.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Upper bound on the backoff between two retries.
    #[serde(default = "default_max_retry_backoff")]
    pub max_retry_backoff_ms: u64,
}

fn default_write_attempts() -> u32 {
    5
}

fn default_retry_backoff() -> u64 {
    20
}

fn default_max_retry_backoff() -> u64 {
    500
}

impl Default for LedgerSection {
    fn default() -> Self {
        LedgerSection {
            write_attempts: default_write_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            max_retry_backoff_ms: default_max_retry_backoff(),
        }
    }
}

/// `[production]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionSection {
    /// How far completed quantity may exceed requested, in percent.
    #[serde(default)]
    pub overrun_tolerance_percent: Percentage,
}

// =============================================================================
// Runtime Settings
// =============================================================================

/// Retry policy for write transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRetry {
    pub attempts: u32,
    /// Interval before the first retry.
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl WriteRetry {
    fn from_section(ledger: &LedgerSection) -> Self {
        WriteRetry {
            attempts: ledger.write_attempts,
            backoff: Duration::from_millis(ledger.retry_backoff_ms),
            max_backoff: Duration::from_millis(ledger.max_retry_backoff_ms),
        }
    }

    /// A fresh exponential backoff for one write operation.
    ///
    /// The attempt cap is enforced by the caller, so there is no limit on
    /// elapsed time.
    pub fn exponential_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        // Start from our initial interval rather than the crate default.
        backoff.current_interval = self.backoff;
        backoff
    }
}

impl Default for WriteRetry {
    fn default() -> Self {
        WriteRetry::from_section(&LedgerSection::default())
    }
}

/// Settings the repositories consult at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub write_retry: WriteRetry,
    pub overrun_tolerance: Percentage,
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration as loaded from `kiln.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub ledger: LedgerSection,

    #[serde(default)]
    pub production: ProductionSection,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config_path`, or kiln.toml in the platform config dir)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document. Missing sections and fields take defaults.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::Config("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.ledger.write_attempts == 0 {
            return Err(DbError::Config(
                "ledger.write_attempts must be greater than 0".into(),
            ));
        }

        if self.ledger.max_retry_backoff_ms < self.ledger.retry_backoff_ms {
            return Err(DbError::Config(
                "ledger.max_retry_backoff_ms must not be less than ledger.retry_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    /// Pool configuration for [`crate::Database::with_settings`].
    pub fn db_config(&self) -> DbConfig {
        if self.database.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory();
        }
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    /// Runtime settings for the repositories.
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            write_retry: WriteRetry::from_section(&self.ledger),
            overrun_tolerance: self.production.overrun_tolerance_percent,
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("KILN_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("KILN_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(m) => self.database.max_connections = m,
                Err(_) => warn!(value = %max, "Ignoring invalid KILN_MAX_CONNECTIONS"),
            }
        }

        if let Ok(attempts) = std::env::var("KILN_WRITE_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(a) => self.ledger.write_attempts = a,
                Err(_) => warn!(value = %attempts, "Ignoring invalid KILN_WRITE_ATTEMPTS"),
            }
        }

        if let Ok(tolerance) = std::env::var("KILN_OVERRUN_TOLERANCE_PERCENT") {
            match tolerance.parse::<Decimal>().ok().and_then(|d| Percentage::new(d).ok()) {
                Some(p) => {
                    debug!(tolerance = %p, "Overriding overrun tolerance from environment");
                    self.production.overrun_tolerance_percent = p;
                }
                None => warn!(
                    value = %tolerance,
                    "Ignoring invalid KILN_OVERRUN_TOLERANCE_PERCENT"
                ),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kiln", "kiln")
            .map(|dirs| dirs.config_dir().join("kiln.toml"))
    }
}
