//! Ledger configuration.
//!
//! Values come from an optional JSON file and are then overridden by `FIELDLEDGER_*`
//! environment variables. Out-of-range values are clamped rather than rejected.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::advance::{SplitTerms, DEFAULT_FEE, DEFAULT_RATE_BPS};
use crate::error::codes;
use crate::money::Money;
use crate::AppError;

pub const ENV_DB_PATH: &str = "FIELDLEDGER_DB";
pub const ENV_RATE_BPS: &str = "FIELDLEDGER_ADVANCE_RATE_BPS";
pub const ENV_FEE_CENTS: &str = "FIELDLEDGER_ADVANCE_FEE_CENTS";
pub const ENV_ALLOW_REOPEN: &str = "FIELDLEDGER_ALLOW_REOPEN";
pub const ENV_LOG_DIR: &str = "FIELDLEDGER_LOG_DIR";
pub const ENV_LOG_FILTER: &str = "FIELDLEDGER_LOG";

const APP_DIR_NAME: &str = "fieldledger";
const DB_FILE_NAME: &str = "fieldledger.sqlite3";
const HARD_MAX_RATE_BPS: u32 = 10_000;
const HARD_MAX_FEE_CENTS: i64 = 1_000_000;
pub const DEFAULT_LOG_FILTER: &str = "fieldledger=info,sqlx=warn";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        let path = match &err {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => {
                path.display().to_string()
            }
        };
        AppError::new(codes::CONFIG_INVALID, err.to_string()).with_context("path", path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive string.
    pub filter: String,
    /// Directory for the rolling JSON log file; stdout only when unset.
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            dir: None,
            json: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub advance_rate_bps: u32,
    pub advance_fee: Money,
    /// Allows synced records to be reopened for correction.
    pub allow_reopen: bool,
    pub log: LogConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            advance_rate_bps: DEFAULT_RATE_BPS,
            advance_fee: DEFAULT_FEE,
            allow_reopen: false,
            log: LogConfig::default(),
        }
    }
}

pub fn default_db_path() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(env::temp_dir);
    base.join(APP_DIR_NAME).join(DB_FILE_NAME)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl LedgerConfig {
    /// Defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides(|key| env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: LedgerConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(parsed.clamped())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(rate) = lookup(ENV_RATE_BPS).and_then(|v| v.trim().parse::<u32>().ok()) {
            self.advance_rate_bps = rate;
        }
        if let Some(fee) = lookup(ENV_FEE_CENTS).and_then(|v| v.trim().parse::<i64>().ok()) {
            self.advance_fee = Money::from_cents(fee);
        }
        if let Some(flag) = lookup(ENV_ALLOW_REOPEN).and_then(|v| parse_bool(&v)) {
            self.allow_reopen = flag;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|v| !v.trim().is_empty()) {
            self.log.dir = Some(PathBuf::from(dir));
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER).filter(|v| !v.trim().is_empty()) {
            self.log.filter = filter;
        }
        self.clamped()
    }

    fn clamped(mut self) -> Self {
        self.advance_rate_bps = self.advance_rate_bps.min(HARD_MAX_RATE_BPS);
        self.advance_fee = self
            .advance_fee
            .clamp_to(Money::ZERO, Money::from_cents(HARD_MAX_FEE_CENTS));
        self
    }

    pub fn split_terms(&self) -> SplitTerms {
        SplitTerms {
            rate_bps: self.advance_rate_bps,
            fee: self.advance_fee,
        }
    }
}
