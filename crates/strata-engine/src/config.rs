//! Data source configuration
//!
//! Options are plain serde data, usually loaded from a TOML file:
//!
//! ```toml
//! logging = "production"
//! isolation = "serializable"
//! transaction_timeout_ms = 5000
//!
//! [driver]
//! type = "sqlite"
//! path = "strata.db"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strata_core::errors::{Result, StrataError};
use strata_core::logging_facility::Profile;
use strata_store::{Driver, IsolationLevel, MemoryDriver, SqliteDriver};

/// Which store the data source executes against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverConfig {
    #[default]
    Memory,
    /// `path = ":memory:"` opens a private in-memory database
    Sqlite { path: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSourceOptions {
    /// Install the global tracing subscriber with this profile
    pub logging: Option<Profile>,
    /// Isolation used when a transaction does not ask for one
    pub isolation: Option<IsolationLevel>,
    /// Forwarded to the execution context; not enforced here
    pub transaction_timeout_ms: Option<u64>,
    pub driver: DriverConfig,
}

impl DataSourceOptions {
    /// Parse options from TOML text
    ///
    /// # Errors
    ///
    /// `Config` when the text is not valid TOML for these options.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| StrataError::Config {
            message: format!("invalid data source options: {}", e),
        })
    }

    /// Read and parse a TOML options file
    ///
    /// # Errors
    ///
    /// `Config` when the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StrataError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }

    /// Open the configured driver
    ///
    /// # Errors
    ///
    /// `Persistence` when the SQLite database cannot be opened.
    pub fn build_driver(&self) -> Result<Arc<dyn Driver>> {
        Ok(match &self.driver {
            DriverConfig::Memory => Arc::new(MemoryDriver::new()),
            DriverConfig::Sqlite { path } if path.as_os_str() == ":memory:" => {
                Arc::new(SqliteDriver::open_in_memory()?)
            }
            DriverConfig::Sqlite { path } => Arc::new(SqliteDriver::open(path)?),
        })
    }
}
