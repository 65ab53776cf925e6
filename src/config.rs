//! Runtime configuration.
//!
//! Everything has a sensible default; environment variables override for
//! demos and tests without a config file.

use std::path::PathBuf;
use std::time::Duration;

/// Rows seeded into a fresh staging table.
pub const DEFAULT_TABLE_ROWS: u32 = 15;

/// How long the mock generator pretends to work.
pub const DEFAULT_GENERATION_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// Directory holding the database file. `None` resolves the platform
    /// data directory at open time; tests point this at a temp dir.
    pub data_dir: Option<PathBuf>,
    /// Number of rows in the staging table.
    pub table_rows: u32,
    /// Simulated generation time per submission.
    pub generation_delay: Duration,
}

impl Default for StudioConfig {
    fn default() -> Self {
        StudioConfig {
            data_dir: None,
            table_rows: DEFAULT_TABLE_ROWS,
            generation_delay: DEFAULT_GENERATION_DELAY,
        }
    }
}

impl StudioConfig {
    /// Read configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    ///
    /// * `STUDIO_DATA_DIR` - directory for the database file
    /// * `STUDIO_TABLE_ROWS` - staging table size
    /// * `STUDIO_GEN_DELAY_MS` - mock generation delay in milliseconds
    pub fn from_env() -> Self {
        let defaults = StudioConfig::default();
        let data_dir = std::env::var("STUDIO_DATA_DIR").ok().map(PathBuf::from);
        let table_rows = std::env::var("STUDIO_TABLE_ROWS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.table_rows);
        let generation_delay = std::env::var("STUDIO_GEN_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.generation_delay);
        StudioConfig {
            data_dir,
            table_rows,
            generation_delay,
        }
    }
}
