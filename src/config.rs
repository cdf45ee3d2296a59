//! Configuration consumed by the snapshot engine
//!
//! Cinnabar does not parse configuration files itself; the embedding server
//! hands it a ready [`SnapshotConfig`].

use std::path::PathBuf;

/// Database id reserved for server-internal bookkeeping. Rows in this
/// database never appear in a dump file.
pub const RESERVED_GLOBAL_DB: u32 = 0x00FF_FFFF;

/// Snapshot configuration
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Number of logical databases
    pub databases: u32,

    /// Directory where replication dump files are renamed into
    pub repl_data_dir: String,

    /// Database id treated as the internal "global" database
    pub reserved_db: u32,

    /// Attempt LZF compression for large string values in the legacy dialect
    pub compress_strings: bool,

    /// Default dump filename
    pub filename: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            databases: 16,
            repl_data_dir: "./repl".to_string(),
            reserved_db: RESERVED_GLOBAL_DB,
            compress_strings: true,
            filename: "dump.rdb".to_string(),
        }
    }
}

impl SnapshotConfig {
    /// Canonical path of a dump file with the given name under the
    /// replication data directory.
    pub fn repl_path(&self, name: &str) -> PathBuf {
        let mut path = PathBuf::from(&self.repl_data_dir);
        path.push(name);
        path
    }

    /// Validate the settings the snapshot layer relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases == 0 {
            return Err(ConfigError::NoDatabases);
        }
        if self.reserved_db < self.databases {
            return Err(ConfigError::ReservedDbInRange(self.reserved_db));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one logical database is required")]
    NoDatabases,

    #[error("reserved database id {0} collides with the addressable range")]
    ReservedDbInRange(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SnapshotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_reserved_db_collision() {
        let config = SnapshotConfig {
            databases: 16,
            reserved_db: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repl_path() {
        let config = SnapshotConfig {
            repl_data_dir: "/var/lib/cinnabar".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.repl_path("repl.snapshot"),
            PathBuf::from("/var/lib/cinnabar/repl.snapshot")
        );
    }
}
