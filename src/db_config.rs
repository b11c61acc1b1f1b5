//! Persisted database connection config.
//!
//! Two named profiles (`production`, `test`) live in one YAML document.
//! Loading fails as a whole when either profile is missing or malformed; a
//! partial file never populates in-memory options.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbProfile {
    pub database: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub pool: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub production: DbProfile,
    pub test: DbProfile,
}

impl DbConfig {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading database config");
        let content = fs::read_to_string(path)?;
        let config: Self =
            serde_yaml::from_str(&content).map_err(|source| OrchestratorError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::trace!(
            production_db = %config.production.database,
            test_db = %config.test.database,
            "Database config loaded"
        );
        Ok(config)
    }

    /// Loads the config when the file exists, `None` otherwise. A present but
    /// malformed file is still an error.
    pub fn load_if_present(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::trace!(path = %path.display(), "No database config present");
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Writes the config with owner-only permissions; it carries passwords.
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::trace!(path = %path.display(), "Saving database config");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)
            .map_err(|e| OrchestratorError::Config(format!("failed to serialize config: {e}")))?;
        fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "Database config saved");
        Ok(())
    }

    pub fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
            tracing::debug!(path = %path.display(), "Database config removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbConfig {
        DbConfig {
            production: DbProfile {
                database: "stack".to_string(),
                username: "stack".to_string(),
                password: "s3cret".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                pool: 10,
            },
            test: DbProfile {
                database: "stack_test".to_string(),
                username: "stack_test".to_string(),
                password: "t3st".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                pool: 5,
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.yml");

        let config = sample();
        config.save(&path).unwrap();
        let loaded = DbConfig::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn test_missing_test_profile_fails_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.yml");
        fs::write(
            &path,
            "production:\n  database: stack\n  username: stack\n  password: x\n  host: localhost\n  port: 5432\n  pool: 10\n",
        )
        .unwrap();

        assert!(DbConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_if_present_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yml");
        assert!(DbConfig::load_if_present(&path).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.yml");
        sample().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
