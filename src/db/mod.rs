//! Database lifecycle drivers.
//!
//! One contract, three backends: a self-owned local cluster, a cluster owned
//! by the host's cluster-management facility, and a pre-existing externally
//! managed engine reached through a connection string. The concrete variant
//! is chosen once at startup; everything downstream depends on the trait.

pub mod local;
pub mod standalone;
pub mod system;

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::db_config::{DbConfig, DbProfile};
use crate::error::{OrchestratorError, Result};
use crate::options::ServiceOptions;

pub use local::LocalCluster;
pub use standalone::Standalone;
pub use system::SystemCluster;

/// Marker postgres prints when the data directory was created by a different
/// major version; drives the upgrade guidance after a failed start.
pub const VERSION_MISMATCH_MARKER: &str = "database files are incompatible";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    Running,
    Inactive,
    NotFound,
    NeedsInit,
}

impl std::fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseStatus::Running => write!(f, "running"),
            DatabaseStatus::Inactive => write!(f, "inactive"),
            DatabaseStatus::NotFound => write!(f, "not found"),
            DatabaseStatus::NeedsInit => write!(f, "needs init"),
        }
    }
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Derives the current status from observable facts; never fails.
    async fn status(&self) -> DatabaseStatus;

    /// Creates the cluster if absent, provisions the production and test
    /// roles/databases with the given passwords, and leaves the engine
    /// running. A running engine is a reported no-op; an inactive one is
    /// started instead of re-initialized.
    async fn init(&self, primary_password: &str, test_password: &str) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Removes the data directory and persisted config. The caller stops the
    /// web service first; a running daemon must never point at a deleted
    /// database.
    async fn delete(&self) -> Result<()>;

    /// Runs an operator command with the environment needed to reach the
    /// database. Stdout/stderr pass through; only the exit code comes back.
    async fn run_command(&self, command: &[String], env: &[(String, String)]) -> Result<i32>;
}

/// Binaries each managed variant shells out to.
pub const LOCAL_CLUSTER_TOOLS: &[&str] = &["initdb", "pg_ctl", "psql"];
pub const SYSTEM_CLUSTER_TOOLS: &[&str] = &["pg_lsclusters", "pg_ctlcluster", "psql"];

fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|t| which::which(t).is_err())
        .map(|t| (*t).to_string())
        .collect()
}

/// Union of both variants' missing binaries, deduplicated, so the operator
/// sees every way of making a backend usable rather than only the first.
fn merge_missing(local: Vec<String>, system: Vec<String>) -> Vec<String> {
    let mut merged = local;
    for tool in system {
        if !merged.contains(&tool) {
            merged.push(tool);
        }
    }
    merged
}

/// Constructs the concrete driver once: an explicit connection string selects
/// the standalone variant, otherwise detected tooling decides. No variant
/// branching happens anywhere past this point.
pub fn detect(options: &ServiceOptions) -> Result<Box<dyn DatabaseDriver>> {
    if let Some(url) = &options.external_url {
        tracing::info!("Using externally managed database");
        return Ok(Box::new(Standalone::new(url.clone())));
    }

    let missing_local = missing_tools(LOCAL_CLUSTER_TOOLS);
    if missing_local.is_empty() {
        tracing::debug!("Detected local cluster tooling");
        return Ok(Box::new(LocalCluster::new(options)));
    }

    let missing_system = missing_tools(SYSTEM_CLUSTER_TOOLS);
    if missing_system.is_empty() {
        tracing::debug!("Detected system cluster tooling");
        return Ok(Box::new(SystemCluster::new(options)));
    }

    Err(OrchestratorError::Environment(merge_missing(
        missing_local,
        missing_system,
    )))
}

/// Builds the two-profile config this system persists on database init.
pub fn build_config(
    host: &str,
    port: u16,
    primary_password: &str,
    test_password: &str,
) -> DbConfig {
    DbConfig {
        production: DbProfile {
            database: "stack".to_string(),
            username: "stack".to_string(),
            password: primary_password.to_string(),
            host: host.to_string(),
            port,
            pool: 10,
        },
        test: DbProfile {
            database: "stack_test".to_string(),
            username: "stack_test".to_string(),
            password: test_password.to_string(),
            host: host.to_string(),
            port,
            pool: 5,
        },
    }
}

/// Creates one profile's role and database via psql against the superuser
/// maintenance database.
pub(crate) async fn provision_profile(port: u16, profile: &DbProfile) -> Result<()> {
    let role_sql = format!(
        "CREATE ROLE \"{}\" WITH LOGIN PASSWORD '{}'",
        profile.username,
        profile.password.replace('\'', "''")
    );
    let db_sql = format!(
        "CREATE DATABASE \"{}\" OWNER \"{}\"",
        profile.database, profile.username
    );

    let output = Command::new("psql")
        .args([
            "-p",
            &port.to_string(),
            "-d",
            "postgres",
            "-v",
            "ON_ERROR_STOP=1",
            "-c",
            &role_sql,
            "-c",
            &db_sql,
        ])
        .output()
        .await?;

    if !output.status.success() {
        return Err(OrchestratorError::CommandFailed(format!(
            "provisioning role '{}' failed: {}",
            profile.username,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    tracing::info!(role = %profile.username, database = %profile.database, "Provisioned database profile");
    Ok(())
}

/// Runs an operator command with PG* environment pointing at the given
/// profile, stdio inherited, returning the exit code.
pub(crate) async fn run_in_env(
    command: &[String],
    extra_env: &[(String, String)],
    profile: &DbProfile,
) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| OrchestratorError::Config("empty command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env("PGHOST", &profile.host)
        .env("PGPORT", profile.port.to_string())
        .env("PGUSER", &profile.username)
        .env("PGPASSWORD", &profile.password)
        .env("PGDATABASE", &profile.database);
    for (key, value) in extra_env {
        cmd.env(key, value);
    }

    tracing::debug!(program = %program, "Running command in database environment");
    let status = cmd.status().await?;
    Ok(status.code().unwrap_or(-1))
}

pub(crate) const LOG_TAIL_LINES: usize = 20;

/// Classifies a failed engine start from the log tail: the version-mismatch
/// marker on the last line means the data directory needs an upgrade, not
/// that it is corrupt. Shared by every variant that owns an engine log.
pub(crate) fn classify_start_failure(
    tail: &str,
    data_dir: &str,
    log_path: &Path,
) -> OrchestratorError {
    if tail.lines().last().unwrap_or("").contains(VERSION_MISMATCH_MARKER) {
        OrchestratorError::Precondition(format!(
            "the data directory at {data_dir} was created by a different postgres major version; \
             run pg_upgrade, or `stackctl delete database` to discard it and reinitialize"
        ))
    } else {
        OrchestratorError::CommandFailed(format!(
            "postgres failed to start; the data directory may be corrupt, see {}",
            log_path.display()
        ))
    }
}

/// Last `n` lines of the engine log, for diagnostics after a failed start.
pub(crate) fn log_tail(path: &Path, n: usize) -> String {
    let Ok(content) = fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_profiles_are_distinct() {
        let config = build_config("localhost", 5432, "pw-a", "pw-b");
        assert_eq!(config.production.database, "stack");
        assert_eq!(config.test.database, "stack_test");
        assert_ne!(config.production.password, config.test.password);
        assert_eq!(config.production.port, config.test.port);
    }

    #[test]
    fn test_merge_missing_unions_without_duplicates() {
        let merged = merge_missing(
            vec!["initdb".to_string(), "psql".to_string()],
            vec!["pg_lsclusters".to_string(), "psql".to_string()],
        );
        assert_eq!(merged, vec!["initdb", "psql", "pg_lsclusters"]);
    }

    #[test]
    fn test_marker_on_last_line_means_upgrade_guidance() {
        let tail = "some noise\nFATAL: database files are incompatible with server";
        let err = classify_start_failure(tail, "/data/postgres", Path::new("/logs/postgres.log"));
        assert!(matches!(err, OrchestratorError::Precondition(_)));
        assert!(err.to_string().contains("pg_upgrade"));
    }

    #[test]
    fn test_marker_on_earlier_line_is_not_an_upgrade() {
        let tail = "database files are incompatible with server\nFATAL: could not bind port";
        let err = classify_start_failure(tail, "/data/postgres", Path::new("/logs/postgres.log"));
        assert!(matches!(err, OrchestratorError::CommandFailed(_)));
    }

    #[test]
    fn test_plain_failure_points_at_the_log() {
        let err = classify_start_failure("", "/data/postgres", Path::new("/logs/postgres.log"));
        assert!(matches!(err, OrchestratorError::CommandFailed(_)));
        assert!(err.to_string().contains("/logs/postgres.log"));
    }

    #[test]
    fn test_log_tail_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postgres.log");
        fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();

        assert_eq!(log_tail(&path, 2), "three\nfour");
        assert_eq!(log_tail(&path, 10), "one\ntwo\nthree\nfour");
    }

    #[test]
    fn test_log_tail_missing_file_is_empty() {
        assert_eq!(log_tail(Path::new("/nonexistent/postgres.log"), 5), "");
    }
}
