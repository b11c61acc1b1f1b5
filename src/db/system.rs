//! Driver for a named cluster owned by the host's cluster-management
//! facility (`pg_lsclusters` / `pg_ctlcluster`, Debian-style).
//!
//! Nothing about the cluster is cached: every operation re-reads the cluster
//! table, so a cluster created or dropped behind our back is picked up on the
//! next call.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use super::{
    build_config, classify_start_failure, log_tail, provision_profile, run_in_env, DatabaseDriver,
    DatabaseStatus, LOG_TAIL_LINES,
};
use crate::clienv;
use crate::db_config::DbConfig;
use crate::error::{OrchestratorError, Result};
use crate::options::ServiceOptions;

const CLUSTER_NAME: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClusterRow {
    pub version: String,
    pub name: String,
    pub port: u16,
    pub online: bool,
    pub data_dir: String,
    pub log_file: String,
}

/// Parses `pg_lsclusters --no-header` output: one cluster per line,
/// whitespace-separated `version name port status owner datadir logfile`.
pub(crate) fn parse_lsclusters(output: &str) -> Vec<ClusterRow> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 6 {
                return None;
            }
            Some(ClusterRow {
                version: fields[0].to_string(),
                name: fields[1].to_string(),
                port: fields[2].parse().ok()?,
                online: fields[3].starts_with("online"),
                data_dir: fields[5].to_string(),
                log_file: fields.get(6).map(|f| f.to_string()).unwrap_or_default(),
            })
        })
        .collect()
}

/// Status of the selected cluster row. A listed cluster whose data directory
/// the table cannot resolve was created but never initialized.
pub(crate) fn row_status(row: Option<&ClusterRow>) -> DatabaseStatus {
    match row {
        None => DatabaseStatus::NotFound,
        Some(row) if row.data_dir.is_empty() || row.data_dir == "?" => DatabaseStatus::NeedsInit,
        Some(row) if row.online => DatabaseStatus::Running,
        Some(_) => DatabaseStatus::Inactive,
    }
}

/// Extracts the major version from `psql (PostgreSQL) 16.3` style output.
pub(crate) fn parse_pg_major(version_output: &str) -> Option<String> {
    version_output
        .split_whitespace()
        .last()?
        .split('.')
        .next()
        .map(str::to_string)
}

pub struct SystemCluster {
    config_path: PathBuf,
    host: String,
    port: u16,
}

impl SystemCluster {
    pub fn new(options: &ServiceOptions) -> Self {
        Self {
            config_path: clienv::db_config_path(),
            host: options.db_host.clone(),
            port: options.db_port,
        }
    }

    async fn cluster(&self) -> Option<ClusterRow> {
        let output = Command::new("pg_lsclusters")
            .arg("--no-header")
            .output()
            .await
            .ok()?;
        let text = String::from_utf8_lossy(&output.stdout);
        let rows = parse_lsclusters(&text);
        // Prefer the cluster on our port, fall back to the conventional name.
        rows.iter()
            .find(|r| r.port == self.port)
            .or_else(|| rows.iter().find(|r| r.name == CLUSTER_NAME))
            .or_else(|| rows.first())
            .cloned()
    }

    async fn ctlcluster(&self, row: &ClusterRow, action: &str) -> Result<()> {
        let output = Command::new("pg_ctlcluster")
            .args([row.version.as_str(), row.name.as_str(), action])
            .output()
            .await?;
        if !output.status.success() {
            return Err(OrchestratorError::CommandFailed(format!(
                "pg_ctlcluster {} {} {action} failed: {}",
                row.version,
                row.name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!(version = %row.version, cluster = %row.name, action, "Cluster control");
        Ok(())
    }
}

#[async_trait]
impl DatabaseDriver for SystemCluster {
    async fn status(&self) -> DatabaseStatus {
        row_status(self.cluster().await.as_ref())
    }

    async fn init(&self, primary_password: &str, test_password: &str) -> Result<()> {
        match self.status().await {
            DatabaseStatus::Running => {
                println!("Database cluster is already running; nothing to initialize.");
                return Ok(());
            }
            DatabaseStatus::Inactive => {
                println!("Database cluster exists but is stopped; starting it instead.");
                return self.start().await;
            }
            DatabaseStatus::NotFound | DatabaseStatus::NeedsInit => {}
        }

        // A row with an unresolved data directory still occupies its
        // version/name slot; drop it or pg_createcluster refuses.
        if let Some(row) = self.cluster().await {
            let output = Command::new("pg_dropcluster")
                .args([&row.version, &row.name])
                .output()
                .await?;
            if !output.status.success() {
                return Err(OrchestratorError::CommandFailed(format!(
                    "pg_dropcluster {} {} failed: {}",
                    row.version,
                    row.name,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            tracing::info!(version = %row.version, cluster = %row.name, "Dropped incomplete cluster");
        }

        let version_output = Command::new("psql").arg("--version").output().await?;
        let major = parse_pg_major(&String::from_utf8_lossy(&version_output.stdout))
            .ok_or_else(|| {
                OrchestratorError::CommandFailed(
                    "could not determine the postgres major version".to_string(),
                )
            })?;

        let port = self.port.to_string();
        let output = Command::new("pg_createcluster")
            .args([major.as_str(), CLUSTER_NAME, "--start", "-p", port.as_str()])
            .output()
            .await?;
        if !output.status.success() {
            return Err(OrchestratorError::CommandFailed(format!(
                "pg_createcluster failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!(version = %major, cluster = CLUSTER_NAME, "Created system cluster");

        let config = build_config(&self.host, self.port, primary_password, test_password);
        provision_profile(self.port, &config.production).await?;
        provision_profile(self.port, &config.test).await?;
        config.save(&self.config_path)?;

        println!("Database cluster initialized and running on port {}.", self.port);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let row = self.cluster().await.ok_or_else(|| {
            OrchestratorError::Precondition(
                "no database cluster exists; run `stackctl init database` first".to_string(),
            )
        })?;
        let Err(e) = self.ctlcluster(&row, "start").await else {
            return Ok(());
        };

        let log_path = PathBuf::from(&row.log_file);
        let tail = log_tail(&log_path, LOG_TAIL_LINES);
        if tail.is_empty() {
            return Err(e);
        }
        eprintln!("--- tail of {} ---", log_path.display());
        eprintln!("{tail}");
        Err(classify_start_failure(&tail, &row.data_dir, &log_path))
    }

    async fn stop(&self) -> Result<()> {
        match self.cluster().await {
            Some(row) if row.online => self.ctlcluster(&row, "stop").await,
            _ => {
                println!("Database cluster is already stopped.");
                Ok(())
            }
        }
    }

    async fn delete(&self) -> Result<()> {
        if let Some(row) = self.cluster().await {
            let output = Command::new("pg_dropcluster")
                .args([row.version.as_str(), row.name.as_str(), "--stop"])
                .output()
                .await?;
            if !output.status.success() {
                return Err(OrchestratorError::CommandFailed(format!(
                    "pg_dropcluster failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            tracing::info!(version = %row.version, cluster = %row.name, "Dropped system cluster");
        }
        DbConfig::remove(&self.config_path)?;
        println!("Database deleted.");
        Ok(())
    }

    async fn run_command(&self, command: &[String], env: &[(String, String)]) -> Result<i32> {
        let config = DbConfig::load_if_present(&self.config_path)?.ok_or_else(|| {
            OrchestratorError::Precondition(
                "database is not initialized; run `stackctl init database` first".to_string(),
            )
        })?;
        run_in_env(command, env, &config.production).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsclusters_single_online_row() {
        let rows = parse_lsclusters(
            "16  main  5432 online postgres /var/lib/postgresql/16/main /var/log/postgresql/postgresql-16-main.log\n",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, "16");
        assert_eq!(rows[0].name, "main");
        assert_eq!(rows[0].port, 5432);
        assert!(rows[0].online);
        assert_eq!(
            rows[0].log_file,
            "/var/log/postgresql/postgresql-16-main.log"
        );
    }

    #[test]
    fn test_parse_lsclusters_down_row() {
        let rows = parse_lsclusters(
            "15  main  5433 down   postgres /var/lib/postgresql/15/main /var/log/postgresql/postgresql-15-main.log\n",
        );
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].online);
        assert_eq!(rows[0].port, 5433);
    }

    #[test]
    fn test_parse_lsclusters_ignores_garbage() {
        assert!(parse_lsclusters("").is_empty());
        assert!(parse_lsclusters("not a cluster table\n").is_empty());
    }

    #[test]
    fn test_row_status_mapping() {
        assert_eq!(row_status(None), DatabaseStatus::NotFound);

        let row = |online: bool, data_dir: &str| ClusterRow {
            version: "16".to_string(),
            name: "main".to_string(),
            port: 5432,
            online,
            data_dir: data_dir.to_string(),
            log_file: "/var/log/postgresql/postgresql-16-main.log".to_string(),
        };
        assert_eq!(
            row_status(Some(&row(false, "?"))),
            DatabaseStatus::NeedsInit
        );
        assert_eq!(row_status(Some(&row(false, ""))), DatabaseStatus::NeedsInit);
        assert_eq!(
            row_status(Some(&row(true, "/var/lib/postgresql/16/main"))),
            DatabaseStatus::Running
        );
        assert_eq!(
            row_status(Some(&row(false, "/var/lib/postgresql/16/main"))),
            DatabaseStatus::Inactive
        );
    }

    #[test]
    fn test_parse_pg_major() {
        assert_eq!(parse_pg_major("psql (PostgreSQL) 16.3").as_deref(), Some("16"));
        assert_eq!(parse_pg_major("psql (PostgreSQL) 9.6.24").as_deref(), Some("9"));
        assert_eq!(parse_pg_major(""), None);
    }
}
