//! Driver for a self-owned postgres data directory, managed with `initdb`
//! and `pg_ctl`.

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

pub struct LocalCluster {
    data_dir: PathBuf,
    log_path: PathBuf,
    config_path: PathBuf,
    host: String,
    port: u16,
}

impl LocalCluster {
    pub fn new(options: &ServiceOptions) -> Self {
        Self {
            data_dir: clienv::pg_data_dir(),
            log_path: clienv::pg_log_path(),
            config_path: clienv::db_config_path(),
            host: options.db_host.clone(),
            port: options.db_port,
        }
    }

    fn data_dir_str(&self) -> String {
        self.data_dir.display().to_string()
    }

    async fn initdb(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let output = Command::new("initdb")
            .args(["-D", &self.data_dir_str(), "--encoding=UTF8"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(OrchestratorError::CommandFailed(format!(
                "initdb failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!(dir = %self.data_dir.display(), "Initialized data directory");
        Ok(())
    }
}

#[async_trait]
impl DatabaseDriver for LocalCluster {
    async fn status(&self) -> DatabaseStatus {
        if !self.data_dir.exists() {
            return DatabaseStatus::NotFound;
        }
        if !self.data_dir.join("PG_VERSION").exists() {
            return DatabaseStatus::NeedsInit;
        }
        match Command::new("pg_ctl")
            .args(["status", "-D", &self.data_dir_str()])
            .output()
            .await
        {
            Ok(output) if output.status.success() => DatabaseStatus::Running,
            _ => DatabaseStatus::Inactive,
        }
    }

    async fn init(&self, primary_password: &str, test_password: &str) -> Result<()> {
        match self.status().await {
            DatabaseStatus::Running => {
                println!("Database is already running; nothing to initialize.");
                return Ok(());
            }
            DatabaseStatus::Inactive => {
                println!("Database is initialized but stopped; starting it instead.");
                return self.start().await;
            }
            DatabaseStatus::NotFound | DatabaseStatus::NeedsInit => {}
        }

        self.initdb().await?;
        self.start().await?;

        let config = build_config(&self.host, self.port, primary_password, test_password);
        provision_profile(self.port, &config.production).await?;
        provision_profile(self.port, &config.test).await?;
        config.save(&self.config_path)?;

        println!("Database initialized and running on port {}.", self.port);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let output = Command::new("pg_ctl")
            .args([
                "start",
                "-w",
                "-D",
                &self.data_dir_str(),
                "-l",
                &self.log_path.display().to_string(),
                "-o",
                &format!("-p {}", self.port),
            ])
            .output()
            .await?;

        if output.status.success() {
            tracing::info!(port = self.port, "Database engine started");
            return Ok(());
        }

        let tail = log_tail(&self.log_path, LOG_TAIL_LINES);
        if !tail.is_empty() {
            eprintln!("--- tail of {} ---", self.log_path.display());
            eprintln!("{tail}");
        }

        Err(classify_start_failure(
            &tail,
            &self.data_dir_str(),
            &self.log_path,
        ))
    }

    async fn stop(&self) -> Result<()> {
        if self.status().await != DatabaseStatus::Running {
            println!("Database is already stopped.");
            return Ok(());
        }

        let output = Command::new("pg_ctl")
            .args(["stop", "-m", "fast", "-D", &self.data_dir_str()])
            .output()
            .await?;
        if !output.status.success() {
            return Err(OrchestratorError::CommandFailed(format!(
                "pg_ctl stop failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!("Database engine stopped");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if self.status().await == DatabaseStatus::Running {
            self.stop().await?;
        }
        if self.data_dir.exists() {
            std::fs::remove_dir_all(&self.data_dir)?;
            tracing::info!(dir = %self.data_dir.display(), "Removed data directory");
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
