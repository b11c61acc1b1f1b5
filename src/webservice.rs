//! Web daemon lifecycle: start/stop/restart/delete and the first-time init
//! flow that chains TLS generation, daemon launch, the online poll, and the
//! bootstrap sequence.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password};
use indicatif::ProgressBar;
use tokio::process::Command;

use crate::bootstrap;
use crate::client::ApiClient;
use crate::clienv;
use crate::credentials::WebCredentials;
use crate::error::{OrchestratorError, Result};
use crate::health::{wait_online, VersionProbe};
use crate::options::ServiceOptions;
use crate::process::{
    self, kill_hard, read_pid, remove_pid_file, terminate, write_pid, WebServiceStatus,
};
use crate::tls;

const STOP_GRACE: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Pure decision: prompt for credentials only in an interactive session
/// where the operator neither accepted defaults nor supplied both values.
pub fn prompting_needed(
    accept_defaults: bool,
    has_username: bool,
    has_password: bool,
    interactive: bool,
) -> bool {
    interactive && !accept_defaults && !(has_username && has_password)
}

pub struct WebServiceController<'a> {
    options: &'a ServiceOptions,
    pid_path: PathBuf,
    log_path: PathBuf,
}

impl<'a> WebServiceController<'a> {
    pub fn new(options: &'a ServiceOptions) -> Self {
        Self {
            options,
            pid_path: clienv::web_pid_path(),
            log_path: clienv::web_log_path(),
        }
    }

    #[cfg(test)]
    fn with_paths(options: &'a ServiceOptions, pid_path: PathBuf, log_path: PathBuf) -> Self {
        Self {
            options,
            pid_path,
            log_path,
        }
    }

    /// Recomputed from the PID file and process liveness on every call.
    pub fn status(&self) -> WebServiceStatus {
        process::web_service_status(&self.pid_path)
    }

    pub fn pid_path(&self) -> &PathBuf {
        &self.pid_path
    }

    pub async fn start(&self, expect_authenticated: bool) -> Result<()> {
        match self.status() {
            WebServiceStatus::Running => {
                println!("Web service is already running.");
                return Ok(());
            }
            WebServiceStatus::Inactive => {
                // A leftover PID file from a crashed process must not block
                // the restart.
                println!(
                    "PID file found at {}, but no active process running as PID {}; removing it.",
                    self.pid_path.display(),
                    read_pid(&self.pid_path)
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "<unparsable>".to_string())
                );
                remove_pid_file(&self.pid_path);
            }
            WebServiceStatus::NoPidFile => {}
        }

        if !self.options.tls_key_path.exists() {
            return Err(OrchestratorError::Precondition(format!(
                "web service is not initialized (no TLS key at {}); run `stackctl init webservice`",
                self.options.tls_key_path.display()
            )));
        }

        let pid = self.spawn_daemon().await?;
        write_pid(&self.pid_path, pid)?;
        println!("Launched web daemon (PID {pid}); waiting for it to come online...");

        let spinner = ProgressBar::new_spinner();
        spinner.set_message("Polling health endpoint...");
        spinner.enable_steady_tick(Duration::from_millis(120));

        let client = ApiClient::new(self.options)?;
        let probe = VersionProbe::new(&client);
        let result = wait_online(
            &probe,
            expect_authenticated,
            self.options.retry_max,
            Duration::from_secs(self.options.retry_delay_secs),
        )
        .await;
        spinner.finish_and_clear();

        match result {
            Ok(()) => {
                println!("Web service is online at {}.", self.options.base_url());
                Ok(())
            }
            Err(e) => {
                eprintln!("Web service failed to come online: {e}");
                Err(e)
            }
        }
    }

    async fn spawn_daemon(&self) -> Result<u32> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        let program = clienv::web_command();
        let child = Command::new(&program)
            .args([
                "serve",
                "--port",
                &self.options.web_port.to_string(),
                "--tls-key",
                &self.options.tls_key_path.display().to_string(),
                "--tls-cert",
                &self.options.tls_cert_path.display().to_string(),
                "--database-config",
                &clienv::db_config_path().display().to_string(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(|e| {
                OrchestratorError::CommandFailed(format!("failed to launch {program}: {e}"))
            })?;

        let pid = child
            .id()
            .ok_or_else(|| OrchestratorError::CommandFailed(format!("{program} exited on spawn")))?;
        tracing::info!(pid, program = %program, "Spawned web daemon");
        Ok(pid)
    }

    /// Never errors on "already stopped".
    pub async fn stop(&self) -> Result<()> {
        match self.status() {
            WebServiceStatus::Running => {
                let Some(pid) = read_pid(&self.pid_path) else {
                    remove_pid_file(&self.pid_path);
                    return Ok(());
                };
                println!("Stopping web service (PID {pid})...");
                terminate(pid);

                let mut waited = Duration::ZERO;
                while process::is_process_running(pid) && waited < STOP_GRACE {
                    tokio::time::sleep(STOP_POLL).await;
                    waited += STOP_POLL;
                }
                if process::is_process_running(pid) {
                    tracing::warn!(pid, "Daemon ignored the stop request; killing it");
                    kill_hard(pid);
                }

                remove_pid_file(&self.pid_path);
                println!("Web service stopped.");
            }
            WebServiceStatus::Inactive => {
                println!(
                    "Removing stale PID file at {}.",
                    self.pid_path.display()
                );
                remove_pid_file(&self.pid_path);
            }
            WebServiceStatus::NoPidFile => {
                println!("Web service is already stopped.");
            }
        }
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start(true).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.stop().await?;
        if self.options.destructive {
            tls::remove_material(self.options)?;
            println!("Removed TLS key and certificate.");
        }
        Ok(())
    }

    /// First-time initialization: credentials, TLS material, start with no
    /// authentication expected, then the bootstrap sequence. A bootstrap
    /// failure stops the daemon so no half-configured service stays
    /// reachable; generated TLS material is kept for the retry.
    pub async fn init(&self) -> Result<()> {
        if self.status() == WebServiceStatus::Running {
            return Err(OrchestratorError::Precondition(
                "web service is already running; stop it before initializing".to_string(),
            ));
        }

        let mut creds = self.collect_credentials()?;

        if tls::ensure_material(self.options)? {
            println!(
                "Generated self-signed TLS certificate at {}.",
                self.options.tls_cert_path.display()
            );
        }

        self.start(false).await?;

        let client = ApiClient::new(self.options)?;
        match bootstrap::run(&client, &mut creds).await {
            Ok(()) => {
                bootstrap::print_summary(self.options, &creds);
                if self.options.register_console {
                    bootstrap::register_data_service(self.options, &creds).await;
                }
                Ok(())
            }
            Err(e) => {
                eprintln!("Bootstrap failed: {e}");
                eprintln!("Stopping the web service; fix the problem and run init again.");
                self.stop().await?;
                Err(e)
            }
        }
    }

    fn collect_credentials(&self) -> Result<WebCredentials> {
        let mut creds = WebCredentials::generated();
        if let Some(username) = &self.options.web_username {
            creds.username = username.clone();
        }
        if let Some(password) = &self.options.web_password {
            creds.password = password.clone();
        }

        let interactive = std::io::stdin().is_terminal();
        if prompting_needed(
            self.options.accept_defaults,
            self.options.web_username.is_some(),
            self.options.web_password.is_some(),
            interactive,
        ) {
            let theme = ColorfulTheme::default();
            creds.username = Input::with_theme(&theme)
                .with_prompt("Admin username")
                .default(creds.username.clone())
                .interact_text()
                .map_err(|e| OrchestratorError::Config(format!("prompt failed: {e}")))?;

            let password = Password::with_theme(&theme)
                .with_prompt("Admin password (leave empty to use a generated one)")
                .allow_empty_password(true)
                .interact()
                .map_err(|e| OrchestratorError::Config(format!("prompt failed: {e}")))?;
            if !password.is_empty() {
                creds.password = password;
            }
        }

        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Target, TargetArgs};

    fn options() -> ServiceOptions {
        let args = TargetArgs {
            component: Target::Webservice,
            db_host: None,
            db_port: None,
            external_url: None,
            web_port: None,
            ssl_cert: Some(PathBuf::from("/nonexistent/custom.crt")),
            ssl_key: Some(PathBuf::from("/nonexistent/custom.key")),
            ssl_skip_verify: false,
            retry_max: Some(1),
            retry_delay: Some(0),
            username: None,
            password: None,
            yes: true,
            no_console: true,
        };
        ServiceOptions::resolve(&args, None, false)
    }

    #[test]
    fn test_prompting_needed_matrix() {
        // Interactive without supplied credentials: prompt.
        assert!(prompting_needed(false, false, false, true));
        assert!(prompting_needed(false, true, false, true));
        // Accept-defaults suppresses every prompt.
        assert!(!prompting_needed(true, false, false, true));
        // Both values supplied: nothing to ask.
        assert!(!prompting_needed(false, true, true, true));
        // Non-interactive sessions never prompt.
        assert!(!prompting_needed(false, false, false, false));
    }

    #[tokio::test]
    async fn test_stop_without_pid_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options();
        let controller = WebServiceController::with_paths(
            &opts,
            dir.path().join("stackd.pid"),
            dir.path().join("stackd.log"),
        );
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_removes_stale_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("stackd.pid");
        std::fs::write(&pid_path, "garbage\n").unwrap();

        let opts = options();
        let controller =
            WebServiceController::with_paths(&opts, pid_path.clone(), dir.path().join("stackd.log"));
        assert_eq!(controller.status(), WebServiceStatus::Inactive);

        controller.stop().await.unwrap();
        assert!(!pid_path.exists());
        assert_eq!(controller.status(), WebServiceStatus::NoPidFile);
    }

    #[tokio::test]
    async fn test_start_while_running_is_reported_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("stackd.pid");
        // Our own PID is definitely alive.
        write_pid(&pid_path, std::process::id()).unwrap();

        let opts = options();
        let controller =
            WebServiceController::with_paths(&opts, pid_path.clone(), dir.path().join("stackd.log"));
        controller.start(true).await.unwrap();
        // Still "running"; the PID file was not touched.
        assert!(pid_path.exists());
    }

    #[tokio::test]
    async fn test_start_requires_tls_key() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options();
        let controller = WebServiceController::with_paths(
            &opts,
            dir.path().join("stackd.pid"),
            dir.path().join("stackd.log"),
        );

        let err = controller.start(true).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_init_refuses_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("stackd.pid");
        write_pid(&pid_path, std::process::id()).unwrap();

        let opts = options();
        let controller =
            WebServiceController::with_paths(&opts, pid_path, dir.path().join("stackd.log"));
        let err = controller.init().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Precondition(_)));
    }
}
