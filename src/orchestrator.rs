//! Top-level driver: maps a requested operation and target component onto
//! the database driver and the web service controller, sequencing
//! cross-component dependencies and destructive-operation confirmation.
//!
//! The confirmation *decision* is a pure function here; actually asking the
//! operator lives in one small I/O shim.

use std::io::IsTerminal;

use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;

use crate::args::Target;
use crate::credentials::generate_password;
use crate::db::{self, DatabaseDriver, DatabaseStatus};
use crate::error::{OrchestratorError, Result};
use crate::options::ServiceOptions;
use crate::process::{self, WebServiceStatus};
use crate::webservice::WebServiceController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Reinit,
    Delete,
    Status,
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Database,
    WebService,
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Component::Database => write!(f, "database"),
            Component::WebService => write!(f, "web service"),
        }
    }
}

/// Expands a target into the components it covers, in execution order.
///
/// Bring-up operations run the database first so the web service has a
/// backend to connect to; tear-down operations run the web service first so
/// nothing holds connections into a cluster that is about to go away.
pub fn components_for(op: Operation, target: Target) -> Vec<Component> {
    match target {
        Target::Database => vec![Component::Database],
        Target::Webservice => vec![Component::WebService],
        Target::All => match op {
            Operation::Stop | Operation::Delete => {
                vec![Component::WebService, Component::Database]
            }
            _ => vec![Component::Database, Component::WebService],
        },
    }
}

/// Returns the confirmation prompt an operation requires, or `None` when it
/// may proceed unprompted. `--yes` suppresses all prompts.
pub fn confirmation_prompt(
    op: Operation,
    target: Target,
    accept_defaults: bool,
) -> Option<String> {
    if accept_defaults {
        return None;
    }
    let what = match target {
        Target::Database => "the database cluster and its stored data",
        Target::Webservice => "the web service state and TLS material",
        Target::All => "all managed services and their stored data",
    };
    match op {
        Operation::Delete => Some(format!("This will permanently delete {}. Continue?", what)),
        Operation::Reinit => Some(format!(
            "This will permanently delete {} and re-create it from scratch. Continue?",
            what
        )),
        _ => None,
    }
}

pub struct Orchestrator {
    options: ServiceOptions,
}

impl Orchestrator {
    pub fn new(options: ServiceOptions) -> Self {
        Self { options }
    }

    fn driver(&self) -> Result<Box<dyn DatabaseDriver>> {
        db::detect(&self.options)
    }

    fn controller(&self) -> WebServiceController<'_> {
        WebServiceController::new(&self.options)
    }

    pub async fn execute(&self, op: Operation, target: Target) -> Result<()> {
        if let Some(prompt) = confirmation_prompt(op, target, self.options.accept_defaults) {
            if !confirm(&prompt)? {
                println!("Aborted.");
                return Ok(());
            }
        }

        match op {
            Operation::Status => self.status(target).await,
            Operation::Init => self.init(target).await,
            Operation::Reinit => {
                self.delete(target).await?;
                self.init(target).await
            }
            Operation::Delete => self.delete(target).await,
            Operation::Start => self.start(target).await,
            Operation::Stop => self.stop(target).await,
            Operation::Restart => self.restart(target).await,
        }
    }

    async fn status(&self, target: Target) -> Result<()> {
        for component in components_for(Operation::Status, target) {
            match component {
                Component::Database => {
                    let status = self.driver()?.status().await;
                    println!("Database:    {}", status);
                }
                Component::WebService => {
                    let controller = self.controller();
                    match controller.status() {
                        WebServiceStatus::Running => {
                            let pid = process::read_pid(controller.pid_path());
                            match pid {
                                Some(pid) => println!("Web service: running (PID {})", pid),
                                None => println!("Web service: running"),
                            }
                        }
                        WebServiceStatus::Inactive => {
                            let pid = process::read_pid(controller.pid_path())
                                .map(|p| p.to_string())
                                .unwrap_or_else(|| "<unparsable>".to_string());
                            println!(
                                "Web service: PID file found at {}, but no active process running as PID {}",
                                controller.pid_path().display(),
                                pid
                            );
                        }
                        WebServiceStatus::NoPidFile => println!("Web service: not running"),
                    }
                }
            }
        }
        Ok(())
    }

    async fn init(&self, target: Target) -> Result<()> {
        for component in components_for(Operation::Init, target) {
            match component {
                Component::Database => {
                    let driver = self.driver()?;
                    let primary = generate_password();
                    let test = generate_password();
                    driver.init(&primary, &test).await?;
                }
                Component::WebService => self.controller().init().await?,
            }
        }
        Ok(())
    }

    async fn delete(&self, target: Target) -> Result<()> {
        for component in components_for(Operation::Delete, target) {
            match component {
                Component::Database => {
                    // The daemon holds open connections into the cluster;
                    // stop it before the cluster goes away even when only
                    // the database was targeted.
                    self.controller().stop().await?;
                    self.driver()?.delete().await?;
                }
                Component::WebService => self.controller().delete().await?,
            }
        }
        Ok(())
    }

    async fn start(&self, target: Target) -> Result<()> {
        for component in components_for(Operation::Start, target) {
            match component {
                Component::Database => {
                    let driver = self.driver()?;
                    match driver.status().await {
                        DatabaseStatus::Running => {
                            println!("Database is already running.");
                        }
                        DatabaseStatus::Inactive => driver.start().await?,
                        DatabaseStatus::NotFound | DatabaseStatus::NeedsInit => {
                            return Err(OrchestratorError::Precondition(
                                "the database is not initialized; run `stackctl init database` first"
                                    .into(),
                            ));
                        }
                    }
                }
                Component::WebService => self.controller().start(true).await?,
            }
        }
        Ok(())
    }

    async fn restart(&self, target: Target) -> Result<()> {
        match target {
            Target::Database => self.driver()?.restart().await,
            Target::Webservice => self.controller().restart().await,
            // Restarting everything is not per-component stop+start: both
            // components go down, then come back in dependency order.
            Target::All => {
                self.stop(target).await?;
                self.start(target).await
            }
        }
    }

    async fn stop(&self, target: Target) -> Result<()> {
        for component in components_for(Operation::Stop, target) {
            match component {
                Component::Database => {
                    let driver = self.driver()?;
                    match driver.status().await {
                        DatabaseStatus::Running => driver.stop().await?,
                        _ => println!("Database is already stopped."),
                    }
                }
                Component::WebService => self.controller().stop().await?,
            }
        }
        Ok(())
    }

    /// Runs an arbitrary command with the persisted production profile
    /// exported into its environment.
    pub async fn run_command(&self, command: &[String]) -> Result<i32> {
        self.driver()?.run_command(command, &[]).await
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Err(OrchestratorError::Precondition(
            "refusing a destructive operation without confirmation; pass --yes to proceed".into(),
        ));
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| OrchestratorError::Precondition(format!("confirmation failed: {e}")))
}
