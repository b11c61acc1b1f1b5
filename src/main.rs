mod args;
mod bootstrap;
mod client;
mod clienv;
mod credentials;
mod db;
mod db_config;
mod error;
mod health;
mod options;
mod orchestrator;
mod process;
mod tls;
mod webservice;

use args::{Cli, Commands, TargetArgs};
use clap::Parser;
use db_config::DbConfig;
use options::ServiceOptions;
use orchestrator::{Operation, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STACKCTL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Run(run) = &cli.command {
        let code = Orchestrator::new(resolve_options(&run.target, false)?)
            .run_command(&run.command)
            .await?;
        std::process::exit(code);
    }

    let (op, target_args) = match &cli.command {
        Commands::Init(a) => (Operation::Init, a),
        Commands::Reinit(a) => (Operation::Reinit, a),
        Commands::Delete(a) => (Operation::Delete, a),
        Commands::Status(a) => (Operation::Status, a),
        Commands::Start(a) => (Operation::Start, a),
        Commands::Stop(a) => (Operation::Stop, a),
        Commands::Restart(a) => (Operation::Restart, a),
        Commands::Run(_) => unreachable!(),
    };

    let destructive = matches!(op, Operation::Delete | Operation::Reinit);
    let options = resolve_options(target_args, destructive)?;

    Orchestrator::new(options)
        .execute(op, target_args.component)
        .await?;

    Ok(())
}

fn resolve_options(args: &TargetArgs, destructive: bool) -> anyhow::Result<ServiceOptions> {
    let persisted = DbConfig::load_if_present(&clienv::db_config_path())?;
    Ok(ServiceOptions::resolve(args, persisted.as_ref(), destructive))
}
