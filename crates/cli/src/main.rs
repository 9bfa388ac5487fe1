use crate::{
    conn::{ConnectionPinger, PostgresConnectionPinger},
    env::EnvManager,
    error::CliError,
    load::{LoadOptions, read_plan, run_load},
    shutdown::ShutdownCoordinator,
};
use clap::Parser;
use commands::Commands;
use planner::plan::LoadAction;
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod conn;
mod env;
mod error;
mod load;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "pgbulk", version = "0.1.0", about = "PostgreSQL bulk loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Load {
            config,
            input,
            copies,
            node_index,
            dry_run,
            env_file,
            output,
        } => {
            let env = load_env(env_file.as_deref())?;
            let plan = Arc::new(read_plan(&config, &env, copies).await?);

            let shutdown = ShutdownCoordinator::new(CancellationToken::new());
            shutdown.register_handlers();

            let options = LoadOptions { node_index, dry_run };
            let outcome = match run_load(Arc::clone(&plan), &input, &options, shutdown.cancel_token()).await {
                Ok(outcome) => outcome,
                Err(CliError::Load(err)) if err.is_stopped() && shutdown.is_shutdown_requested() => {
                    return Err(CliError::ShutdownRequested);
                }
                Err(err) => return Err(err),
            };

            if dry_run {
                print!("{}", output::render_dry_run(&plan, &outcome));
            }
            match output {
                Some(path) => output::write_report(&plan, &outcome, &path).await?,
                None => output::print_report(&plan, &outcome)?,
            }
        }
        Commands::Command { config, env_file } => {
            let env = load_env(env_file.as_deref())?;
            let plan = read_plan(&config, &env, None).await?;

            if plan.load_action == LoadAction::Truncate {
                println!("{}", plan.truncate_statement());
            }
            println!("{}", plan.copy_statement()?);
        }
        Commands::TestConn { conn_str } => {
            info!("Testing connection");
            PostgresConnectionPinger { conn_str }.ping().await?;
        }
    }

    Ok(())
}

fn load_env(env_file: Option<&Path>) -> Result<EnvManager, CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = env_file {
        env.load_from_file(path)?;
    }
    Ok(env)
}
