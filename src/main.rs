use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use pgchat::bootstrap::{ScriptHooks, bootstrap, serve};
use pgchat::cli::{Cli, Command, run_sessions_command};
use pgchat::config::DatabaseConfig;
use pgchat::history::PostgresAgentStorage;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgchat=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    // stderr keeps the REPL's stdout clean.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { script, channel } => {
            let (config, hooks): (_, ScriptHooks) =
                bootstrap(script).context("failed to start chat script")?;
            serve(script, channel, &config, hooks)
                .await
                .context("chat stopped with an error")?;
        }
        Command::Sessions(cmd) => {
            let db = DatabaseConfig::from_env()?;
            let storage = Arc::new(
                PostgresAgentStorage::from_config(&db).context("failed to set up session storage")?,
            );
            run_sessions_command(cmd, storage.as_ref()).await?;
        }
    }
    Ok(())
}
