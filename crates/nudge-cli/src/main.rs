use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nudge_cli::commands::{guard, simulate, sites, snooze, status};
use nudge_cli::{Cli, Commands, Config, SitesAction};
use nudge_store::SqliteStore;

/// Load config and open the store, ensuring the parent directory exists.
fn open_store(config_path: Option<&Path>) -> Result<(SqliteStore, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let store = SqliteStore::open(&config.database_path).context("failed to open database")?;
    Ok((store, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (store, config) = open_store(cli.config.as_deref())?;
    let mut stdout = std::io::stdout().lock();
    let now = Utc::now();

    match command {
        Commands::Status { json } => status::run(&mut stdout, &store, &config, now, *json)?,
        Commands::Target { url } => guard::target(&mut stdout, &store, url)?,
        Commands::Start { goal } => guard::start(&mut stdout, &store, goal.as_deref())?,
        Commands::Stop => guard::stop(&mut stdout, &store, now)?,
        Commands::Snooze { duration } => snooze::snooze(&mut stdout, &store, duration, now)?,
        Commands::Unsnooze => snooze::unsnooze(&mut stdout, &store, now)?,
        Commands::Goal { duration } => guard::goal(&mut stdout, &store, duration)?,
        Commands::Sites(action) => match action {
            SitesAction::List => sites::list(&mut stdout, &store)?,
            SitesAction::Add { site } => sites::add(&mut stdout, &store, site)?,
            SitesAction::Remove { site } => sites::remove(&mut stdout, &store, site)?,
        },
        Commands::Simulate(args) => {
            let state = store.state().context("failed to read guard state")?;
            simulate::run(&mut stdout, args, state, config.guard_config(), now)?;
        }
    }

    Ok(())
}
