use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fa_cli::commands::{events, export, import, parse, status, watch};
use fa_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

/// Open the database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<fa_db::Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    fa_db::Database::open(&config.database_path).with_context(|| {
        format!(
            "failed to open database {}",
            config.database_path.display()
        )
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so event output on stdout stays pipeable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Watch(args) => {
            let mut db = if args.save {
                Some(open_database(&config)?)
            } else {
                None
            };
            let summary = watch::run(&mut out, args, &config, db.as_mut())?;
            if !args.json {
                eprintln!(
                    "{} events ({} shown, {} saved) from {} lines",
                    summary.events, summary.shown, summary.saved, summary.lines
                );
            }
        }
        Commands::Parse(args) => {
            let mut db = if args.save {
                Some(open_database(&config)?)
            } else {
                None
            };
            let count = parse::run(&mut out, args, &config, db.as_mut())?;
            tracing::debug!(count, "parse finished");
        }
        Commands::Events(args) => {
            let db = open_database(&config)?;
            events::run(&mut out, &db, args, &config)?;
        }
        Commands::Status => {
            let db = open_database(&config)?;
            status::run(&mut out, &db, &config)?;
        }
        Commands::Export(args) => {
            let db = open_database(&config)?;
            let count = export::run(&mut out, &db, args)?;
            if args.output.is_some() {
                writeln!(out, "Exported {count} events.")?;
            }
        }
        Commands::Import(args) => {
            let mut db = open_database(&config)?;
            let stats = import::run(&mut db, args)?;
            writeln!(
                out,
                "Imported {} events and {} captures.",
                stats.events, stats.captures
            )?;
        }
    }

    out.flush()?;
    Ok(())
}
