use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, NOTES_ENV};

pub mod commands;

use self::commands::{DeleteArgs, NewArgs, ReadArgs, WriteArgs};

#[derive(Parser, Debug)]
#[command(
    name = "notedesk",
    version,
    about = "Markdown notes as plain files, behind a sandboxed terminal front end"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over NOTEDESK_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the notes directory (takes precedence over NOTEDESK_NOTES)
    #[arg(long)]
    pub notes_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Print every note title with its last edit time, newest first
    List,
    /// Print the contents of one note
    Read(ReadArgs),
    /// Replace the contents of a note
    Write(WriteArgs),
    /// Create an empty note through the host's save prompt
    New(NewArgs),
    /// Delete a note after confirmation
    Delete(DeleteArgs),
    /// Print what the host reports about this machine
    Device,
    /// List the bridge channels the UI is allowed to use
    Channels,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.notes_dir {
        env::set_var(NOTES_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    // The TUI owns the terminal, so its logs go to a file.
    let log_file = matches!(command, Commands::Tui).then(|| paths.log_file());
    init_tracing(&cli.log_level, log_file.as_deref())
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = Arc::new(loader.load_or_init()?);
    tracing::debug!(notes = %config.notes.root_dir.display(), "configuration loaded");

    match command {
        Commands::Tui => commands::run_tui(config),
        Commands::List => commands::list_notes(&config),
        Commands::Read(args) => commands::read_note(&config, args),
        Commands::Write(args) => commands::write_note(&config, args),
        Commands::New(args) => commands::new_note(&config, args),
        Commands::Delete(args) => commands::delete_note(&config, args),
        Commands::Device => commands::device_info(&config),
        Commands::Channels => {
            print!("{}", commands::channel_listing());
            Ok(())
        }
    }
}

fn init_tracing(level: &str, log_file: Option<&Path>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .init();
            }
            None => {
                fmt()
                    .with_env_filter(env_filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}
