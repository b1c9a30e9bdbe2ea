//! `bdfs` command-line entry point.
//!
//! Thin wrapper around the bdfs-archive library: parses arguments, installs
//! logging, builds the session and dispatches one subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bdfs_archive::{
    BdfsConfig, CurrentTree, GameDir, Ledger, Release, Session, extract_all, update,
};
use bdfs_codec::{PassthroughCodec, Utf8Text};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bdfs",
    about = "Extract and incrementally update PAD/PAZ game archives",
    version
)]
struct Cli {
    /// Default log level when RUST_LOG is not set
    #[arg(short, long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Number of codec worker threads
    #[arg(long, env = "BDFS_WORKERS", default_value_t = bdfs_codec::DEFAULT_WORKERS, global = true)]
    workers: usize,

    /// Flush extraction once this many decoded bytes are in flight
    #[arg(long, env = "BDFS_MEMORY_CEILING", default_value_t = bdfs_archive::config::DEFAULT_MEMORY_CEILING, global = true)]
    memory_ceiling: u64,

    /// Maximum concurrent link, unlink, stat and read operations
    #[arg(long, env = "BDFS_IO_BATCH", default_value_t = bdfs_archive::config::DEFAULT_IO_BATCH, global = true)]
    io_batch: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every file of an index into a folder
    Extract {
        /// Index file
        index: PathBuf,
        /// Folder holding the PAD#####.paz containers
        archive_dir: PathBuf,
        /// Output folder
        output: PathBuf,
    },

    /// Write the ledger of an index and its containers
    #[command(name = "createsha1map")]
    CreateSha1Map {
        /// Index file
        index: PathBuf,
        /// Folder holding the PAD#####.paz containers
        archive_dir: PathBuf,
        /// Ledger file to write
        output: PathBuf,
    },

    /// Extract what changed between the previous release and the game folder
    Update {
        /// Game installation folder
        game: PathBuf,
        /// Previous release folder, named after its version
        previous: PathBuf,
        /// New release folder, named after its version
        next: PathBuf,
    },

    /// Create current/ for a release
    #[command(name = "createcurrent")]
    CreateCurrent {
        /// Folder holding one folder per release
        versions: PathBuf,
        /// Release to link
        version: u32,
    },

    /// Move current/ forward to a release
    #[command(name = "updatecurrent")]
    UpdateCurrent {
        /// Folder holding one folder per release
        versions: PathBuf,
        /// Release to move to
        version: u32,
    },

    /// Check file sizes in current/
    #[command(name = "checkcurrent")]
    CheckCurrent {
        /// Folder holding one folder per release
        versions: PathBuf,
    },
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("cannot resolve {}", path.display()))
}

async fn run(command: Commands, session: &Session) -> Result<()> {
    match command {
        Commands::Extract {
            index,
            archive_dir,
            output,
        } => {
            let index = session
                .load_index(&absolute(&index)?, &absolute(&archive_dir)?)
                .await?;
            extract_all(session, &index, &absolute(&output)?).await?;
        }
        Commands::CreateSha1Map {
            index,
            archive_dir,
            output,
        } => {
            let index = session
                .load_index(&absolute(&index)?, &absolute(&archive_dir)?)
                .await?;
            Ledger::build(session, &index)
                .await?
                .save(session, &absolute(&output)?)
                .await?;
        }
        Commands::Update {
            game,
            previous,
            next,
        } => {
            let game = GameDir::new(absolute(&game)?);
            let previous = Release::from_dir(absolute(&previous)?)?;
            let next = Release::from_dir(absolute(&next)?)?;
            update(session, &game, &previous, &next).await?;
        }
        Commands::CreateCurrent { versions, version } => {
            CurrentTree::new(absolute(&versions)?)
                .bootstrap(session, version)
                .await?;
        }
        Commands::UpdateCurrent { versions, version } => {
            CurrentTree::new(absolute(&versions)?)
                .apply(session, version)
                .await?;
        }
        Commands::CheckCurrent { versions } => {
            CurrentTree::new(absolute(&versions)?).verify(session).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str())),
        )
        .init();

    let started = Instant::now();
    let config = BdfsConfig::new()
        .with_workers(cli.workers)
        .with_memory_ceiling(cli.memory_ceiling)
        .with_io_batch(cli.io_batch);
    let session = Session::new(config, Arc::new(PassthroughCodec), Arc::new(Utf8Text))?;

    let result = run(cli.command, &session).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    info!("runtime: {:?}", started.elapsed());
    result
}
