use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};
use uuid::Uuid;

/// Bytes per chunk when an upload does not pick its own size (255 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 261_120;

/// Files collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "fs.files";

/// Seconds without a chunk write before an unfinalized upload counts as orphaned.
pub const DEFAULT_ORPHAN_MIN_IDLE_SECS: u32 = 3600;

/// Centralized configuration for the `gridfile` binary.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub collection: String,
    pub chunk_size: u32,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked blob storage over SQLite")]
pub struct Args {
    /// Database URL (overrides GRIDFILE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Files collection, must end in `.files` (overrides GRIDFILE_COLLECTION)
    #[arg(long)]
    pub collection: Option<String>,

    /// Chunk size in bytes for uploads (overrides GRIDFILE_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Upload a local file
    Put {
        path: PathBuf,
        /// Stored filename (defaults to the file's name)
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
        /// Extra name for the file; may be repeated
        #[arg(long = "alias")]
        aliases: Vec<String>,
        /// JSON metadata stored with the file
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Download a file into a local path
    Get { id: Uuid, output: PathBuf },
    /// Print a file record as JSON
    Stat { id: Uuid },
    /// Delete a file and its chunks
    Rm { id: Uuid },
    /// List ids owning chunks but no file record
    Orphans {
        /// Skip ids that had a chunk written within this many seconds
        #[arg(long, default_value_t = DEFAULT_ORPHAN_MIN_IDLE_SECS)]
        min_idle_secs: u32,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, Command)> {
        // --- Environment fallback ---
        let env_db = env::var("GRIDFILE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/gridfile.db".into());
        let env_collection =
            env::var("GRIDFILE_COLLECTION").unwrap_or_else(|_| DEFAULT_COLLECTION.into());
        let env_chunk_size = match env::var("GRIDFILE_CHUNK_SIZE") {
            Ok(value) => value
                .parse::<u32>()
                .with_context(|| format!("parsing GRIDFILE_CHUNK_SIZE value `{}`", value))?,
            Err(env::VarError::NotPresent) => DEFAULT_CHUNK_SIZE,
            Err(err) => return Err(err).context("reading GRIDFILE_CHUNK_SIZE"),
        };

        // --- Merge ---
        let cfg = Self {
            database_url: args.database_url.unwrap_or(env_db),
            collection: args.collection.unwrap_or(env_collection),
            chunk_size: args.chunk_size.unwrap_or(env_chunk_size),
        };

        if cfg.chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }

        Ok((cfg, args.command))
    }
}
