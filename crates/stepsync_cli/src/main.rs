//! stepsync CLI
//!
//! Command-line tools for stepsync.
//!
//! # Commands
//!
//! - `replay` - Replay a sensor reading log through a sync session
//! - `record decode` - Print a CBOR-encoded cumulative record as JSON
//! - `record encode` - Encode a JSON cumulative record as CBOR

mod commands;

use clap::{Parser, Subcommand};
use commands::replay::ReplayOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// stepsync command-line tools.
#[derive(Parser)]
#[command(name = "stepsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON reading log through a session backed by an in-memory store
    Replay {
        /// JSON array of `{"value", "observed_at"}` readings
        #[arg(short, long)]
        input: PathBuf,

        /// Owner of the cumulative record
        #[arg(short, long, default_value = "local-user")]
        user: String,

        /// Cumulative steps already stored before the replay
        #[arg(short, long)]
        base: Option<u64>,

        /// Sync after every n readings
        #[arg(long, default_value = "1")]
        flush_every: usize,

        /// Fail this many writes first
        #[arg(long, default_value = "0")]
        fail_writes: usize,

        /// Offset from UTC, in minutes, used to find day boundaries
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        utc_offset: i32,

        /// Heart rate sent with each sync (bpm)
        #[arg(long, default_value = "0")]
        heart_rate: i32,

        /// Sleep duration sent with each sync (hours)
        #[arg(long, default_value = "0")]
        sleep_hours: f64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Inspect or produce stored cumulative records
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum RecordAction {
    /// Print a CBOR record as JSON
    Decode {
        /// CBOR file
        file: PathBuf,
    },

    /// Encode a JSON record as CBOR
    Encode {
        /// JSON file
        file: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            input,
            user,
            base,
            flush_every,
            fail_writes,
            utc_offset,
            heart_rate,
            sleep_hours,
            format,
        } => {
            let options = ReplayOptions {
                user_id: user,
                base,
                flush_every,
                fail_writes,
                utc_offset_minutes: utc_offset,
                heart_rate,
                sleep_hours,
            };
            commands::replay::run(&input, &options, &format)?;
        }
        Commands::Record { action } => match action {
            RecordAction::Decode { file } => commands::record::decode(&file)?,
            RecordAction::Encode { file, output } => commands::record::encode(&file, &output)?,
        },
        Commands::Version => {
            println!("stepsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("stepsync core v{}", stepsync_core::VERSION);
        }
    }

    Ok(())
}
