//! lhdb CLI
//!
//! Command-line interface for inspecting and editing an lhdb file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lhdb::{Engine, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// lhdb CLI
#[derive(Parser, Debug)]
#[command(name = "lhdb-cli")]
#[command(about = "CLI for the lhdb single-file key-value store")]
#[command(version)]
struct Args {
    /// Data file
    file: PathBuf,

    /// Open mode: r, w, c or n, optionally followed by l and/or t
    #[arg(short, long, default_value = "c")]
    mode: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Insert a key, leaving an existing one untouched
    Insert {
        /// The key to insert
        key: String,

        /// The value to store
        value: String,
    },

    /// Insert or overwrite a key
    Replace {
        /// The key to set
        key: String,

        /// The value to store
        value: String,
    },

    /// Print the value of a key
    Fetch {
        /// The key to fetch
        key: String,
    },

    /// Check whether a key is present
    Exists {
        /// The key to check
        key: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List all keys
    Keys,

    /// Print the number of keys
    Count,

    /// Print table and allocator statistics
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lhdb=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

/// Execute one command; `Ok(false)` means "not found" / "not inserted"
fn run(args: Args) -> Result<bool> {
    let mut engine = Engine::open(&args.file, &args.mode)?;

    let found = match args.command {
        Commands::Insert { key, value } => {
            let inserted = engine.insert(key.as_bytes(), value.as_bytes())?;
            if !inserted {
                println!("exists");
            }
            inserted
        }
        Commands::Replace { key, value } => {
            engine.replace(key.as_bytes(), value.as_bytes())?;
            true
        }
        Commands::Fetch { key } => match engine.fetch(key.as_bytes())? {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                true
            }
            None => false,
        },
        Commands::Exists { key } => {
            let exists = engine.exists(key.as_bytes())?;
            println!("{}", exists);
            exists
        }
        Commands::Delete { key } => engine.delete(key.as_bytes())?,
        Commands::Keys => {
            for key in engine.keys() {
                println!("{}", String::from_utf8_lossy(&key?));
            }
            true
        }
        Commands::Count => {
            println!("{}", engine.count());
            true
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("keys:      {}", stats.count);
            println!("buckets:   {}", stats.capacity);
            println!("modulus:   {}", stats.modulus);
            println!("split:     {}", stats.split);
            println!("fsize:     {}", stats.fsize);
            if let Some(free) = stats.free_bytes {
                println!("free:      {}", free);
            }
            true
        }
    };

    engine.close()?;
    Ok(found)
}
