//! logdict CLI
//!
//! Command-line access to a string dictionary stored on disk.

use clap::{Parser, Subcommand};
use logdict::{CheckpointKind, Config, Dictionary};
use tracing_subscriber::{fmt, EnvFilter};

/// logdict CLI
#[derive(Parser, Debug)]
#[command(name = "logdict")]
#[command(about = "Inspect and edit a logdict dictionary")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./logdict_data")]
    data_dir: String,

    /// Dictionary name
    #[arg(short, long, default_value = "dictionary")]
    name: String,

    /// In-memory log budget in MB
    #[arg(short = 'm', long, default_value = "16")]
    memory_mb: usize,

    /// Flush the whole log on save instead of snapshotting the unflushed tail
    #[arg(long)]
    fold_over: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List all pairs
    List {
        /// Print keys only
        #[arg(short, long)]
        keys: bool,
    },

    /// Take a checkpoint
    Save,

    /// Check that the dictionary opens
    Ping,
}

#[tokio::main]
async fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,logdict=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("logdict CLI v{}", logdict::VERSION);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .name(&args.name)
        .memory_size(args.memory_mb * 1024 * 1024)
        .checkpoint_kind(if args.fold_over {
            CheckpointKind::FoldOver
        } else {
            CheckpointKind::Snapshot
        })
        .build();

    let dict: Dictionary<String, String> = match Dictionary::open(config) {
        Ok(dict) => dict,
        Err(e) => {
            tracing::error!("Failed to open dictionary: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = run(&dict, args.command).await;
    let closed = dict.dispose().await;

    if let Err(e) = outcome.and(closed.map(|_| ())) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(dict: &Dictionary<String, String>, command: Commands) -> logdict::Result<()> {
    match command {
        Commands::Get { key } => match dict.get(key).await? {
            Some(value) => println!("{}", value),
            None => {
                println!("(nil)");
            }
        },
        Commands::Set { key, value } => {
            dict.upsert(key, value).await?;
            // Unsaved writes do not survive a restart
            dict.save().await?;
            println!("OK");
        }
        Commands::Del { key } => {
            let removed = dict.remove(key).await?.found;
            dict.save().await?;
            println!("{}", if removed { "1" } else { "0" });
        }
        Commands::List { keys } => {
            if keys {
                let mut cursor = dict.keys().await?;
                while let Some(key) = cursor.next().await? {
                    println!("{}", key);
                }
            } else {
                let mut cursor = dict.entries().await?;
                while let Some((key, value)) = cursor.next().await? {
                    println!("{}\t{}", key, value);
                }
            }
        }
        Commands::Save => {
            dict.save().await?;
            println!("OK");
        }
        Commands::Ping => {
            dict.ping().await?;
            println!("PONG");
        }
    }
    Ok(())
}
