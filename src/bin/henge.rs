//! Henge CLI
//!
//! Compiles schemas, validates items, and computes DRUIDs against an
//! in-memory store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use henge::{Henge, HengeConfig, MemoryStore, RecLimit};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "henge")]
#[command(about = "Decompose, digest and reconstruct schema-typed items")]
#[command(version)]
struct Cli {
    /// Config file (defaults to henge.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Schema file or directory, in addition to the configured ones
    #[arg(short, long = "schema")]
    schemas: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the compiled, flattened schema registry
    Compile,

    /// List the item types the schemas define
    Types,

    /// Check an item against an item type
    Validate {
        /// Item type to validate against
        #[arg(short = 't', long = "type")]
        item_type: String,
        /// Item as JSON, or @path to a JSON file
        item: String,
    },

    /// Compute the DRUID of an item
    Digest {
        #[arg(short = 't', long = "type")]
        item_type: String,
        item: String,
    },

    /// Insert an item and print what retrieval reconstructs
    Roundtrip {
        #[arg(short = 't', long = "type")]
        item_type: String,
        item: String,
        /// Levels of references to expand (unlimited if omitted)
        #[arg(short, long)]
        reclimit: Option<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = HengeConfig::load_from(cli.config.as_deref()).context("loading config")?;
    config.schemas.paths.extend(cli.schemas);
    if config.schemas.paths.is_empty() {
        bail!("no schemas given; pass --schema or set [schemas] paths in henge.toml");
    }

    let store = Arc::new(MemoryStore::new());
    let henge = Henge::from_config(&config, store.clone())?;

    match cli.command {
        Commands::Compile => {
            println!("{}", serde_json::to_string_pretty(&henge.schemas().to_json())?);
        }

        Commands::Types => {
            for item_type in henge.item_types() {
                println!("{item_type}");
            }
        }

        Commands::Validate { item_type, item } => {
            let item = parse_item(&item)?;
            match henge.validate(&item, &item_type) {
                Ok(_) => println!("✅ valid {item_type}"),
                Err(e) => {
                    println!("❌ {e}");
                    std::process::exit(1);
                }
            }
        }

        Commands::Digest { item_type, item } => {
            let item = parse_item(&item)?;
            let druid = henge.insert(&item, &item_type, RecLimit::Unlimited)?;
            println!("{druid}");
        }

        Commands::Roundtrip {
            item_type,
            item,
            reclimit,
        } => {
            let item = parse_item(&item)?;
            let druid = henge.insert(&item, &item_type, RecLimit::Unlimited)?;
            let restored = henge.retrieve(druid.as_str(), reclimit)?;
            println!("{druid}");
            println!("{}", serde_json::to_string_pretty(&restored)?);
            println!("({} keys stored)", store.len());
        }
    }

    Ok(())
}

fn parse_item(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("item is not valid JSON")
}
