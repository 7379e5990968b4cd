//! # Wiki Index CLI (`wiki-index`)
//!
//! Drives the indexing pipeline over the collections listed in the
//! configuration file.
//!
//! ## Usage
//!
//! ```bash
//! wiki-index --config ./config/wiki-index.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wiki-index collections` | List configured collections and their policy |
//! | `wiki-index sync <collection>` | Queue every stored document and wait for the index |
//! | `wiki-index query "<text>" --principal <user>` | Search collections the user may use |
//! | `wiki-index status <collection> --principal <user>` | Per-document indexing status |
//! | `wiki-index stats` | Document and chunk counts per collection |
//! | `wiki-index models` | List known embedding models |
//! | `wiki-index clear-index` | Wipe the vector index |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wiki_index::config;
use wiki_index::logging;
use wiki_index::search::QueryInput;
use wiki_index::service::WikiIndex;
use wiki_index::stats;

/// Wiki Index: chunk, embed, and search access-controlled wiki collections.
#[derive(Parser)]
#[command(name = "wiki-index", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wiki-index.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List collections with their embedding model and chunking policy.
    Collections,

    /// Queue every document found in storage for a collection, then wait
    /// until the queue drains.
    Sync {
        /// Collection name, or `all`.
        collection: String,
    },

    /// Semantic search over the collections the principal may use.
    Query {
        /// Query text.
        text: String,

        /// Acting user.
        #[arg(long)]
        principal: String,

        /// Maximum number of hits.
        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Sync every collection before querying (needed with the in-memory store).
        #[arg(long)]
        sync: bool,
    },

    /// Show the indexing status of every document in a collection.
    Status {
        collection: String,

        /// Acting user.
        #[arg(long)]
        principal: String,
    },

    /// Document and chunk counts per collection.
    Stats,

    /// List embedding models from the model table.
    Models,

    /// Delete every chunk from the index store.
    ClearIndex,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    let index = WikiIndex::from_config(&cfg).await?;
    let result = run(&index, cli.command).await;
    index.shutdown().await;
    result
}

async fn run(index: &WikiIndex, command: Commands) -> Result<()> {
    match command {
        Commands::Collections => {
            let collections = index.registry().list_collections().await;
            if collections.is_empty() {
                println!("No collections.");
                return Ok(());
            }
            println!("{:<20} {:<12} {:<12} {:>6}", "COLLECTION", "MODEL", "CHUNKING", "SIZE");
            for collection in collections {
                let settings = collection.settings()?;
                println!(
                    "{:<20} {:<12} {:<12} {:>6}",
                    collection.name(),
                    settings.embedding_model,
                    settings.chunking.method,
                    settings.chunking.max_chunk_size
                );
            }
        }
        Commands::Sync { collection } => {
            let names: Vec<String> = if collection == "all" {
                index
                    .registry()
                    .list_collections()
                    .await
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            } else {
                vec![collection]
            };
            for name in &names {
                let found = index.sync_collection(name).await?;
                println!("{}: {} documents queued", name, found);
            }
            index.wait_idle().await;
            stats::print_table(
                &index
                    .stats()
                    .await?
                    .into_iter()
                    .filter(|s| names.contains(&s.name))
                    .collect::<Vec<_>>(),
            );
        }
        Commands::Query {
            text,
            principal,
            k,
            sync,
        } => {
            if sync {
                for collection in index.registry().list_collections().await {
                    index.sync_collection(collection.name()).await?;
                }
                index.wait_idle().await;
            }
            let hits = index.query(&principal, &QueryInput::Text(text), k).await?;
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}/{} (chunk {})",
                    i + 1,
                    hit.score,
                    hit.collection,
                    hit.document_id,
                    hit.chunk_index
                );
                println!("    {}", hit.snippet.replace('\n', " "));
                println!();
            }
        }
        Commands::Status {
            collection,
            principal,
        } => {
            let collection = index.registry().get_collection(&collection).await?;
            let docs = collection.get_document_list(&principal, 0, usize::MAX)?;
            if docs.is_empty() {
                println!("No documents tracked (run `wiki-index sync` first).");
            }
            for doc in docs {
                match doc.last_error {
                    Some(cause) => {
                        println!("{:<40} {:<10} {}", doc.id, doc.status.as_str(), cause)
                    }
                    None => println!("{:<40} {}", doc.id, doc.status),
                }
            }
        }
        Commands::Stats => {
            stats::run_stats(index).await?;
        }
        Commands::Models => {
            let models = index.models().list();
            if models.is_empty() {
                bail!("No embedding models configured. Add [[embedding.models]] to the config.");
            }
            println!("{:<16} {:<28} {:>6}", "ID", "MODEL", "DIMS");
            for model in models {
                println!("{:<16} {:<28} {:>6}", model.id, model.model, model.dims);
            }
        }
        Commands::ClearIndex => {
            index.clear_index().await?;
            println!("Index cleared.");
        }
    }
    Ok(())
}
