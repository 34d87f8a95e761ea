//! # DM Harness CLI (`dm`)
//!
//! The `dm` binary is the front door for DM Harness. It builds and inspects
//! the SRD index and runs rules queries and chat sessions against it.
//!
//! ## Usage
//!
//! ```bash
//! dm --config ./config/dm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dm build` | Build the index, or load it when the cache is present |
//! | `dm probe` | Report the cache state without touching any model |
//! | `dm query "<text>"` | Ask one rules question through the full pipeline |
//! | `dm retrieve "<text>"` | Show retrieved context without answer synthesis |
//! | `dm chat` | Interactive play session on stdin |
//! | `dm stats` | Print the manifest of an existing index cache |
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=dm_harness=debug`) to see build progress,
//! merge decisions, and cache recovery in the logs.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dm_harness::agent::DmAgent;
use dm_harness::config::{self, Config};
use dm_harness::lifecycle::{Capabilities, SrdIndex};
use dm_harness::persist::{self, CacheState};
use dm_harness::providers;

/// DM Harness — a local-first Dungeon Master assistant core.
#[derive(Parser)]
#[command(
    name = "dm",
    about = "DM Harness — hierarchical SRD indexing, auto-merging retrieval, and a rules-aware chat agent",
    version,
    long_about = "DM Harness indexes a Standard Reference Document rules corpus into a \
    multi-granularity chunk forest, retrieves auto-merged and reranked context for player \
    questions, and synthesizes answers through a configured language model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// All corpus, index, capability, and chat settings are read from this
    /// file.
    #[arg(long, global = true, default_value = "./config/dm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build the SRD index, or load it when the cache is present.
    ///
    /// Embeds every leaf chunk through the configured embedding provider and
    /// persists the chunk store, vector index, and manifest to the cache
    /// directory. A present cache is loaded instead; a corrupt one is
    /// rebuilt.
    Build {
        /// Delete the existing cache first and rebuild from scratch.
        #[arg(long)]
        force: bool,
    },

    /// Report the cache state (absent, present, corrupt) without building.
    Probe,

    /// Ask one rules question through the full pipeline.
    ///
    /// Runs vector search, auto-merging, reranking, and tree-summarized
    /// answer synthesis, then prints the answer.
    Query {
        /// The rules question.
        text: String,
    },

    /// Show the retrieved context for a query without answer synthesis.
    ///
    /// Useful for judging retrieval quality: prints each surviving
    /// candidate's node id, rerank score, and text.
    Retrieve {
        /// The rules question.
        text: String,

        /// Number of candidates to keep after reranking.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Interactive play session.
    ///
    /// Reads player messages from stdin; each turn routes through the tool
    /// decision, optionally the rules database, and the in-character reply.
    /// Type `exit` or `quit` (or close stdin) to leave.
    Chat,

    /// Print the manifest of an existing index cache.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { force } => cmd_build(&config, force).await,
        Commands::Probe => cmd_probe(&config),
        Commands::Query { text } => cmd_query(&config, &text).await,
        Commands::Retrieve { text, top_k } => cmd_retrieve(&config, &text, top_k).await,
        Commands::Chat => cmd_chat(&config).await,
        Commands::Stats => cmd_stats(&config),
    }
}

fn capabilities(config: &Config) -> Result<Capabilities> {
    Ok(Capabilities {
        llm: providers::create_language_model(&config.llm)?,
        embedder: providers::create_embedder(&config.embedding)?,
        reranker: providers::create_reranker(&config.reranker)?,
    })
}

async fn cmd_build(config: &Config, force: bool) -> Result<()> {
    if force && config.index.cache_dir.exists() {
        std::fs::remove_dir_all(&config.index.cache_dir)?;
        println!("removed {}", config.index.cache_dir.display());
    }

    let index = SrdIndex::open(config, capabilities(config)?).await?;
    let manifest = index.manifest();
    println!("index ready");
    println!("  nodes: {}", manifest.node_count);
    println!("  leaves: {}", manifest.leaf_count);
    println!("  chunk sizes: {:?}", manifest.chunk_sizes);
    println!("  embedding model: {}", manifest.embedding_model);
    println!("  cache: {}", config.index.cache_dir.display());
    Ok(())
}

fn cmd_probe(config: &Config) -> Result<()> {
    match persist::probe(&config.index.cache_dir) {
        CacheState::Absent => println!("absent"),
        CacheState::Present => println!("present"),
        CacheState::Corrupt(reason) => println!("corrupt: {}", reason),
    }
    Ok(())
}

async fn cmd_query(config: &Config, text: &str) -> Result<()> {
    let index = SrdIndex::open(config, capabilities(config)?).await?;
    let answer = index.query(text).await?;
    println!("{}", answer);
    Ok(())
}

async fn cmd_retrieve(config: &Config, text: &str, top_k: Option<usize>) -> Result<()> {
    let mut config = config.clone();
    if let Some(k) = top_k {
        config.index.rerank_top_n = k;
    }

    let index = SrdIndex::open(&config, capabilities(&config)?).await?;
    let candidates = index.retrieve(text).await?;
    if candidates.is_empty() {
        println!("No results");
        return Ok(());
    }
    for candidate in candidates {
        println!("id: {}", candidate.node_id);
        println!("  score: {:.4}", candidate.score);
        println!("  text: {}", candidate.text);
    }
    Ok(())
}

async fn cmd_chat(config: &Config) -> Result<()> {
    let caps = capabilities(config)?;
    let llm = caps.llm.clone();
    let index = SrdIndex::open(config, caps).await?;
    let agent = DmAgent::new(index, llm, &config.chat);

    let mut state = agent.new_conversation();
    let stdin = std::io::stdin();

    println!("The session begins. Type 'exit' to leave.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "exit" || message == "quit" {
            break;
        }

        match agent.respond(&state, message).await {
            Ok((next, answer)) => {
                state = next;
                println!("{}", answer);
            }
            Err(e) => eprintln!("turn failed: {:#}", e),
        }
    }
    Ok(())
}

fn cmd_stats(config: &Config) -> Result<()> {
    match persist::probe(&config.index.cache_dir) {
        CacheState::Absent => {
            println!("no index cache at {}", config.index.cache_dir.display());
            Ok(())
        }
        CacheState::Corrupt(reason) => {
            anyhow::bail!("index cache is corrupt: {}", reason)
        }
        CacheState::Present => {
            let manifest = persist::read_manifest(&config.index.cache_dir)?;
            println!("cache: {}", config.index.cache_dir.display());
            println!("  version: {}", manifest.version);
            println!("  built at: {}", manifest.built_at);
            println!("  nodes: {}", manifest.node_count);
            println!("  leaves: {}", manifest.leaf_count);
            println!("  chunk sizes: {:?}", manifest.chunk_sizes);
            println!("  embedding model: {}", manifest.embedding_model);
            println!("  dims: {}", manifest.dims);
            println!("  fingerprint: {}", manifest.fingerprint);
            Ok(())
        }
    }
}
