//! Main module for the `nlq` command-line application.
//!
//! Parses arguments, loads the configuration, and dispatches to the selected subcommand.
//! Answers are printed to stdout as pretty JSON; logs go to stderr (`RUST_LOG` controls
//! verbosity).
//!
//! # Examples
//!
//! ```sh
//! nlq init
//! nlq seed
//! nlq ask "How many employees are there?"
//! nlq ask "Which resumes mention Kubernetes?" --doc alice.txt --doc bob.pdf
//! nlq interactive --doc alice.txt
//! ```

use clap::Parser;
use futures::future::try_join_all;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use nlq_engine::{
    catalog::{self, SchemaCatalog, SqliteCatalog},
    commands::{Cli, Commands},
    config::{self, EngineConfig},
    documents::Upload,
    engine::RetrievalOrchestrator,
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the `nlq` application.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the database cannot be opened,
/// the embedding model cannot be loaded, or a document file cannot be read.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => nlq_engine::config_dir()?.join("config.yaml"),
    };

    if let Commands::Init = cli.command {
        return init(&config_path);
    }

    let config = load_or_default(&config_path)?;
    debug!("Config loaded: {:?}", config);

    match cli.command {
        Commands::Init => {}
        Commands::Seed { path } => {
            let path = match path {
                Some(path) => path,
                None => catalog::sqlite_path_from_url(&config.database_url)?,
            };
            catalog::seed_sample_database(&path)?;
            println!("Seeded sample database at {}", path.display());
        }
        Commands::Schema => {
            let catalog = SqliteCatalog::open(&config.database_url)?;
            print_json(&catalog.get_tables()?)?;
        }
        Commands::Ask { question, docs } => {
            let engine = RetrievalOrchestrator::connect(&config)?;
            ingest(&engine, &docs).await?;
            print_json(&engine.answer(&question))?;
        }
        Commands::Interactive { docs } => {
            let engine = RetrievalOrchestrator::connect(&config)?;
            ingest(&engine, &docs).await?;
            interactive(&engine).await?;
        }
    }

    Ok(())
}

fn path_str(path: &Path) -> Result<&str, Box<dyn Error>> {
    Ok(path.to_str().ok_or("config path is not valid UTF-8")?)
}

fn load_or_default(path: &Path) -> Result<EngineConfig, Box<dyn Error>> {
    if path.exists() {
        debug!("Loading config from: {}", path.display());
        config::load_config(path_str(path)?)
    } else {
        info!("No config at {}; using defaults", path.display());
        Ok(EngineConfig::default())
    }
}

/// Writes the default configuration unless a file is already there.
fn init(path: &Path) -> Result<(), Box<dyn Error>> {
    if path.exists() {
        warn!("{} already exists; leaving it untouched", path.display());
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        info!("Creating config directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }
    config::save_config(&EngineConfig::default(), path_str(path)?)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Reads every file concurrently, keeping the order they were given in.
async fn read_uploads(paths: &[PathBuf]) -> Result<Vec<Upload>, std::io::Error> {
    let reads = paths.iter().map(|path| async move {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok::<_, std::io::Error>(Upload::new(filename, bytes))
    });
    try_join_all(reads).await
}

async fn ingest(engine: &RetrievalOrchestrator, paths: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    if paths.is_empty() {
        return Ok(());
    }
    let uploads = read_uploads(paths).await?;
    let report = engine.ingest_documents(&uploads)?;
    for doc in &report.processed {
        info!("Indexed {} as {}", doc.filename, doc.document_id);
    }
    info!("{} documents indexed", report.total_indexed);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Question loop over stdin. Lines starting with `:` are session commands.
async fn interactive(engine: &RetrievalOrchestrator) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"nlq> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match line.trim() {
            "" => continue,
            ":quit" | ":q" | ":exit" => break,
            ":history" => print_json(&engine.history())?,
            ":schema" => print_json(&engine.schema())?,
            ":refresh" => {
                let tables = engine.refresh_schema()?;
                println!("Schema refreshed: {} tables", tables);
            }
            ":reset" => {
                engine.reset();
                println!("Session reset.");
            }
            question => print_json(&engine.answer(question))?,
        }
    }

    Ok(())
}
