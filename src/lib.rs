//! # nlq-engine (library root)
//!
//! Answers natural-language questions over a SQLite database and a set of uploaded
//! documents. Each question is routed to one or both retrieval paths:
//!
//! - **structured**: template translation into a parameterized read query (`translator`),
//!   executed against the schema catalog (`catalog`);
//! - **unstructured**: nearest-neighbour search over document embeddings (`vector_store`).
//!
//! The [`engine::RetrievalOrchestrator`] ties the pieces together and wraps them in an
//! expiring answer cache (`cache`) and a question history (`history`).
//!
//! ## Modules
//! - [`catalog`]: schema snapshot, read-only query execution, sample database seeding.
//! - [`documents`]: text extraction and the ingested document collection.
//! - [`vector_store`]: embedders (Candle MiniLM, feature hashing) and the similarity index.
//! - [`classifier`]: rule-table intent classification.
//! - [`fuzzy`]: edit-distance similarity used for schema term resolution.
//! - [`translator`]: question templates and schema-aware role binding.
//! - [`cache`], [`history`]: answer cache and question log.
//! - [`engine`]: the session facade.
//! - [`commands`], [`config`]: CLI definition and YAML configuration.

use directories::ProjectDirs;
use std::error::Error;

pub mod cache;
pub mod catalog;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod documents;
pub mod engine;
pub mod fuzzy;
pub mod history;
pub mod translator;
pub mod vector_store;

/// Return the per-platform configuration directory used by `nlq`.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "nlq-engine", "nlq")`, e.g. `~/.config/nlq` on Linux.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined.
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "nlq-engine", "nlq")
        .ok_or("Unable to determine config directory")?;
    let config_dir = proj_dirs.config_dir().to_path_buf();

    Ok(config_dir)
}
