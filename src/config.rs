//! This module provides functionality for loading and handling the engine's configuration.
//!
//! It defines the [`EngineConfig`] struct, which holds every tunable of a session, and a
//! [`load_config`] function to load it from a YAML file. Every section carries
//! `#[serde(default)]`, so a config file only needs the keys it wants to change.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use nlq_engine::config::{EngineConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: EngineConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config);
//! ```
//!
//! A minimal file:
//!
//! ```yaml
//! database_url: "sqlite:///company_demo.db"
//! cache_ttl_secs: 60
//! embedding:
//!   backend: hashing
//! ```

use serde::{Deserialize, Serialize};
use std::{error::Error, fs};

use tracing::*;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Represents the engine's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite path or `sqlite:///path` URL of the structured data source.
    pub database_url: String,

    /// Lifetime of a cached answer, in seconds.
    pub cache_ttl_secs: i64,

    /// Number of documents returned by the semantic search path.
    pub search_top_k: usize,

    /// Number of history records kept; `None` keeps everything.
    pub history_limit: Option<usize>,

    /// Which embedder vectorises documents and questions.
    pub embedding: EmbeddingConfig,

    /// Keyword vocabularies that route questions.
    pub classifier: ClassifierConfig,

    /// Role bindings and limits of the query templates.
    pub translator: TranslatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///company_demo.db".to_string(),
            cache_ttl_secs: 300,
            search_top_k: 5,
            history_limit: Some(1000),
            embedding: EmbeddingConfig::default(),
            classifier: ClassifierConfig::default(),
            translator: TranslatorConfig::default(),
        }
    }
}

/// Embedding implementation selected by `embedding.backend`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// all-MiniLM-L6-v2 through Candle; downloaded from Hugging Face on first use.
    #[serde(rename = "minilm")]
    MiniLm,
    /// Offline feature hashing; no model download.
    Hashing,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,

    /// Hugging Face repository of the sentence model.
    pub model_id: String,

    /// Branch, tag or commit of `model_id`.
    pub revision: String,

    /// Vector length; must match the model's hidden size for `minilm`.
    pub dimension: usize,

    /// Tokens beyond this are truncated before embedding.
    pub max_sequence_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::MiniLm,
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            revision: "main".to_string(),
            dimension: 384,
            max_sequence_length: 256,
        }
    }
}

/// Keyword vocabularies for intent classification. Matching is case-insensitive substring
/// membership; document terms are checked first.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct ClassifierConfig {
    pub document_terms: Vec<String>,
    pub structured_terms: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            document_terms: strings(&[
                "resume", "resumes", "cv", "document", "review", "mention", "mentions",
            ]),
            structured_terms: strings(&[
                "count", "average", "avg", "sum", "how many", "top", "hired", "salary",
                "salaries", "employee", "department", "dept", "turnover", "list", "show",
            ]),
        }
    }
}

/// Logical roles used by the query templates, and the limits they obey.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Table the templates query.
    pub table: String,

    /// Numeric column averaged and ranked by salary questions.
    pub salary_column: String,

    /// Column grouped on by the per-group average.
    pub group_column: String,

    /// `YYYY-MM-DD` text column compared by the "hired" template.
    pub join_date_column: String,

    /// Free-text column filtered by listing questions.
    pub skills_column: String,

    /// Display name returned by the top-paid template.
    pub name_column: String,

    /// Words that name the rows of `table` in a question ("how many employees").
    pub entity_terms: Vec<String>,

    /// Skill / domain words recognised literally by the listing template.
    pub skill_keywords: Vec<String>,

    /// Row cap of the listing and "hired" templates.
    pub listing_limit: usize,

    /// Upper bound of N in "top N highest paid".
    pub max_top_n: i64,

    /// N when the question gives none.
    pub default_top_n: i64,

    /// Minimum similarity (0-100) for a fuzzy match to be used.
    pub fuzzy_threshold: f64,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            table: "employees".to_string(),
            salary_column: "annual_salary".to_string(),
            group_column: "dept_id".to_string(),
            join_date_column: "join_date".to_string(),
            skills_column: "skills".to_string(),
            name_column: "full_name".to_string(),
            entity_terms: strings(&["employee", "staff"]),
            skill_keywords: strings(&[
                "python", "java", "sql", "ml", "management", "hr", "product", "engineering",
                "leadership",
            ]),
            listing_limit: 500,
            max_top_n: 100,
            default_top_n: 10,
            fuzzy_threshold: 80.0,
        }
    }
}

/// Loads the engine's configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(EngineConfig)`: The loaded configuration, defaults filled in.
/// - `Err(Box<dyn Error>)`: An error occurred while reading the file or parsing the YAML.
pub fn load_config(file: &str) -> Result<EngineConfig, Box<dyn Error>> {
    debug!("Loading config: {:?}", file);
    let content = fs::read_to_string(file)?;
    let config: EngineConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Writes `config` as YAML to `file`.
pub fn save_config(config: &EngineConfig, file: &str) -> Result<(), Box<dyn Error>> {
    let yaml = serde_yaml::to_string(config)?;
    fs::write(file, yaml)?;
    info!("Wrote config to {}", file);
    Ok(())
}
