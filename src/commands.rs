//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and an `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use nlq_engine::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Ask { question, docs } => println!("{question} ({} docs)", docs.len()),
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the YAML config file. Defaults to `config.yaml` in the platform config dir.
    #[arg(long, short = 'c', global = true, env = "NLQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file.
    Init,

    /// Create the sample company database.
    Seed {
        /// Where to create it. Defaults to the configured database path.
        #[arg(long, short = 'p')]
        path: Option<PathBuf>,
    },

    /// Print the schema snapshot as JSON.
    Schema,

    /// Answer a single question.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Documents to ingest before answering. Repeatable.
        #[arg(long = "doc", short = 'd')]
        docs: Vec<PathBuf>,
    },

    /// Read questions from stdin until `:quit`.
    ///
    /// This subcommand can be invoked with either 'i' or 'interactive'.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        #[arg(long = "doc", short = 'd')]
        docs: Vec<PathBuf>,
    },
}
