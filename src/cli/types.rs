//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qc")]
#[command(about = "Quality Control - monitoring tasks, checks and post-processing", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (YAML, or JSON by extension)
    #[arg(short, long, global = true, env = "QC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load and validate a configuration
    Validate {
        /// Configuration file; overrides --config
        path: Option<PathBuf>,
    },

    /// Run every active task on synthetic data, with checks, aggregators
    /// and post-processing, in-process
    Run {
        /// Configuration file; overrides --config
        path: Option<PathBuf>,

        /// Number of cycles to run
        #[arg(long, default_value = "3")]
        cycles: u64,

        /// Messages fed to each task instance per cycle
        #[arg(short, long, default_value = "100")]
        messages_per_cycle: u64,

        /// Seed of the synthetic data generator
        #[arg(long)]
        seed: Option<u64>,

        /// Run number of the activity; defaults to the configured one
        #[arg(long)]
        run: Option<u32>,
    },

    /// Inspect the object store
    #[command(subcommand)]
    Objects(ObjectsCommands),
}

#[derive(Subcommand, Debug)]
pub enum ObjectsCommands {
    /// List stored objects
    List {
        /// Only objects whose path starts with this prefix
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// Show the object valid now, and its versions
    Show {
        /// Object path, e.g. TST/MO/Random
        path: String,

        /// Object name
        name: String,

        /// Only versions of this run
        #[arg(short, long)]
        run: Option<u32>,
    },
}
