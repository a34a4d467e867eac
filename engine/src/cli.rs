//! CLI interface for Wayfarer
//!
//! This module provides the command-line interface using clap's derive API.
//! The intake HTTP server ships as its own binary in the api-server crate;
//! this binary covers one-shot extraction, full pipeline runs, and store
//! maintenance.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Wayfarer travel itinerary engine
///
/// Turns a free-text travel request into structured intent and, when the
/// request is complete, a researched itinerary.
#[derive(Parser, Debug)]
#[command(name = "wayfarer")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract structured intent from a request without running the pipeline
    Extract {
        /// The travel request text
        text: String,
    },

    /// Run a request through the full research pipeline and wait
    Run {
        /// The travel request text
        text: String,
    },

    /// Show the stored record for a fingerprint
    Status {
        /// Request fingerprint (hex SHA-256)
        fingerprint: String,
    },

    /// Delete request records past their retention window
    Gc,
}
