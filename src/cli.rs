//! CLI argument parsing for the regulador simulator

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the final report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "regulador")]
#[command(version)]
#[command(
    about = "Drive the adaptive performance governor against a synthetic host",
    long_about = None
)]
pub struct Cli {
    /// Governor configuration file (TOML); defaults are used when omitted
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of host frames to simulate
    #[arg(short = 'n', long = "frames", value_name = "N", default_value = "600")]
    pub frames: u64,

    /// Nominal frame time of the synthetic host in milliseconds
    #[arg(long = "frame-ms", value_name = "MS", default_value = "16.0")]
    pub frame_ms: f64,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Print the default configuration as TOML and exit
    #[arg(long = "print-default-config")]
    pub print_default_config: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
