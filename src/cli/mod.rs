use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "featureflow")]
#[command(about = "Reactive, event-driven feature workflows")]
#[command(long_about = "FeatureFlow runs workflows made of features connected by typed transitions. \
                       Each feature reports result events and the state machine moves to the next \
                       feature, forwards the event or completes the run. Try 'featureflow demo'.")]
pub struct Cli {
    /// Configuration file to use instead of ./featureflow.toml
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sample capture, review and upload workflow
    Demo {
        /// Number of frames the capture step records
        #[arg(long, default_value = "3", help = "Frames to capture before review")]
        frames: u32,
        /// Make the review step reject the capture
        #[arg(long, help = "Reject the capture during review and exit with an error")]
        fail: bool,
        /// Print workflow events as JSON lines
        #[arg(long, help = "Emit one JSON object per workflow event")]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write the effective configuration to a file
        #[arg(long, help = "File to save the effective configuration to")]
        output: Option<PathBuf>,
    },
}
