//! PoseCoach CLI
//!
//! Command-line front end for the stretch coach: replays recorded pose
//! frames through a coaching session and manages exercise configurations.
//!
//! # Usage
//!
//! ```bash
//! # Replay a recording as fast as possible
//! posecoach replay --input session.jsonl --exercise side_plank
//!
//! # Replay at 10 Hz, as a live camera would deliver it
//! posecoach replay -i session.jsonl --realtime --tick-ms 100
//!
//! # List the built-in exercises
//! posecoach exercises
//!
//! # Check a tuned configuration before shipping it
//! posecoach validate plank.json
//! ```

use clap::{Parser, Subcommand};

pub mod exercises;
pub mod replay;

/// PoseCoach Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "posecoach")]
#[command(author, version, about = "Real-time stretch coaching from pose keypoints")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run recorded pose frames through a coaching session
    Replay(replay::ReplayArgs),

    /// List the built-in exercises
    Exercises(exercises::ListArgs),

    /// Validate a stretch configuration file
    Validate(exercises::ValidateArgs),

    /// Write a built-in configuration to a file for tuning
    Export(exercises::ExportArgs),

    /// Display version information
    Version,
}

/// Output format shared by the commands
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text and tables
    #[default]
    Text,
    /// JSON
    Json,
}
