//! Exercise catalog and configuration commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use posecoach_coach::{catalog, ExerciseId, SessionConfig, StretchConfig};

use crate::OutputFormat;

/// Arguments for the exercises command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the validate command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Stretch configuration JSON file
    pub path: PathBuf,
}

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Exercise to export
    #[arg(short, long)]
    pub exercise: ExerciseId,

    /// Destination file
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Table row for an exercise
#[derive(Tabled)]
struct ExerciseRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Exercise")]
    display: String,
    #[tabled(rename = "Sides")]
    sides: String,
    #[tabled(rename = "Landmarks")]
    landmarks: String,
    #[tabled(rename = "Issues")]
    issues: String,
}

impl From<&StretchConfig> for ExerciseRow {
    fn from(cfg: &StretchConfig) -> Self {
        Self {
            name: cfg.exercise.name().to_string(),
            display: cfg.exercise.display_name().to_string(),
            sides: if cfg.unilateral { "left, right" } else { "both" }.to_string(),
            landmarks: cfg
                .required_keypoints
                .iter()
                .map(|p| format!("{p:?}").to_lowercase())
                .collect::<Vec<_>>()
                .join(", "),
            issues: cfg
                .rules_by_priority()
                .iter()
                .map(|r| r.issue.name())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Execute the exercises command
pub fn list(args: ListArgs) -> Result<()> {
    let configs = catalog::all();
    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&configs)?);
        }
        OutputFormat::Text => {
            let rows: Vec<ExerciseRow> = configs.iter().map(ExerciseRow::from).collect();
            let mut table = Table::new(rows);
            table.with(Style::rounded());
            println!("{table}");
        }
    }
    Ok(())
}

/// Load and check a configuration against the default session settings.
pub fn load_checked(path: &std::path::Path) -> Result<StretchConfig> {
    let cfg = StretchConfig::from_json(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    SessionConfig::default()
        .check_exercise(&cfg)
        .with_context(|| format!("{} does not fit the session defaults", path.display()))?;
    Ok(cfg)
}

/// Execute the validate command
pub fn validate(args: ValidateArgs) -> Result<()> {
    let cfg = load_checked(&args.path)?;
    println!(
        "{} {} ({} issue rules, {})",
        "[OK]".green().bold(),
        args.path.display(),
        cfg.issues.len(),
        cfg.exercise.display_name()
    );
    Ok(())
}

/// Execute the export command
pub fn export(args: ExportArgs) -> Result<()> {
    let cfg = catalog::builtin(args.exercise);
    cfg.to_json(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "{} Wrote {} to {}",
        "[OK]".green().bold(),
        args.exercise,
        args.output.display()
    );
    Ok(())
}
