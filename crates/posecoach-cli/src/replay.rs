//! Replay recorded pose frames through a coaching session.
//!
//! Input is JSON Lines, one [`PoseFrame`] per line:
//!
//! ```text
//! {"frame_id":1,"timestamp_ms":100,"keypoints":[{"name":"left_hip","x":0.51,"y":0.62,"confidence":0.93}]}
//! ```
//!
//! Without `--realtime` every frame is ticked immediately, using the frame
//! timestamps as the session clock. With `--realtime` frames are pulled by a
//! [`TickLoop`] at the configured rate and Ctrl-C stops the replay. Speech
//! goes to the log (`RUST_LOG=info`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::watch;

use posecoach_coach::{
    catalog, CoachSession, CoachingCue, ExerciseId, FrameInput, FsmKey, FsmState,
    InMemoryTelemetry, PoseSource, PoseSourceError, SessionConfig, SessionSummary, StretchConfig,
    TemplateCueSource, TickLoop, TracingSpeechBackend,
};
use posecoach_core::PoseFrame;

use crate::OutputFormat;

/// Arguments for the replay command
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// JSON Lines file with one pose frame per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Exercise to coach (defaults to plank, or to the one in --config)
    #[arg(short, long)]
    pub exercise: Option<ExerciseId>,

    /// Stretch configuration JSON replacing the built-in one
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pull frames at the tick rate instead of as fast as possible
    #[arg(long)]
    pub realtime: bool,

    /// Tick period in milliseconds for --realtime
    #[arg(long, default_value = "100")]
    pub tick_ms: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Reads pose frames from a JSON Lines file.
pub struct JsonlPoseSource {
    name: String,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl JsonlPoseSource {
    /// Open `path` for reading.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            name: path.display().to_string(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

#[async_trait::async_trait]
impl PoseSource for JsonlPoseSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_frame(&mut self) -> Result<Option<PoseFrame>, PoseSourceError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| PoseSourceError::Inference(e.to_string()))?;
            self.line_no += 1;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).map(Some).map_err(|e| {
                PoseSourceError::Inference(format!("line {}: {e}", self.line_no))
            });
        }
    }
}

/// Resolve the stretch configuration from the arguments.
pub fn resolve_config(args: &ReplayArgs) -> Result<StretchConfig> {
    let Some(path) = &args.config else {
        return Ok(catalog::builtin(args.exercise.unwrap_or(ExerciseId::Plank)));
    };

    let cfg = crate::exercises::load_checked(path)?;
    if let Some(exercise) = args.exercise {
        anyhow::ensure!(
            exercise == cfg.exercise,
            "--exercise {} does not match {} in {}",
            exercise,
            cfg.exercise,
            path.display()
        );
    }
    Ok(cfg)
}

/// Execute the replay command
pub async fn execute(args: ReplayArgs) -> Result<()> {
    let stretch = resolve_config(&args)?;
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let mut session = CoachSession::new(
        SessionConfig::default(),
        stretch,
        Arc::new(TemplateCueSource::new()),
        Arc::new(TracingSpeechBackend),
        telemetry.clone(),
    )?;
    let mut source = JsonlPoseSource::open(&args.input).await?;

    if args.format == OutputFormat::Text {
        println!(
            "{} Replaying {} as {}",
            "[COACH]".bright_cyan().bold(),
            args.input.display(),
            session.exercise().display_name()
        );
        println!();
    }

    if args.realtime {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });
        TickLoop::new(args.tick_ms)
            .run(&mut source, &mut session, rx)
            .await;
    } else {
        replay_all(&mut source, &mut session, args.format).await?;
    }

    let summary = session.end().await;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_summary(&summary, &telemetry),
    }
    Ok(())
}

/// Tick every frame of `source` without pacing.
async fn replay_all(
    source: &mut JsonlPoseSource,
    session: &mut CoachSession,
    format: OutputFormat,
) -> Result<()> {
    let mut previous: Vec<(FsmKey, FsmState)> = Vec::new();

    loop {
        let input = match source.next_frame().await {
            Ok(Some(frame)) => FrameInput::Pose(frame),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable frame");
                let timestamp = session
                    .last_timestamp()
                    .map_or(posecoach_core::Timestamp::ZERO, |t| t.add_millis(1));
                FrameInput::Unavailable { timestamp }
            }
        };

        let report = session.tick(input).await;
        if report.stale {
            continue;
        }

        if format == OutputFormat::Text {
            for (key, state) in &report.states {
                let changed = previous
                    .iter()
                    .find(|(k, _)| k == key)
                    .map_or(true, |(_, s)| s != state);
                if changed {
                    println!(
                        "{} {} {}",
                        format!("[{:>8}]", report.timestamp.to_string()).dimmed(),
                        key,
                        format_state(*state)
                    );
                }
            }
        }
        previous = report.states.clone();

        if let Some(cue) = &report.cue {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(cue)?),
                OutputFormat::Text => print_cue(cue, report.enqueue.map(|e| format!("{e:?}"))),
            }
        }
    }
    Ok(())
}

fn format_state(state: FsmState) -> colored::ColoredString {
    let label = state.to_string();
    match state {
        FsmState::Waiting => label.dimmed(),
        FsmState::Ready => label.yellow(),
        FsmState::Holding => label.green(),
        FsmState::CoachIssue => label.red().bold(),
        FsmState::Cooldown => label.blue(),
    }
}

fn print_cue(cue: &CoachingCue, enqueue: Option<String>) {
    println!(
        "{} {} {} \"{}\"{}",
        format!("[{:>8}]", cue.issued_at.to_string()).dimmed(),
        format!("[{}]", cue.priority).bold(),
        cue.key().to_string().cyan(),
        cue.text,
        if cue.fallback { " (canned)" } else { "" }
    );
    if let Some(outcome) = enqueue {
        println!("           {} {}", "speech:".dimmed(), outcome);
    }
}

#[derive(Tabled)]
struct CounterRow {
    #[tabled(rename = "Counter")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: u64,
}

fn print_summary(summary: &SessionSummary, telemetry: &InMemoryTelemetry) {
    let s = &summary.stats;
    let rows = vec![
        CounterRow { name: "Ticks", value: s.ticks },
        CounterRow { name: "Unavailable", value: s.unavailable },
        CounterRow { name: "Skipped", value: s.skipped },
        CounterRow { name: "Out of order", value: s.stale },
        CounterRow { name: "Issues", value: s.issues },
        CounterRow { name: "Resolved", value: s.resolved },
        CounterRow { name: "Cues", value: s.cues },
        CounterRow { name: "Suppressed", value: s.suppressed },
        CounterRow {
            name: "Visibility drops",
            value: telemetry.count("visibility_drop") as u64,
        },
    ];

    println!();
    println!("{}", "Session Summary".bold().cyan());
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(config: Option<PathBuf>, exercise: Option<ExerciseId>) -> ReplayArgs {
        ReplayArgs {
            input: PathBuf::from("frames.jsonl"),
            exercise,
            config,
            realtime: false,
            tick_ms: 100,
            format: OutputFormat::Text,
        }
    }

    #[tokio::test]
    async fn test_jsonl_source_reads_frames() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"frame_id":1,"timestamp_ms":0,"keypoints":[{{"name":"left_hip","x":0.5,"y":0.6,"confidence":0.9}}]}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"timestamp_ms":100}}"#).unwrap();

        let mut source = JsonlPoseSource::open(file.path()).await.unwrap();

        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(first.timestamp.as_millis(), 0);
        assert_eq!(first.visible_keypoint_count(), 1);

        match source.next_frame().await {
            Err(PoseSourceError::Inference(msg)) => assert!(msg.starts_with("line 3")),
            other => panic!("expected a parse failure, got {other:?}"),
        }

        let last = source.next_frame().await.unwrap().unwrap();
        assert_eq!(last.timestamp.as_millis(), 100);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[test]
    fn test_resolve_builtin() {
        let cfg = resolve_config(&args(None, Some(ExerciseId::HamstringStretch))).unwrap();
        assert_eq!(cfg.exercise, ExerciseId::HamstringStretch);

        let cfg = resolve_config(&args(None, None)).unwrap();
        assert_eq!(cfg.exercise, ExerciseId::Plank);
    }

    #[test]
    fn test_resolve_rejects_mismatched_exercise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plank.json");
        catalog::builtin(ExerciseId::Plank).to_json(&path).unwrap();

        assert!(resolve_config(&args(Some(path.clone()), None)).is_ok());
        assert!(resolve_config(&args(Some(path), Some(ExerciseId::SidePlank))).is_err());
    }

    #[tokio::test]
    async fn test_replay_empty_recording() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut replay_args = args(None, None);
        replay_args.input = file.path().to_path_buf();
        replay_args.format = OutputFormat::Json;

        execute(replay_args).await.unwrap();
    }
}
