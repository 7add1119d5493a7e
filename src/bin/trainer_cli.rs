use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drum_trainer::config::AppConfig;
use drum_trainer::correlator::RawDeviceEvent;
use drum_trainer::export;
use drum_trainer::pose::LandmarkFrame;
use drum_trainer::session::SessionState;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(
    name = "trainer_cli",
    about = "Offline session replay harness for the drum trainer"
)]
struct Cli {
    /// Override path to the trainer config JSON
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded session fixture and print each judged hit as JSON
    Replay {
        #[arg(long)]
        fixture: PathBuf,
        /// Override the fixture's starting tempo
        #[arg(long)]
        bpm: Option<u32>,
        /// Override the fixture's subdivision
        #[arg(long)]
        subdivision: Option<u32>,
        /// Write the JSON lines to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replay a fixture and write the labelled training CSV
    Export {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Replay a fixture and print the end-of-session summary
    Summary {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// A recorded session: starting parameters plus a chronological event trace.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFixture {
    #[serde(default)]
    bpm: Option<u32>,
    #[serde(default)]
    subdivision: Option<u32>,
    events: Vec<FixtureEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FixtureEvent {
    Tick { timestamp_ms: f64 },
    Frame(LandmarkFrame),
    Hit(RawDeviceEvent),
}

impl FixtureEvent {
    fn timestamp_ms(&self) -> f64 {
        match self {
            FixtureEvent::Tick { timestamp_ms } => *timestamp_ms,
            FixtureEvent::Frame(frame) => frame.timestamp_ms,
            FixtureEvent::Hit(event) => event.timestamp_ms,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Replay {
            fixture,
            bpm,
            subdivision,
            output,
        } => run_replay(config, &fixture, bpm, subdivision, output),
        Commands::Export { fixture, output } => run_export(config, &fixture, &output),
        Commands::Summary { fixture, output } => run_summary(config, &fixture, output),
    }
}

fn load_fixture(path: &PathBuf) -> Result<SessionFixture> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    let mut fixture: SessionFixture = serde_json::from_str(&raw)
        .with_context(|| format!("parsing fixture {}", path.display()))?;
    fixture
        .events
        .sort_by(|a, b| a.timestamp_ms().total_cmp(&b.timestamp_ms()));
    Ok(fixture)
}

/// Drive a fresh session through the fixture trace.
fn replay(config: AppConfig, fixture: &SessionFixture) -> Result<(SessionState, f64)> {
    let mut state = SessionState::new(config);
    if let Some(bpm) = fixture.bpm {
        state.set_bpm(bpm)?;
    }
    if let Some(subdivision) = fixture.subdivision {
        state.set_subdivision(subdivision)?;
    }

    let start = fixture.events.first().map_or(0.0, FixtureEvent::timestamp_ms);
    let end = fixture.events.last().map_or(0.0, FixtureEvent::timestamp_ms);
    state.start(start);

    for event in &fixture.events {
        match event {
            FixtureEvent::Tick { timestamp_ms } => {
                state.on_scheduler_fire(*timestamp_ms);
            }
            FixtureEvent::Frame(frame) => state.on_landmark_frame(frame),
            FixtureEvent::Hit(hit) => {
                state.on_raw_hit(hit);
            }
        }
    }
    state.stop(end);
    Ok((state, end))
}

fn run_replay(
    config: AppConfig,
    fixture_path: &PathBuf,
    bpm: Option<u32>,
    subdivision: Option<u32>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut fixture = load_fixture(fixture_path)?;
    if bpm.is_some() {
        fixture.bpm = bpm;
    }
    if subdivision.is_some() {
        fixture.subdivision = subdivision;
    }
    let (state, _) = replay(config, &fixture)?;

    let mut lines = String::new();
    for hit in &state.hits {
        lines.push_str(&serde_json::to_string(hit)?);
        lines.push('\n');
    }
    if let Some(path) = output {
        fs::write(&path, lines).with_context(|| format!("writing {}", path.display()))?;
    } else {
        print!("{lines}");
    }
    Ok(ExitCode::from(0))
}

fn run_export(config: AppConfig, fixture_path: &PathBuf, output: &PathBuf) -> Result<ExitCode> {
    let fixture = load_fixture(fixture_path)?;
    let (state, _) = replay(config, &fixture)?;

    let records = export::collect_records(&state);
    export::write_csv(output, &records)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("{} rows -> {}", records.len(), output.display());
    Ok(ExitCode::from(0))
}

fn run_summary(
    config: AppConfig,
    fixture_path: &PathBuf,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let fixture = load_fixture(fixture_path)?;
    let (state, end) = replay(config, &fixture)?;

    let summary = state.summary(end);
    let json = serde_json::to_string_pretty(&summary)?;
    if let Some(path) = output {
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    } else {
        println!("{json}");
    }
    Ok(ExitCode::from(0))
}
