//! CLI interface for Slotguard.
//!
//! Offline tools around the booking core: check records and messages
//! before they reach a live flow, sample the timing engine, and read back
//! what past attempts did. Each subcommand is non-interactive: arguments
//! in, structured output out.

mod format;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Value;

use slotguard::config::Config;
use slotguard::model::{MessageSchema, PupilRecord};
use slotguard::storage::OutcomeLog;
use slotguard::timing::{ActionType, TimingConfig, TimingContext, TimingEngine};
use slotguard::validate::{sanitize_pupil_data, validate_message};

use format::{format_keystrokes, format_outcome, format_timing_stats};

/// Slotguard: consent-gated, human-paced test booking.
#[derive(Debug, Parser)]
#[command(name = "slotguard")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sanitize a pupil record and print the result.
    ///
    /// The record is JSON with camelCase keys. Exits non-zero with the
    /// first problem found.
    ValidatePupil {
        /// Path to the pupil JSON.
        file: PathBuf,
    },

    /// Check an extension message against the known message types.
    ValidateMessage {
        /// Path to the message JSON: `{"type": ..., "data": {...}}`.
        file: PathBuf,
    },

    /// Sample intervals from the timing engine.
    Timing {
        /// Action to time.
        #[arg(long, value_enum, default_value = "click")]
        action: ActionArg,

        /// Number of intervals to draw.
        #[arg(long, default_value_t = 20)]
        count: usize,

        /// Seed for a reproducible run.
        #[arg(long)]
        seed: Option<u64>,

        /// Plain clamped Gaussian: no distraction, rush, or adaptation.
        #[arg(long)]
        steady: bool,

        /// Draw as if double-checking.
        #[arg(long, conflicts_with = "stress")]
        careful: bool,

        /// Draw as if hurrying.
        #[arg(long)]
        stress: bool,
    },

    /// Plan keystrokes for typing `text`, typos included.
    Typing {
        text: String,

        /// Seed for a reproducible run.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration.
    Config,

    /// List recorded booking outcomes.
    Outcomes {
        /// Outcome log to read. Defaults to `~/.slotguard/outcomes.jsonl`.
        file: Option<PathBuf>,

        /// Print raw JSON lines instead of a summary.
        #[arg(long)]
        json: bool,
    },
}

/// CLI-facing action type, mapped to the domain `ActionType`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ActionArg {
    Search,
    Click,
    Type,
    Scroll,
    Pause,
}

impl ActionArg {
    fn to_domain(self) -> ActionType {
        match self {
            Self::Search => ActionType::Search,
            Self::Click => ActionType::Click,
            Self::Type => ActionType::Type,
            Self::Scroll => ActionType::Scroll,
            Self::Pause => ActionType::Pause,
        }
    }
}

/// Run the CLI, returning an error message on failure.
pub fn run(config: &Config) -> Result<(), String> {
    let cli = Cli::parse();

    match cli.command {
        Command::ValidatePupil { file } => cmd_validate_pupil(&file),
        Command::ValidateMessage { file } => cmd_validate_message(&file),
        Command::Timing {
            action,
            count,
            seed,
            steady,
            careful,
            stress,
        } => {
            let timing = if steady {
                TimingConfig::steady()
            } else {
                config.timing_config()
            };
            let context = TimingContext { stress, careful };
            cmd_timing(timing, action.to_domain(), context, count, seed);
            Ok(())
        }
        Command::Typing { text, seed } => {
            let mut engine = TimingEngine::with_rng(config.timing_config(), rng(seed));
            println!("{}", format_keystrokes(&engine.simulate_human_typing(&text)));
            Ok(())
        }
        Command::Config => cmd_config(config),
        Command::Outcomes { file, json } => cmd_outcomes(file, json),
    }
}

fn cmd_validate_pupil(file: &Path) -> Result<(), String> {
    let record: PupilRecord = read_json(file)?;
    let clean = sanitize_pupil_data(&record).map_err(|e| format!("{}: {e}", e.field))?;
    let json = serde_json::to_string_pretty(&clean)
        .map_err(|e| format!("failed to serialize record: {e}"))?;
    println!("{json}");
    Ok(())
}

fn cmd_validate_message(file: &Path) -> Result<(), String> {
    let message: Value = read_json(file)?;
    if !validate_message(&message, &MessageSchema::extension()) {
        return Err(format!("{} is not a valid message", file.display()));
    }
    let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
    println!("valid {kind} message");
    Ok(())
}

fn cmd_timing(
    timing: TimingConfig,
    action: ActionType,
    context: TimingContext,
    count: usize,
    seed: Option<u64>,
) {
    let mut engine = TimingEngine::with_rng(timing, rng(seed));
    for _ in 0..count {
        println!("{}", engine.next_interval(action, context));
    }
    eprintln!("{}", format_timing_stats(&engine.stats()));
}

fn cmd_config(config: &Config) -> Result<(), String> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;
    match Config::path() {
        Some(path) if path.exists() => eprintln!("Loaded from {}", path.display()),
        Some(path) => eprintln!("No file at {}, using defaults", path.display()),
        None => eprintln!("No home directory, using defaults"),
    }
    println!("{json}");
    Ok(())
}

fn cmd_outcomes(file: Option<PathBuf>, json: bool) -> Result<(), String> {
    let path = match file {
        Some(path) => path,
        None => OutcomeLog::default_path().ok_or("could not determine home directory")?,
    };
    let log = OutcomeLog::at(path);
    let outcomes = log
        .load()
        .map_err(|e| format!("failed to read {}: {e}", log.path().display()))?;

    if outcomes.is_empty() {
        println!("No outcomes");
        return Ok(());
    }

    for outcome in &outcomes {
        if json {
            let line = serde_json::to_string(outcome)
                .map_err(|e| format!("failed to serialize outcome: {e}"))?;
            println!("{line}");
        } else {
            println!("{}", format_outcome(outcome));
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(file: &Path) -> Result<T, String> {
    let contents =
        fs::read_to_string(file).map_err(|e| format!("failed to read {}: {e}", file.display()))?;
    serde_json::from_str(&contents).map_err(|e| format!("invalid JSON in {}: {e}", file.display()))
}

fn rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}
