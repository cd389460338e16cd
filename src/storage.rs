//! Local persistence for booking outcomes.
//!
//! Outcomes are appended, one JSON object per line, to a single file:
//!
//! ```text
//! ~/.slotguard/outcomes.jsonl
//! ```

use std::{fs, io, path::PathBuf};

use io::{BufRead, Write};

use tracing::{debug, warn};

use crate::model::BookingOutcome;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// Somewhere finished bookings are reported to.
///
/// Reporting never fails the booking: implementations log and swallow
/// their own errors.
pub trait Reporter {
    fn report(&self, outcome: &BookingOutcome);
}

/// Append-only JSONL file of booking outcomes.
#[derive(Debug, Clone)]
pub struct OutcomeLog {
    path: PathBuf,
}

impl OutcomeLog {
    /// Opens a log at `path`. Parent directories are created if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Refers to a log at `path` without touching the filesystem. For
    /// reading; `append` fails if the parent directory is missing.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the default log path: `~/.slotguard/outcomes.jsonl`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".slotguard").join("outcomes.jsonl"))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn append(&self, outcome: &BookingOutcome) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(outcome)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Loads every outcome in append order. A missing file is an empty log.
    pub fn load(&self) -> Result<Vec<BookingOutcome>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = io::BufReader::new(file);
        let mut outcomes = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let outcome = serde_json::from_str(&line)
                .map_err(|source| StorageError::Json { line: i + 1, source })?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

impl Reporter for OutcomeLog {
    fn report(&self, outcome: &BookingOutcome) {
        match self.append(outcome) {
            Ok(()) => debug!(id = %outcome.id, path = %self.path.display(), "outcome recorded"),
            Err(e) => warn!(id = %outcome.id, error = %e, "failed to record outcome"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::Timestamp;
    use jiff::civil::{date, time};
    use tempfile::TempDir;
    use uuid::Uuid;

    use crate::model::{BookingState, SlotDetails};

    fn test_log() -> (TempDir, OutcomeLog) {
        let dir = TempDir::new().unwrap();
        let log = OutcomeLog::new(dir.path().join("nested").join("outcomes.jsonl")).unwrap();
        (dir, log)
    }

    fn sample(state: BookingState) -> BookingOutcome {
        BookingOutcome {
            id: Uuid::new_v4(),
            pupil_id: "pupil-7".into(),
            final_state: state,
            slot: Some(SlotDetails {
                date: date(2031, 3, 14),
                time: time(9, 40, 0, 0),
                test_centre: "Leeds".into(),
            }),
            confirmation_id: Some("conf_1_abc".into()),
            booking_id: None,
            reason: None,
            recorded_at: Timestamp::now(),
        }
    }

    #[test]
    fn missing_log_is_empty() {
        let (_dir, log) = test_log();
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn reading_creates_no_directories() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("absent");
        let log = OutcomeLog::at(parent.join("outcomes.jsonl"));

        assert!(log.load().unwrap().is_empty());
        assert!(!parent.exists());
    }

    #[test]
    fn outcomes_load_in_append_order() {
        let (_dir, log) = test_log();
        let first = sample(BookingState::Complete);
        let second = sample(BookingState::Cancelled);

        log.append(&first).unwrap();
        log.report(&second);

        assert_eq!(log.load().unwrap(), vec![first, second]);
    }

    #[test]
    fn corrupt_line_reports_its_number() {
        let (_dir, log) = test_log();
        log.append(&sample(BookingState::Complete)).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"{not json\n")
            .unwrap();

        let err = log.load().unwrap_err();
        assert!(matches!(err, StorageError::Json { line: 2, .. }));
    }

    #[test]
    fn report_swallows_write_failures() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every append fail.
        let log = OutcomeLog::new(dir.path().join("taken")).unwrap();
        fs::create_dir(log.path()).unwrap();

        log.report(&sample(BookingState::Timeout));
    }
}
