//! The confirmation gate: explicit, time-bounded human approval.
//!
//! No booking action may run without a [`ConfirmationResult`] whose
//! `confirmed` is `true`. The gate validates what it is about to show,
//! presents it through a [`Notifier`], waits for an answer or the timeout,
//! and records every decision in an append-only audit trail.
//!
//! A timeout is a result, not an error. The caller decides what to do with
//! the state machine afterwards.

use std::fmt::Write as _;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jiff::Timestamp;
use jiff::civil::{Date, DateTime, Time};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};

use crate::model::{
    AuditDecision, AuditEntry, BookingDetails, ConfirmationReason, ConfirmationResult,
};
use crate::validate::ValidationError;

/// Length of tokens produced by [`generate_secure_token`].
pub const TOKEN_LEN: usize = 32;

/// What the user is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub confirmation_id: String,

    /// Must be echoed back on approval.
    pub token: String,
    pub title: String,
    pub body: String,
    pub actions: Vec<String>,
}

/// How the user answered a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Approved, echoing the prompt's token.
    Approved { token: String },

    /// Explicitly declined.
    Denied,

    /// Closed without choosing. Treated as a denial.
    Dismissed,
}

/// A surface that can put a prompt in front of the user.
///
/// Implementations may take as long as they like; the gate bounds the wait.
pub trait Notifier {
    fn notify(&self, prompt: &ConfirmationPrompt) -> impl Future<Output = NotifyOutcome> + Send;
}

/// Presents booking opportunities and records every decision.
#[derive(Debug)]
pub struct ConfirmationGate<N> {
    notifier: N,
    timeout: Duration,
    user_agent: Option<String>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl<N: Notifier> ConfirmationGate<N> {
    pub fn new(notifier: N, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            user_agent: None,
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Attach the user agent reported with each result.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Ask the user to approve `details`.
    ///
    /// Invalid details are rejected before any prompt is shown. Every call,
    /// whatever its outcome, appends exactly one audit entry.
    pub async fn request_confirmation(
        &self,
        details: &BookingDetails,
    ) -> Result<ConfirmationResult, ValidationError> {
        let confirmation_id = generate_secure_id();

        if let Err(err) = check_booking_details(details, now_local()) {
            warn!(%confirmation_id, error = %err, "confirmation request rejected");
            self.record(AuditEntry {
                confirmation_id,
                details: details.clone(),
                decision: AuditDecision::Rejected {
                    message: err.to_string(),
                },
                recorded_at: Timestamp::now(),
            });
            return Err(err);
        }

        let prompt = build_prompt(&confirmation_id, details);
        let answer = tokio::time::timeout(self.timeout, self.notifier.notify(&prompt)).await;
        let reason = match answer {
            Ok(NotifyOutcome::Approved { token }) if token == prompt.token => {
                ConfirmationReason::UserApproved
            }
            Ok(NotifyOutcome::Approved { .. }) => {
                warn!(%confirmation_id, "approval carried the wrong token, treating as denial");
                ConfirmationReason::UserCancelled
            }
            Ok(NotifyOutcome::Denied | NotifyOutcome::Dismissed) => {
                ConfirmationReason::UserCancelled
            }
            Err(_) => ConfirmationReason::Timeout,
        };

        let result = ConfirmationResult {
            confirmed: reason == ConfirmationReason::UserApproved,
            reason,
            confirmation_id: confirmation_id.clone(),
            timestamp: Timestamp::now(),
            user_agent: self.user_agent.clone(),
        };
        info!(%confirmation_id, ?reason, "confirmation resolved");

        self.record(AuditEntry {
            confirmation_id,
            details: details.clone(),
            decision: AuditDecision::Resolved {
                result: result.clone(),
            },
            recorded_at: result.timestamp,
        });
        Ok(result)
    }

    /// A copy of the audit trail, oldest first.
    #[must_use]
    pub fn audit_trail(&self) -> Vec<AuditEntry> {
        self.audit_log().clone()
    }

    /// Empty the audit trail. For tests and debugging only.
    pub fn clear_audit_log(&self) {
        self.audit_log().clear();
    }

    fn record(&self, entry: AuditEntry) {
        self.audit_log().push(entry);
    }

    fn audit_log(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.audit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether `details` may be shown to the user right now.
///
/// False when a required field is blank, a date or time does not parse, or
/// the new test is not strictly in the future.
#[must_use]
pub fn validate_booking_details(details: &BookingDetails) -> bool {
    check_booking_details(details, now_local()).is_ok()
}

/// [`validate_booking_details`] evaluated at a fixed local time.
#[must_use]
pub fn validate_booking_details_at(details: &BookingDetails, now: DateTime) -> bool {
    check_booking_details(details, now).is_ok()
}

fn check_booking_details(details: &BookingDetails, now: DateTime) -> Result<(), ValidationError> {
    for (field, value) in [
        ("pupilName", &details.pupil_name),
        ("testCentre", &details.test_centre),
        ("newTestDate", &details.new_test_date),
        ("newTestTime", &details.new_test_time),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::new(field, format!("{field} is required")));
        }
    }

    let date: Date = details
        .new_test_date
        .trim()
        .parse()
        .map_err(|_| ValidationError::new("newTestDate", "Invalid test date"))?;
    let time = parse_time(&details.new_test_time)
        .ok_or_else(|| ValidationError::new("newTestTime", "Invalid test time"))?;

    if date.to_datetime(time) <= now {
        return Err(ValidationError::new(
            "newTestDate",
            "New test date must be in the future",
        ));
    }
    Ok(())
}

/// Accepts `HH:MM` as well as `HH:MM:SS`.
fn parse_time(raw: &str) -> Option<Time> {
    let raw = raw.trim();
    raw.parse()
        .ok()
        .or_else(|| format!("{raw}:00").parse().ok())
}

fn now_local() -> DateTime {
    jiff::Zoned::now().datetime()
}

fn build_prompt(confirmation_id: &str, details: &BookingDetails) -> ConfirmationPrompt {
    let mut body = format!(
        "{} at {}\nNew test: {} {}",
        details.pupil_name, details.test_centre, details.new_test_date, details.new_test_time
    );
    if let (Some(date), Some(time)) = (&details.current_test_date, &details.current_test_time) {
        let _ = write!(body, "\nCurrent test: {date} {time}");
    }

    ConfirmationPrompt {
        confirmation_id: confirmation_id.to_string(),
        token: generate_secure_token(),
        title: "Earlier test slot found".to_string(),
        body,
        actions: vec!["Book this slot".to_string(), "Skip".to_string()],
    }
}

/// A confirmation id: `conf_<unix millis>_<random base36>`.
#[must_use]
pub fn generate_secure_id() -> String {
    let millis = Timestamp::now().as_millisecond();
    let random: u64 = rand::thread_rng().gen_range(0..u64::MAX);
    format!("conf_{millis}_{}", to_base36(random))
}

/// A random alphanumeric token of [`TOKEN_LEN`] characters.
#[must_use]
pub fn generate_secure_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
