//! Confirmation types: what the user is asked to approve and what they answered.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A booking opportunity presented to the user for approval.
///
/// Dates are `YYYY-MM-DD` and times `HH:MM`, as scraped from the booking
/// site. They are parsed during validation, not on construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetails {
    pub pupil_name: String,
    pub test_centre: String,

    /// The pupil's existing test, if they hold one.
    pub current_test_date: Option<String>,
    pub current_test_time: Option<String>,

    pub new_test_date: String,
    pub new_test_time: String,
}

/// Why a confirmation resolved the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationReason {
    UserApproved,
    UserCancelled,
    Timeout,
}

/// The answer to a confirmation request.
///
/// Only `confirmed == true` permits a booking action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResult {
    pub confirmed: bool,
    pub reason: ConfirmationReason,
    pub confirmation_id: String,
    pub timestamp: Timestamp,
    pub user_agent: Option<String>,
}

/// What the gate decided for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum AuditDecision {
    /// The request was presented and resolved.
    Resolved { result: ConfirmationResult },

    /// The request failed validation and was never presented.
    Rejected { message: String },
}

/// One entry in the confirmation audit trail. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub confirmation_id: String,
    pub details: BookingDetails,
    pub decision: AuditDecision,
    pub recorded_at: Timestamp,
}

impl AuditEntry {
    /// Whether this entry records an explicit approval.
    #[must_use]
    pub fn approved(&self) -> bool {
        matches!(&self.decision, AuditDecision::Resolved { result } if result.confirmed)
    }
}
