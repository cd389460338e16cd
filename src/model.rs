//! Core data model for slotguard.
//!
//! These types are shared across the safety core: the booking session and
//! its lifecycle states, pupil records, confirmation requests and results,
//! risk assessments, and persisted booking outcomes.

mod confirmation;
mod message;
mod outcome;
mod pupil;
mod risk;
mod session;

pub use confirmation::{
    AuditDecision, AuditEntry, BookingDetails, ConfirmationReason, ConfirmationResult,
};
pub use message::{FieldKind, FieldRule, MessageSchema};
pub use outcome::BookingOutcome;
pub use pupil::PupilRecord;
pub use risk::{RiskAssessment, RiskLevel};
pub use session::{BookingSession, BookingState, SlotDetails, TransitionPayload, TransitionRecord};
