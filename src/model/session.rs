//! Booking session: the lifecycle state and the data carried through it.

use std::fmt;

use jiff::Timestamp;
use jiff::civil::{Date, Time};
use serde::{Deserialize, Serialize};

/// Where a booking attempt stands in its lifecycle.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    /// Nothing is being monitored.
    #[default]
    Idle,

    /// Polling the booking site for an earlier slot.
    Searching,

    /// A slot was located; its details are on the session.
    Found,

    /// Waiting for the user to approve the slot.
    Confirming,

    /// The booking action is in flight.
    Booking,

    /// The booking action exceeded its deadline.
    Timeout,

    /// The attempt was abandoned: denied, blocked, or stopped.
    Cancelled,

    /// The booking went through.
    Complete,
}

impl BookingState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 8] = [
        Self::Idle,
        Self::Searching,
        Self::Found,
        Self::Confirming,
        Self::Booking,
        Self::Timeout,
        Self::Cancelled,
        Self::Complete,
    ];

    /// Upper-case name used in logs and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Searching => "SEARCHING",
            Self::Found => "FOUND",
            Self::Confirming => "CONFIRMING",
            Self::Booking => "BOOKING",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Complete => "COMPLETE",
        }
    }

    /// Terminal states only leave via an explicit reset.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled | Self::Complete)
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A test slot located on the booking site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDetails {
    pub date: Date,
    pub time: Time,
    pub test_centre: String,
}

/// Session data owned by the state machine.
///
/// `slot_details` is set on entering FOUND and kept for every later state.
/// `booking_id` is set only on entering BOOKING.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSession {
    pub state: BookingState,
    pub pupil_id: Option<String>,
    pub test_centre: Option<String>,
    pub slot_details: Option<SlotDetails>,
    pub confirmation_id: Option<String>,
    pub booking_id: Option<String>,

    /// Why the session ended, for TIMEOUT and CANCELLED.
    pub reason: Option<String>,
}

/// Data merged into the session alongside a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionPayload {
    pub pupil_id: Option<String>,
    pub test_centre: Option<String>,
    pub slot_details: Option<SlotDetails>,
    pub confirmation_id: Option<String>,
    pub booking_id: Option<String>,
    pub reason: Option<String>,
}

impl TransitionPayload {
    /// Payload for entering FOUND.
    #[must_use]
    pub fn slot(details: SlotDetails) -> Self {
        Self {
            slot_details: Some(details),
            ..Self::default()
        }
    }

    /// Payload for entering BOOKING.
    #[must_use]
    pub fn booking(booking_id: impl Into<String>) -> Self {
        Self {
            booking_id: Some(booking_id.into()),
            ..Self::default()
        }
    }

    /// Payload carrying only an end reason.
    #[must_use]
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_pupil(mut self, pupil_id: impl Into<String>, test_centre: impl Into<String>) -> Self {
        self.pupil_id = Some(pupil_id.into());
        self.test_centre = Some(test_centre.into());
        self
    }

    #[must_use]
    pub fn with_confirmation(mut self, confirmation_id: impl Into<String>) -> Self {
        self.confirmation_id = Some(confirmation_id.into());
        self
    }
}

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub from: BookingState,
    pub to: BookingState,
    pub at: Timestamp,
}
