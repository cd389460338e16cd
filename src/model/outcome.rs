//! Booking outcomes handed to the persistence surface.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BookingState, SlotDetails};

/// How one booking attempt ended. Serialized as one line of JSONL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingOutcome {
    pub id: Uuid,
    pub pupil_id: String,
    pub final_state: BookingState,
    pub slot: Option<SlotDetails>,
    pub confirmation_id: Option<String>,
    pub booking_id: Option<String>,
    pub reason: Option<String>,
    pub recorded_at: Timestamp,
}
