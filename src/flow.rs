//! One pupil's booking attempt, end to end.
//!
//! ```text
//! slot found -> FOUND -> CONFIRMING -> ask the user
//!   denied / timed out           -> CANCELLED
//!   approved -> BOOKING -> lock "booking:<pupil>" -> stealth -> action
//!     completed                  -> COMPLETE
//!     blocked / failed           -> CANCELLED
//!     deadline passed            -> TIMEOUT
//! ```
//!
//! Every attempt that reaches a terminal state is handed to the reporter.

use std::future::Future;
use std::time::Duration;

use jiff::Timestamp;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::confirm::{ConfirmationGate, Notifier};
use crate::lock::LockManager;
use crate::machine::{BookingStateMachine, TransitionError};
use crate::model::{
    BookingDetails, BookingOutcome, BookingState, ConfirmationReason, PupilRecord, SlotDetails,
    TransitionPayload,
};
use crate::stealth::{StealthContext, StealthCoordinator, StealthOutcome};
use crate::storage::Reporter;
use crate::timing::{ActionType, IntervalSource};
use crate::validate::{ValidationError, sanitize_pupil_data};

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub type Result<T> = core::result::Result<T, FlowError>;

/// Composes the gate, lock, state machine and stealth coordinator for one
/// pupil.
pub struct BookingFlow<N, T, P> {
    pupil_id: String,
    pupil: PupilRecord,
    machine: BookingStateMachine,
    gate: ConfirmationGate<N>,
    stealth: StealthCoordinator<T>,
    locks: LockManager,
    reporter: P,
}

impl<N, T, P> BookingFlow<N, T, P>
where
    N: Notifier,
    T: IntervalSource,
    P: Reporter,
{
    /// The pupil record is sanitized up front; an invalid record is refused.
    pub fn new(
        pupil_id: impl Into<String>,
        pupil: &PupilRecord,
        gate: ConfirmationGate<N>,
        stealth: StealthCoordinator<T>,
        locks: LockManager,
        reporter: P,
    ) -> Result<Self> {
        Ok(Self {
            pupil_id: pupil_id.into(),
            pupil: sanitize_pupil_data(pupil)?,
            machine: BookingStateMachine::new(),
            gate,
            stealth,
            locks,
            reporter,
        })
    }

    /// Bound how long the booking action may run.
    #[must_use]
    pub fn with_booking_deadline(mut self, deadline: Duration) -> Self {
        self.machine = BookingStateMachine::with_booking_deadline(deadline);
        self
    }

    #[must_use]
    pub fn state(&self) -> BookingState {
        self.machine.state()
    }

    #[must_use]
    pub fn machine(&self) -> &BookingStateMachine {
        &self.machine
    }

    #[must_use]
    pub fn gate(&self) -> &ConfirmationGate<N> {
        &self.gate
    }

    #[must_use]
    pub fn stealth(&self) -> &StealthCoordinator<T> {
        &self.stealth
    }

    #[must_use]
    pub fn reporter(&self) -> &P {
        &self.reporter
    }

    /// The key every booking action for this pupil is serialized under.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("booking:{}", self.pupil_id)
    }

    /// IDLE -> SEARCHING.
    pub fn start_search(&mut self) -> Result<()> {
        self.machine.transition_with(
            BookingState::Searching,
            TransitionPayload::default().with_pupil(&self.pupil_id, &self.pupil.test_centre),
        )?;
        Ok(())
    }

    /// Handle a slot reported by the site poller.
    ///
    /// `book` is the action that claims the slot. It runs only after the
    /// user has explicitly approved, under the pupil's booking lock and
    /// inside the stealth coordinator. Returns the reported outcome.
    pub async fn on_slot_found<F, Fut, E>(
        &mut self,
        slot: SlotDetails,
        book: F,
    ) -> Result<BookingOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = core::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.machine.state() == BookingState::Idle {
            self.start_search()?;
        }
        let details = self.booking_details(&slot);
        self.machine
            .transition_with(BookingState::Found, TransitionPayload::slot(slot))?;
        self.machine.transition_to(BookingState::Confirming)?;

        let confirmation = match self.gate.request_confirmation(&details).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                self.finish(
                    BookingState::Cancelled,
                    TransitionPayload::reason(format!("invalid booking details: {err}")),
                )?;
                return Err(err.into());
            }
        };

        if !confirmation.confirmed {
            let reason = match confirmation.reason {
                ConfirmationReason::Timeout => "confirmation timed out",
                _ => "declined by user",
            };
            return self.finish(
                BookingState::Cancelled,
                TransitionPayload::reason(reason).with_confirmation(confirmation.confirmation_id),
            );
        }

        self.machine.transition_with(
            BookingState::Booking,
            TransitionPayload::booking(Uuid::new_v4().to_string())
                .with_confirmation(confirmation.confirmation_id),
        )?;

        let key = self.lock_key();
        let context = StealthContext {
            complexity: 1.5,
            importance: 2.0,
            ..StealthContext::default()
        };
        let attempt = self.locks.acquire(&key, || {
            self.stealth.execute(ActionType::Click, &context, book)
        });
        let outcome = match self.machine.booking_deadline() {
            Some(deadline) => tokio::time::timeout(deadline, attempt).await.ok(),
            None => Some(attempt.await),
        };

        match outcome {
            Some(StealthOutcome::Completed { .. }) => {
                self.finish(BookingState::Complete, TransitionPayload::default())
            }
            Some(StealthOutcome::Blocked { reason, .. }) => self.finish(
                BookingState::Cancelled,
                TransitionPayload::reason(format!("blocked: {reason}")),
            ),
            Some(StealthOutcome::Failed { error, .. }) => self.finish(
                BookingState::Cancelled,
                TransitionPayload::reason(format!("booking failed: {error}")),
            ),
            None => {
                warn!(%key, "booking deadline passed");
                if !self.machine.check_deadline(Instant::now())? {
                    self.machine.transition_with(
                        BookingState::Timeout,
                        TransitionPayload::reason("booking deadline passed"),
                    )?;
                }
                Ok(self.report())
            }
        }
    }

    /// Abandon the attempt from any non-terminal state.
    pub fn cancel(&mut self, reason: &str) -> Result<BookingOutcome> {
        self.finish(BookingState::Cancelled, TransitionPayload::reason(reason))
    }

    /// Back to IDLE for the next attempt.
    pub fn reset(&mut self) {
        self.machine.reset();
    }

    fn booking_details(&self, slot: &SlotDetails) -> BookingDetails {
        BookingDetails {
            pupil_name: self.pupil.name.clone(),
            test_centre: slot.test_centre.clone(),
            current_test_date: None,
            current_test_time: None,
            new_test_date: slot.date.to_string(),
            new_test_time: slot.time.strftime("%H:%M").to_string(),
        }
    }

    fn finish(&mut self, state: BookingState, payload: TransitionPayload) -> Result<BookingOutcome> {
        self.machine.transition_with(state, payload)?;
        Ok(self.report())
    }

    fn report(&self) -> BookingOutcome {
        let session = self.machine.session();
        let outcome = BookingOutcome {
            id: Uuid::new_v4(),
            pupil_id: self.pupil_id.clone(),
            final_state: session.state,
            slot: session.slot_details.clone(),
            confirmation_id: session.confirmation_id.clone(),
            booking_id: session.booking_id.clone(),
            reason: session.reason.clone(),
            recorded_at: Timestamp::now(),
        };
        info!(
            pupil = %self.pupil_id,
            state = %outcome.final_state,
            reason = outcome.reason.as_deref().unwrap_or(""),
            "booking attempt finished"
        );
        self.reporter.report(&outcome);
        outcome
    }
}
