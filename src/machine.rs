//! The booking state machine: the only writer of a [`BookingSession`].
//!
//! ```text
//! IDLE -> SEARCHING -> FOUND -> CONFIRMING -> BOOKING -> COMPLETE
//!                                                     \-> TIMEOUT
//! any non-terminal state -> CANCELLED
//! terminal state -> IDLE      (reset only)
//! ```
//!
//! BOOKING is only reachable through FOUND and CONFIRMING, so a booking
//! action cannot run before a slot was located and consent was sought.
//! Transitions are synchronous: validation and mutation happen in one call
//! with no suspension point between them.

use std::time::Duration;

use jiff::Timestamp;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::model::{BookingSession, BookingState, TransitionPayload, TransitionRecord};

/// A transition was refused. The session is untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: BookingState, to: BookingState },

    #[error("transition to {to} requires {field}")]
    MissingPayload {
        to: BookingState,
        field: &'static str,
    },

    #[error("{field} cannot be set on transition to {to}")]
    UnexpectedPayload {
        to: BookingState,
        field: &'static str,
    },
}

pub type Result<T> = core::result::Result<T, TransitionError>;

/// Whether `from -> to` is an edge of the lifecycle.
#[must_use]
pub const fn is_allowed(from: BookingState, to: BookingState) -> bool {
    use BookingState as S;

    match (from, to) {
        (S::Idle, S::Searching)
        | (S::Searching, S::Found)
        | (S::Found, S::Confirming)
        | (S::Confirming, S::Booking)
        | (S::Booking, S::Complete | S::Timeout) => true,
        (from, S::Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

/// Owns one booking session and drives it through the lifecycle.
#[derive(Debug, Default)]
pub struct BookingStateMachine {
    session: BookingSession,
    history: Vec<TransitionRecord>,
    booking_deadline: Option<Duration>,
    booking_started: Option<Instant>,
}

impl BookingStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A machine whose BOOKING state times out after `deadline`.
    #[must_use]
    pub fn with_booking_deadline(deadline: Duration) -> Self {
        Self {
            booking_deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> BookingState {
        self.session.state
    }

    /// Read-only view of the session.
    #[must_use]
    pub fn session(&self) -> &BookingSession {
        &self.session
    }

    /// Transitions applied since the last reset, oldest first.
    #[must_use]
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    #[must_use]
    pub fn booking_deadline(&self) -> Option<Duration> {
        self.booking_deadline
    }

    /// Transition without payload.
    pub fn transition_to(&mut self, target: BookingState) -> Result<()> {
        self.transition_with(target, TransitionPayload::default())
    }

    /// Transition to `target`, merging `payload` into the session.
    ///
    /// Entering FOUND requires slot details; entering BOOKING requires a
    /// booking id. Slot details are only accepted on FOUND and a booking id
    /// only on BOOKING. On any error the session is left as it was.
    pub fn transition_with(&mut self, target: BookingState, payload: TransitionPayload) -> Result<()> {
        let from = self.session.state;
        if !is_allowed(from, target) {
            warn!(%from, to = %target, "refused state transition");
            return Err(TransitionError::InvalidTransition { from, to: target });
        }

        let next = merge(&self.session, target, payload)?;
        self.session = next;
        self.history.push(TransitionRecord {
            from,
            to: target,
            at: Timestamp::now(),
        });
        self.booking_started = (target == BookingState::Booking).then(Instant::now);

        info!(%from, to = %target, "state transition");
        Ok(())
    }

    /// Drive an overdue BOOKING state to TIMEOUT.
    ///
    /// Returns `true` if the transition was made. Does nothing outside
    /// BOOKING or when no deadline is configured.
    pub fn check_deadline(&mut self, now: Instant) -> Result<bool> {
        let (Some(deadline), Some(started)) = (self.booking_deadline, self.booking_started) else {
            return Ok(false);
        };
        if self.session.state != BookingState::Booking || now.duration_since(started) < deadline {
            return Ok(false);
        }
        self.transition_with(
            BookingState::Timeout,
            TransitionPayload::reason(format!(
                "booking exceeded {}s deadline",
                deadline.as_secs()
            )),
        )?;
        Ok(true)
    }

    /// Return to IDLE and drop all session data and history.
    pub fn reset(&mut self) {
        self.session = BookingSession::default();
        self.history.clear();
        self.booking_started = None;
    }
}

/// Build the session that results from applying `payload` on entering `to`.
fn merge(
    current: &BookingSession,
    to: BookingState,
    payload: TransitionPayload,
) -> Result<BookingSession> {
    let mut next = current.clone();
    next.state = to;

    match (to, payload.slot_details) {
        (BookingState::Found, Some(slot)) => next.slot_details = Some(slot),
        (BookingState::Found, None) => {
            return Err(TransitionError::MissingPayload {
                to,
                field: "slot details",
            });
        }
        (_, Some(_)) => {
            return Err(TransitionError::UnexpectedPayload {
                to,
                field: "slot details",
            });
        }
        (_, None) => {}
    }

    match (to, payload.booking_id) {
        (BookingState::Booking, Some(id)) => next.booking_id = Some(id),
        (BookingState::Booking, None) => {
            return Err(TransitionError::MissingPayload {
                to,
                field: "booking id",
            });
        }
        (_, Some(_)) => {
            return Err(TransitionError::UnexpectedPayload {
                to,
                field: "booking id",
            });
        }
        (_, None) => {}
    }

    if let Some(pupil_id) = payload.pupil_id {
        next.pupil_id = Some(pupil_id);
    }
    if let Some(test_centre) = payload.test_centre {
        next.test_centre = Some(test_centre);
    }
    if let Some(confirmation_id) = payload.confirmation_id {
        next.confirmation_id = Some(confirmation_id);
    }
    if let Some(reason) = payload.reason {
        next.reason = Some(reason);
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    use jiff::civil::{date, time};

    use crate::model::SlotDetails;

    fn slot() -> SlotDetails {
        SlotDetails {
            date: date(2026, 11, 2),
            time: time(9, 30, 0, 0),
            test_centre: "Leeds (Harehills)".into(),
        }
    }

    fn payload_for(target: BookingState) -> TransitionPayload {
        match target {
            BookingState::Found => TransitionPayload::slot(slot()),
            BookingState::Booking => TransitionPayload::booking("bk-1"),
            _ => TransitionPayload::default(),
        }
    }

    /// Drive a fresh machine along the happy path until it reaches `state`.
    fn machine_in(state: BookingState) -> BookingStateMachine {
        let mut machine = BookingStateMachine::new();
        let path = [
            BookingState::Searching,
            BookingState::Found,
            BookingState::Confirming,
            BookingState::Booking,
        ];
        match state {
            BookingState::Idle => {}
            BookingState::Timeout | BookingState::Complete => {
                for step in path {
                    machine.transition_with(step, payload_for(step)).unwrap();
                }
                machine.transition_to(state).unwrap();
            }
            BookingState::Cancelled => machine.transition_to(state).unwrap(),
            _ => {
                for step in path {
                    machine.transition_with(step, payload_for(step)).unwrap();
                    if step == state {
                        break;
                    }
                }
            }
        }
        assert_eq!(machine.state(), state);
        machine
    }

    #[test]
    fn happy_path_reflects_each_step() {
        let mut machine = BookingStateMachine::new();
        assert_eq!(machine.state(), BookingState::Idle);

        for step in [
            BookingState::Searching,
            BookingState::Found,
            BookingState::Confirming,
            BookingState::Booking,
            BookingState::Complete,
        ] {
            machine.transition_with(step, payload_for(step)).unwrap();
            assert_eq!(machine.state(), step);
        }
        assert_eq!(machine.history().len(), 5);
        assert_eq!(machine.session().slot_details, Some(slot()));
        assert_eq!(machine.session().booking_id.as_deref(), Some("bk-1"));
    }

    #[test]
    fn idle_to_booking_is_refused() {
        let mut machine = BookingStateMachine::new();
        let err = machine
            .transition_with(BookingState::Booking, TransitionPayload::booking("bk-1"))
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid state transition: IDLE -> BOOKING");
        assert_eq!(machine.state(), BookingState::Idle);
        assert!(machine.session().booking_id.is_none());
    }

    #[test]
    fn every_edge_outside_the_table_is_refused() {
        for from in BookingState::ALL {
            for to in BookingState::ALL {
                if is_allowed(from, to) {
                    continue;
                }
                let mut machine = machine_in(from);
                let before = machine.session().clone();
                let err = machine.transition_with(to, payload_for(to)).unwrap_err();

                assert_eq!(err, TransitionError::InvalidTransition { from, to });
                assert_eq!(machine.session(), &before, "{from} -> {to} mutated session");
            }
        }
    }

    #[test]
    fn edge_table() {
        use BookingState as S;

        let allowed: Vec<_> = S::ALL
            .iter()
            .flat_map(|&from| S::ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| is_allowed(from, to))
            .collect();
        assert_eq!(
            allowed,
            vec![
                (S::Idle, S::Searching),
                (S::Idle, S::Cancelled),
                (S::Searching, S::Found),
                (S::Searching, S::Cancelled),
                (S::Found, S::Confirming),
                (S::Found, S::Cancelled),
                (S::Confirming, S::Booking),
                (S::Confirming, S::Cancelled),
                (S::Booking, S::Timeout),
                (S::Booking, S::Cancelled),
                (S::Booking, S::Complete),
            ]
        );
    }

    #[test]
    fn timeout_from_booking_keeps_reason() {
        let mut machine = machine_in(BookingState::Booking);
        machine
            .transition_with(
                BookingState::Timeout,
                TransitionPayload::reason("site did not respond"),
            )
            .unwrap();

        assert_eq!(machine.state(), BookingState::Timeout);
        assert_eq!(
            machine.session().reason.as_deref(),
            Some("site did not respond")
        );
        assert!(machine.session().slot_details.is_some());
    }

    #[test]
    fn found_requires_slot_details() {
        let mut machine = machine_in(BookingState::Searching);
        let err = machine.transition_to(BookingState::Found).unwrap_err();

        assert!(matches!(err, TransitionError::MissingPayload { .. }));
        assert_eq!(machine.state(), BookingState::Searching);
    }

    #[test]
    fn booking_id_only_on_booking() {
        let mut machine = machine_in(BookingState::Found);
        let err = machine
            .transition_with(BookingState::Confirming, TransitionPayload::booking("bk-9"))
            .unwrap_err();

        assert!(matches!(err, TransitionError::UnexpectedPayload { .. }));
        assert_eq!(machine.state(), BookingState::Found);
        assert!(machine.session().booking_id.is_none());

        let mut machine = machine_in(BookingState::Confirming);
        let err = machine.transition_to(BookingState::Booking).unwrap_err();
        assert!(matches!(err, TransitionError::MissingPayload { .. }));
    }

    #[test]
    fn terminal_states_only_leave_through_reset() {
        for terminal in [
            BookingState::Complete,
            BookingState::Timeout,
            BookingState::Cancelled,
        ] {
            let mut machine = machine_in(terminal);
            assert!(machine.transition_to(BookingState::Searching).is_err());
            assert!(machine.transition_to(BookingState::Cancelled).is_err());

            machine.reset();
            assert_eq!(machine.state(), BookingState::Idle);
            assert_eq!(machine.session(), &BookingSession::default());
            assert!(machine.history().is_empty());
        }
    }

    #[test]
    fn cancel_from_idle_is_allowed() {
        let mut machine = BookingStateMachine::new();
        machine
            .transition_with(BookingState::Cancelled, TransitionPayload::reason("stopped"))
            .unwrap();
        assert_eq!(machine.state(), BookingState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_booking_times_out() {
        let mut machine = BookingStateMachine::with_booking_deadline(Duration::from_secs(30));
        for step in [
            BookingState::Searching,
            BookingState::Found,
            BookingState::Confirming,
            BookingState::Booking,
        ] {
            machine.transition_with(step, payload_for(step)).unwrap();
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!machine.check_deadline(Instant::now()).unwrap());
        assert_eq!(machine.state(), BookingState::Booking);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(machine.check_deadline(Instant::now()).unwrap());
        assert_eq!(machine.state(), BookingState::Timeout);
        assert!(machine.session().reason.is_some());

        // Already terminal: nothing more to do.
        assert!(!machine.check_deadline(Instant::now()).unwrap());
    }

    #[test]
    fn no_deadline_never_times_out() {
        let mut machine = machine_in(BookingState::Booking);
        assert!(!machine.check_deadline(Instant::now()).unwrap());
    }
}
