//! Output formatting for CLI display.

use std::fmt::Write as _;

use slotguard::model::{BookingOutcome, BookingState};
use slotguard::timing::{Key, Keystroke, TimingStats};

/// One line per outcome: short id, state, slot, reason.
pub(super) fn format_outcome(outcome: &BookingOutcome) -> String {
    let short_id = &outcome.id.to_string()[..8];
    let state = match outcome.final_state {
        BookingState::Complete => "booked",
        BookingState::Cancelled => "cancelled",
        BookingState::Timeout => "timed out",
        other => other.name(),
    };
    let mut line = format!("{short_id}  [{state}] {}", outcome.pupil_id);
    if let Some(slot) = &outcome.slot {
        let _ = write!(
            line,
            "  {} {} @ {}",
            slot.date,
            slot.time.strftime("%H:%M"),
            slot.test_centre
        );
    }
    if let Some(reason) = &outcome.reason {
        let _ = write!(line, "  ({reason})");
    }
    line
}

pub(super) fn format_timing_stats(stats: &TimingStats) -> String {
    let mut out = format!(
        "{} draws, mean {:.0}ms, adaptive x{:.2}, fatigue x{:.2}",
        stats.total_actions,
        stats.average_interval,
        stats.adaptive_multiplier,
        stats.fatigue_factor
    );
    for (action, s) in &stats.by_action {
        let _ = write!(out, "\n  {action:<6} {:>4} x {:.0}ms", s.count, s.average_interval);
    }
    out
}

/// Keystrokes as `<delay>ms <key>`, one per line.
pub(super) fn format_keystrokes(strokes: &[Keystroke]) -> String {
    strokes
        .iter()
        .map(|s| match s.key {
            Key::Char(c) => format!("{:>4}ms {c:?}", s.delay_ms),
            Key::Backspace => format!("{:>4}ms <backspace>", s.delay_ms),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use jiff::Timestamp;
    use jiff::civil::{date, time};
    use slotguard::model::SlotDetails;
    use slotguard::timing::{ActionStats, ActionType};
    use uuid::Uuid;

    fn outcome(state: BookingState, reason: Option<&str>) -> BookingOutcome {
        BookingOutcome {
            id: Uuid::parse_str("a3b0fc12-0000-4000-8000-000000000000").unwrap(),
            pupil_id: "pupil-1".into(),
            final_state: state,
            slot: Some(SlotDetails {
                date: date(2031, 3, 14),
                time: time(9, 40, 0, 0),
                test_centre: "Leeds".into(),
            }),
            confirmation_id: None,
            booking_id: None,
            reason: reason.map(String::from),
            recorded_at: Timestamp::UNIX_EPOCH,
        }
    }

    #[test]
    fn format_booked_outcome() {
        assert_eq!(
            format_outcome(&outcome(BookingState::Complete, None)),
            "a3b0fc12  [booked] pupil-1  2031-03-14 09:40 @ Leeds"
        );
    }

    #[test]
    fn format_cancelled_outcome_with_reason() {
        let mut o = outcome(BookingState::Cancelled, Some("declined by user"));
        o.slot = None;
        assert_eq!(
            format_outcome(&o),
            "a3b0fc12  [cancelled] pupil-1  (declined by user)"
        );
    }

    #[test]
    fn format_stats_lists_each_action() {
        let stats = TimingStats {
            total_actions: 3,
            average_interval: 500.0,
            adaptive_multiplier: 1.0,
            fatigue_factor: 1.0,
            session_secs: 1,
            by_action: BTreeMap::from([(
                ActionType::Click,
                ActionStats {
                    count: 3,
                    average_interval: 500.0,
                },
            )]),
        };
        assert_eq!(
            format_timing_stats(&stats),
            "3 draws, mean 500ms, adaptive x1.00, fatigue x1.00\n  click     3 x 500ms"
        );
    }

    #[test]
    fn format_keystroke_plan() {
        let strokes = [
            Keystroke {
                key: Key::Char('a'),
                delay_ms: 120,
            },
            Keystroke {
                key: Key::Backspace,
                delay_ms: 300,
            },
        ];
        assert_eq!(
            format_keystrokes(&strokes),
            " 120ms 'a'\n 300ms <backspace>"
        );
    }
}
