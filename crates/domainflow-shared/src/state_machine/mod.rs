//! # Phase State Machine
//!
//! The legal-transition table for phase executions. Both store variants call
//! [`next_status`] before persisting, so Postgres and the in-memory store
//! enforce identical semantics; every persisted transition writes the
//! execution row and the campaign aggregate row in one transaction.

pub mod events;
pub mod states;

pub use events::PhaseEvent;
pub use states::PhaseStatus;

use crate::errors::{OrchestrationError, OrchestrationResult};

/// Resolve the status an event drives `current` into, or
/// `IllegalTransition` with no state change.
pub fn next_status(current: PhaseStatus, event: &PhaseEvent) -> OrchestrationResult<PhaseStatus> {
    use PhaseEvent as E;
    use PhaseStatus as S;

    let next = match (current, event) {
        (S::NotStarted, E::Configure) => S::Queued,
        // Re-configuring an already-queued phase is idempotent
        (S::Queued, E::Configure) => S::Queued,
        (S::Queued, E::Start) => S::InProgress,
        (S::InProgress, E::Pause) => S::Paused,
        (S::Paused, E::Resume) => S::InProgress,
        (S::InProgress, E::Complete) => S::Completed,
        // A worker can die while queued, running, or paused
        (S::Queued | S::InProgress | S::Paused, E::Fail(_)) => S::Failed,
        (S::Queued | S::InProgress | S::Paused, E::Cancel) => S::Cancelled,
        (S::Completed | S::Failed | S::Cancelled, E::Archive) => S::Archived,
        (from, ev) => {
            return Err(OrchestrationError::IllegalTransition {
                from,
                to: target_of(ev),
            })
        }
    };
    Ok(next)
}

/// The status an event aims at, used for error reporting
fn target_of(event: &PhaseEvent) -> PhaseStatus {
    match event {
        PhaseEvent::Configure => PhaseStatus::Queued,
        PhaseEvent::Start => PhaseStatus::InProgress,
        PhaseEvent::Pause => PhaseStatus::Paused,
        PhaseEvent::Resume => PhaseStatus::InProgress,
        PhaseEvent::Complete => PhaseStatus::Completed,
        PhaseEvent::Fail(_) => PhaseStatus::Failed,
        PhaseEvent::Cancel => PhaseStatus::Cancelled,
        PhaseEvent::Archive => PhaseStatus::Archived,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut status = PhaseStatus::NotStarted;
        for event in [
            PhaseEvent::Configure,
            PhaseEvent::Start,
            PhaseEvent::Pause,
            PhaseEvent::Resume,
            PhaseEvent::Complete,
        ] {
            status = next_status(status, &event).unwrap();
        }
        assert_eq!(status, PhaseStatus::Completed);
    }

    #[test]
    fn test_pause_from_not_started_is_illegal() {
        let err = next_status(PhaseStatus::NotStarted, &PhaseEvent::Pause).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::IllegalTransition {
                from: PhaseStatus::NotStarted,
                to: PhaseStatus::Paused,
            }
        ));
    }

    #[test]
    fn test_resume_from_failed_is_illegal() {
        let err = next_status(PhaseStatus::Failed, &PhaseEvent::Resume).unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::IllegalTransition { .. }
        ));
    }

    #[test]
    fn test_terminal_states_reject_everything_but_archive() {
        for terminal in [
            PhaseStatus::Completed,
            PhaseStatus::Failed,
            PhaseStatus::Cancelled,
        ] {
            for event in [
                PhaseEvent::Configure,
                PhaseEvent::Start,
                PhaseEvent::Pause,
                PhaseEvent::Resume,
                PhaseEvent::Complete,
                PhaseEvent::Cancel,
            ] {
                assert!(
                    next_status(terminal, &event).is_err(),
                    "{terminal} must reject {event}"
                );
            }
            assert_eq!(
                next_status(terminal, &PhaseEvent::Archive).unwrap(),
                PhaseStatus::Archived
            );
        }

        // Archived is the end of the line
        for event in [PhaseEvent::Archive, PhaseEvent::Resume, PhaseEvent::Start] {
            assert!(next_status(PhaseStatus::Archived, &event).is_err());
        }
    }

    #[test]
    fn test_cancel_wins_from_paused() {
        // A Stop queued behind a Pause lands after the Pause ack: Paused -> Cancelled
        assert_eq!(
            next_status(PhaseStatus::Paused, &PhaseEvent::Cancel).unwrap(),
            PhaseStatus::Cancelled
        );
    }

    #[test]
    fn test_worker_death_fails_from_any_live_state() {
        for live in [
            PhaseStatus::Queued,
            PhaseStatus::InProgress,
            PhaseStatus::Paused,
        ] {
            assert_eq!(
                next_status(live, &PhaseEvent::Fail("worker panicked".into())).unwrap(),
                PhaseStatus::Failed
            );
        }
    }
}
