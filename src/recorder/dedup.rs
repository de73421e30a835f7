//! Dedup gate and single-slot priority queue.
//!
//! One physical user action can raise several DOM events: a label click that
//! fires both `click` and a synthetic `change`, or a dropdown selection that
//! fires `click` then `change` ~300 ms later. The gate collapses these into
//! one step while never silently eating distinct actions.

use super::state::SessionStatus;
use super::types::{CaptureConfig, EventKind, InteractionEvent};

/// Timing of the most recently created step, as the gate sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastStepMarker {
    /// DOM-fire timestamp of the event that produced the step.
    pub dom_ts_ms: i64,
    /// Wall-clock moment the step finished being created. `None` right
    /// after rehydration loses nothing: the gap is then unknowable and the
    /// DOM-timestamp check still applies.
    pub done_wall_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotCapturing,
    StepLimit,
    DuplicateWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Run the screenshot pipeline for this event now.
    Run,
    /// Pipeline busy; offer the event to the deferred slot.
    Defer,
    Drop(DropReason),
}

/// Decide what to do with an incoming event. Pure over its inputs so the
/// policy is testable without an orchestrator.
///
/// `from_queue` marks events replayed from the deferred slot: they were
/// deliberately delayed, so wall-clock proximity to the previous step is
/// expected and must not cause a false suppression. Fresh events suppress on
/// *either* gap, because pipeline latency can make a genuinely separate
/// action look wall-clock-adjacent even when its DOM timestamp is further
/// apart.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    config: &CaptureConfig,
    status: Option<SessionStatus>,
    steps_len: usize,
    last: Option<LastStepMarker>,
    event: &InteractionEvent,
    now_ms: i64,
    busy: bool,
    from_queue: bool,
) -> GateDecision {
    if status != Some(SessionStatus::Capturing) {
        return GateDecision::Drop(DropReason::NotCapturing);
    }
    if steps_len >= config.max_steps {
        return GateDecision::Drop(DropReason::StepLimit);
    }

    if let Some(last) = last {
        let window = match event.kind {
            EventKind::Navigation => config.nav_window_ms,
            _ => config.step_window_ms,
        };
        let elapsed_dom = event.timestamp_ms - last.dom_ts_ms;
        let dom_close = elapsed_dom < window;
        let wall_close = last
            .done_wall_ms
            .map(|done| now_ms - done < window)
            .unwrap_or(false);

        let suppressed = if from_queue {
            dom_close
        } else {
            dom_close || wall_close
        };
        if suppressed {
            return GateDecision::Drop(DropReason::DuplicateWindow);
        }
    }

    if busy {
        GateDecision::Defer
    } else {
        GateDecision::Run
    }
}

/// Offer an event to the single deferred slot. The newcomer takes the slot
/// when its priority is at least the incumbent's (the fresher event is the
/// better representative of the action); the loser is dropped. Returns true
/// when the newcomer was kept.
pub fn offer_deferred(slot: &mut Option<InteractionEvent>, event: InteractionEvent) -> bool {
    match slot {
        Some(held) if event.kind.priority() < held.kind.priority() => false,
        _ => {
            *slot = Some(event);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaptureConfig {
        CaptureConfig::default()
    }

    fn event(kind: EventKind, timestamp_ms: i64) -> InteractionEvent {
        let mut event = InteractionEvent::new(kind, "https://example.com");
        event.timestamp_ms = timestamp_ms;
        event
    }

    fn marker(dom_ts_ms: i64, done_wall_ms: i64) -> Option<LastStepMarker> {
        Some(LastStepMarker {
            dom_ts_ms,
            done_wall_ms: Some(done_wall_ms),
        })
    }

    #[test]
    fn rejects_without_capturing_session() {
        let ev = event(EventKind::Click, 1_000);
        assert_eq!(
            evaluate(&config(), None, 0, None, &ev, 1_000, false, false),
            GateDecision::Drop(DropReason::NotCapturing)
        );
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Paused),
                0,
                None,
                &ev,
                1_000,
                false,
                false
            ),
            GateDecision::Drop(DropReason::NotCapturing)
        );
    }

    #[test]
    fn rejects_at_step_limit() {
        let cfg = config();
        let ev = event(EventKind::Click, 1_000);
        assert_eq!(
            evaluate(
                &cfg,
                Some(SessionStatus::Capturing),
                cfg.max_steps,
                None,
                &ev,
                1_000,
                false,
                false
            ),
            GateDecision::Drop(DropReason::StepLimit)
        );
    }

    #[test]
    fn first_event_runs() {
        let ev = event(EventKind::Click, 1_000);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                0,
                None,
                &ev,
                1_000,
                false,
                false
            ),
            GateDecision::Run
        );
    }

    #[test]
    fn suppresses_within_dom_window() {
        // change 100ms after the click that produced the last step
        let ev = event(EventKind::Change, 1_100);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_050),
                &ev,
                10_000,
                false,
                false
            ),
            GateDecision::Drop(DropReason::DuplicateWindow)
        );
    }

    #[test]
    fn suppresses_on_wall_clock_even_when_dom_gap_is_wide() {
        // 350ms of DOM time between the events, but the pipeline took 500ms
        // to finish the first step, so wall-clock now is right on top of it.
        let ev = event(EventKind::Click, 1_350);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_500),
                &ev,
                1_510,
                false,
                false
            ),
            GateDecision::Drop(DropReason::DuplicateWindow)
        );
    }

    #[test]
    fn queued_events_ignore_wall_clock_proximity() {
        // Same gaps as above, but replayed from the deferred slot: only the
        // DOM gap counts, and 350ms clears the 300ms window.
        let ev = event(EventKind::Click, 1_350);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_500),
                &ev,
                1_510,
                false,
                true
            ),
            GateDecision::Run
        );
    }

    #[test]
    fn queued_events_still_suppress_on_dom_window() {
        let ev = event(EventKind::Change, 1_100);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_500),
                &ev,
                9_000,
                false,
                true
            ),
            GateDecision::Drop(DropReason::DuplicateWindow)
        );
    }

    #[test]
    fn navigation_uses_wider_window() {
        let ev = event(EventKind::Navigation, 2_500);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_000),
                &ev,
                20_000,
                false,
                false
            ),
            GateDecision::Drop(DropReason::DuplicateWindow)
        );

        let ev = event(EventKind::Navigation, 3_100);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_000),
                &ev,
                20_000,
                false,
                false
            ),
            GateDecision::Run
        );
    }

    #[test]
    fn missing_wall_marker_falls_back_to_dom_check() {
        // Right after rehydration the wall marker may be absent.
        let ev = event(EventKind::Click, 9_000);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                Some(LastStepMarker {
                    dom_ts_ms: 1_000,
                    done_wall_ms: None,
                }),
                &ev,
                9_001,
                false,
                false
            ),
            GateDecision::Run
        );
    }

    #[test]
    fn busy_pipeline_defers() {
        let ev = event(EventKind::Click, 9_000);
        assert_eq!(
            evaluate(
                &config(),
                Some(SessionStatus::Capturing),
                1,
                marker(1_000, 1_000),
                &ev,
                9_000,
                true,
                false
            ),
            GateDecision::Defer
        );
    }

    #[test]
    fn click_evicts_waiting_scroll() {
        let mut slot = Some(event(EventKind::Scroll, 1_000));
        assert!(offer_deferred(&mut slot, event(EventKind::Click, 2_000)));
        assert_eq!(slot.as_ref().map(|e| e.kind), Some(EventKind::Click));
    }

    #[test]
    fn scroll_never_evicts_waiting_click() {
        let mut slot = Some(event(EventKind::Click, 1_000));
        assert!(!offer_deferred(&mut slot, event(EventKind::Scroll, 2_000)));
        assert_eq!(slot.as_ref().map(|e| e.timestamp_ms), Some(1_000));
    }

    #[test]
    fn equal_priority_keeps_newcomer() {
        let mut slot = Some(event(EventKind::Input, 1_000));
        assert!(offer_deferred(&mut slot, event(EventKind::Keypress, 2_000)));
        assert_eq!(slot.as_ref().map(|e| e.kind), Some(EventKind::Keypress));
    }

    #[test]
    fn empty_slot_accepts_anything() {
        let mut slot = None;
        assert!(offer_deferred(&mut slot, event(EventKind::Scroll, 1_000)));
        assert!(slot.is_some());
    }
}
