//! Core event and step types shared across the recorder.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Current time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Click,
    Input,
    Change,
    Keypress,
    Navigation,
    Scroll,
}

impl EventKind {
    /// Priority used when two events compete for the single deferred slot.
    /// A click is never discarded in favor of a scroll that happened to
    /// arrive later during a busy window.
    pub fn priority(self) -> u8 {
        match self {
            EventKind::Click => 4,
            EventKind::Change => 3,
            EventKind::Input => 2,
            EventKind::Keypress => 2,
            EventKind::Navigation => 1,
            EventKind::Scroll => 0,
        }
    }
}

/// Metadata about the DOM element an event fired on. Captured by the
/// instrumentation layer; the orchestrator only reads it for descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    pub label: Option<String>,
    pub selector: Option<String>,
}

/// One interaction signal from the instrumented page. Immutable once built;
/// `timestamp_ms` is the moment the physical action fired, not the moment
/// the orchestrator got around to processing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub kind: EventKind,
    pub timestamp_ms: i64,
    pub url: String,
    pub element: Option<ElementInfo>,
    pub value: Option<String>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub viewport: Option<(u32, u32)>,
    pub key: Option<String>,
}

impl InteractionEvent {
    pub fn new(kind: EventKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp_ms: now_ms(),
            url: url.into(),
            element: None,
            value: None,
            x: None,
            y: None,
            viewport: None,
            key: None,
        }
    }

    fn element_label(&self) -> String {
        match self.element.as_ref() {
            Some(el) => match el.label.as_deref() {
                Some(label) if !label.trim().is_empty() => format!("\"{}\"", label.trim()),
                _ => format!("<{}>", el.tag),
            },
            None => "the page".to_string(),
        }
    }

    /// Human-readable step description derived from the event payload.
    pub fn describe(&self) -> String {
        match self.kind {
            EventKind::Click => format!("Click {}", self.element_label()),
            EventKind::Input => match self.value.as_deref() {
                Some(value) => format!("Type \"{value}\" into {}", self.element_label()),
                None => format!("Edit {}", self.element_label()),
            },
            EventKind::Change => match self.value.as_deref() {
                Some(value) => format!("Set {} to \"{value}\"", self.element_label()),
                None => format!("Change {}", self.element_label()),
            },
            EventKind::Keypress => match self.key.as_deref() {
                Some(key) => format!("Press {key}"),
                None => "Press a key".to_string(),
            },
            EventKind::Navigation => format!("Navigate to {}", self.url),
            EventKind::Scroll => "Scroll the page".to_string(),
        }
    }
}

/// One recorded moment: an accepted event plus its screenshot artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_number: u32,
    pub description: String,
    pub screenshot_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub element: Option<ElementInfo>,
    pub event: InteractionEvent,
    pub timestamp_ms: i64,
    pub url: String,
    /// Free-form drawing/annotation blob owned by the editor; opaque here.
    pub annotations: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Multi-step workflow recording.
    Workflow,
    /// One screenshot, then straight to editing.
    SingleShot,
}

/// Tunable thresholds for the capture orchestrator. The dedup windows and
/// buffer freshness values are empirical, tuned against observed pipeline
/// latency, so they live here rather than as constants.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Dedup window for non-navigation events (milliseconds).
    pub step_window_ms: i64,
    /// Dedup window for navigation events (milliseconds).
    pub nav_window_ms: i64,
    /// Maximum age of a pre-click buffered frame before the pipeline
    /// falls back to a fresh capture (milliseconds).
    pub buffer_max_age_ms: i64,
    /// Upper bound on waiting for the page to settle before capture.
    pub settle_timeout_ms: u64,
    /// Hard cap on steps per session.
    pub max_steps: usize,
    /// Screenshots wider than this are scaled down for display.
    pub max_display_width: u32,
    pub thumbnail_width: u32,
    /// Persisted snapshots older than this are purged at startup.
    pub retention_ms: i64,
    /// Root directory for per-session screenshot directories.
    pub cache_root: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            step_window_ms: 300,
            nav_window_ms: 2_000,
            buffer_max_age_ms: 2_000,
            settle_timeout_ms: 3_000,
            max_steps: 50,
            max_display_width: 1_280,
            thumbnail_width: 320,
            retention_ms: 24 * 60 * 60 * 1_000,
            cache_root: default_cache_root(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("com.pagecast.app")
        .join("sessions")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_creates_with_timestamp() {
        let event = InteractionEvent::new(EventKind::Click, "https://example.com");
        assert_eq!(event.kind, EventKind::Click);
        assert!(event.timestamp_ms > 0);
    }

    #[test]
    fn click_outranks_everything() {
        for kind in [
            EventKind::Change,
            EventKind::Input,
            EventKind::Keypress,
            EventKind::Navigation,
            EventKind::Scroll,
        ] {
            assert!(EventKind::Click.priority() > kind.priority());
        }
    }

    #[test]
    fn input_and_keypress_tie() {
        assert_eq!(EventKind::Input.priority(), EventKind::Keypress.priority());
    }

    #[test]
    fn describe_uses_element_label() {
        let mut event = InteractionEvent::new(EventKind::Click, "https://example.com");
        event.element = Some(ElementInfo {
            tag: "button".to_string(),
            label: Some("Save".to_string()),
            selector: None,
        });
        assert_eq!(event.describe(), "Click \"Save\"");

        event.element.as_mut().unwrap().label = None;
        assert_eq!(event.describe(), "Click <button>");
    }

    #[test]
    fn describe_navigation_uses_url() {
        let event = InteractionEvent::new(EventKind::Navigation, "https://example.com/next");
        assert_eq!(event.describe(), "Navigate to https://example.com/next");
    }

    #[test]
    fn event_roundtrip_json() {
        let mut event = InteractionEvent::new(EventKind::Input, "https://example.com");
        event.value = Some("hello".to_string());
        let json = serde_json::to_string(&event).unwrap();
        let back: InteractionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
