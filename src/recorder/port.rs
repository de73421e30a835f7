//! Seams to the host runtime: page-side messaging and screenshot capture.
//!
//! The orchestration logic only ever talks to the instrumented page through
//! [`HostPort::send`], so tests (and alternative transports) plug in an
//! in-memory fake instead of a real host runtime.

use std::fmt;
use std::future::Future;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Messages the orchestrator sends towards the page-side instrumentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    /// Hide the capture toolbar so it does not appear in the screenshot.
    /// The acknowledgement implies the page has repainted without it.
    HideToolbar,
    ShowToolbar,
    /// Resolve once no further layout mutation is expected on the page.
    AwaitSettle { url: String },
    /// Inform the instrumentation of a same-document navigation so it can
    /// relay a synthetic navigation event.
    NavigationDetected { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostAck;

#[derive(Debug)]
pub enum PortError {
    /// The page context is gone, usually torn down by a navigation.
    Disconnected(String),
}

impl fmt::Display for PortError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::Disconnected(detail) => write!(formatter, "port disconnected: {detail}"),
        }
    }
}

impl std::error::Error for PortError {}

#[derive(Debug)]
pub enum CaptureError {
    Failed(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Failed(detail) => write!(formatter, "screenshot capture failed: {detail}"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Futures are `Send` so pipeline runs can move onto spawned tasks.
pub trait HostPort: Send + Sync {
    fn send(&self, message: HostMessage) -> impl Future<Output = Result<HostAck, PortError>> + Send;
}

/// Raw screenshot acquisition for the instrumented page.
pub trait ScreenSource: Send + Sync {
    fn capture_screenshot(&self) -> impl Future<Output = Result<RgbaImage, CaptureError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_wire_tags() {
        let json = serde_json::to_string(&HostMessage::HideToolbar).unwrap();
        assert!(json.contains("HIDE_TOOLBAR"));

        let json = serde_json::to_string(&HostMessage::AwaitSettle {
            url: "https://example.com".to_string(),
        })
        .unwrap();
        assert!(json.contains("AWAIT_SETTLE"));
        assert!(json.contains("example.com"));
    }
}
