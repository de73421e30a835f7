//! Speculative pre-click capture and the screenshot lock.
//!
//! On pointer press the toolbar must be hidden and the page repainted before
//! a frame is grabbed, or the toolbar would appear in the image. Doing that
//! round trip at press time, instead of when the click event is finally
//! processed, cuts the perceived latency of the pipeline's happy path.

use image::RgbaImage;
use log::debug;

use super::port::{HostMessage, HostPort, ScreenSource};
use super::state::SessionStatus;
use super::storage::SessionStore;
use super::types::now_ms;
use super::Orchestrator;

/// A parked request to re-show the toolbar, executed when the lock releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowRequest {
    pub requested_at_ms: i64,
}

impl ShowRequest {
    pub fn new() -> Self {
        Self {
            requested_at_ms: now_ms(),
        }
    }
}

impl Default for ShowRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary mutex with one deferred-callback slot. Holding it suppresses any
/// concurrent request to re-show the toolbar (which could belong to a
/// different, still-in-flight step) until the buffer capture finishes.
#[derive(Debug, Default)]
pub struct ScreenshotLock {
    locked: bool,
    deferred: Option<ShowRequest>,
}

impl ScreenshotLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock. Any previously deferred show is discarded: only the
    /// most recent deferral matters.
    pub fn acquire(&mut self) {
        self.locked = true;
        self.deferred = None;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Park a show request to run at release, replacing any earlier one.
    pub fn defer_show(&mut self, request: ShowRequest) {
        self.deferred = Some(request);
    }

    /// Release the lock, handing back the pending show request if one was
    /// parked while it was held.
    pub fn release(&mut self) -> Option<ShowRequest> {
        self.locked = false;
        self.deferred.take()
    }
}

/// Ephemeral `{frame, timestamp}` pair; consumed at most once.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub frame: RgbaImage,
    pub captured_at_ms: i64,
}

/// Single-entry buffer plus the in-flight flag the pipeline awaits on.
#[derive(Debug, Default)]
pub struct PreClickBuffer {
    slot: Option<BufferedFrame>,
    in_flight: bool,
}

impl PreClickBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Replace whatever is buffered; a newer press always wins.
    pub fn store(&mut self, frame: BufferedFrame) {
        self.slot = Some(frame);
    }

    /// Consume the buffered frame, clearing the slot unconditionally.
    pub fn take(&mut self) -> Option<BufferedFrame> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

pub fn is_fresh(captured_at_ms: i64, now_ms: i64, max_age_ms: i64) -> bool {
    now_ms - captured_at_ms <= max_age_ms
}

impl<P, S, C> Orchestrator<P, S, C>
where
    P: HostPort + 'static,
    S: ScreenSource + 'static,
    C: SessionStore + 'static,
{
    /// Handle a `PRE_CLICK_BUFFER{timestamp}` message: hide the toolbar,
    /// wait for the repaint (the hide acknowledgement), capture a frame and
    /// park it for the pipeline. Returns once the capture has settled.
    pub async fn handle_pre_click(&self, timestamp_ms: i64) {
        self.ensure_hydrated().await;

        {
            let state = self.state();
            let capturing = state
                .session
                .as_ref()
                .map(|s| s.status == SessionStatus::Capturing)
                .unwrap_or(false);
            if !capturing {
                return;
            }
        }

        {
            let mut buffer = self.buffer();
            if buffer.in_flight() {
                // A press is already being buffered; at most one capture runs.
                return;
            }
            buffer.begin();
        }
        self.screenshot_lock().acquire();

        if let Err(err) = self.inner.port.send(HostMessage::HideToolbar).await {
            debug!("pre-click toolbar hide failed (page may be gone): {err}");
        }

        let captured = self.inner.screen.capture_screenshot().await;
        {
            let mut buffer = self.buffer();
            match captured {
                Ok(frame) => buffer.store(BufferedFrame {
                    frame,
                    captured_at_ms: timestamp_ms,
                }),
                Err(err) => debug!("pre-click capture failed: {err}"),
            }
            buffer.finish();
        }

        let deferred = self.screenshot_lock().release();
        if deferred.is_some() {
            if let Err(err) = self.inner.port.send(HostMessage::ShowToolbar).await {
                debug!("deferred toolbar show failed: {err}");
            }
        }

        self.inner.buffer_idle.notify_waiters();
    }
}
