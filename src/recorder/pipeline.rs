//! Screenshot pipeline: hide toolbar → wait for settle → capture →
//! resize/thumbnail → show toolbar, with the pre-click buffered fast path.
//!
//! Messaging failures towards the page are swallowed: a navigation may have
//! destroyed the instrumented context already, and the screenshot is still
//! usable even if it shows the new page. The only cancellation point is the
//! recheck after the last await: the session this run was ticketed for must
//! still be in the slot and capturing.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use image::{imageops, RgbaImage};
use log::debug;
use uuid::Uuid;

use super::port::{CaptureError, HostMessage, HostPort, ScreenSource};
use super::pre_click::{is_fresh, ShowRequest};
use super::state::{SessionStatus, SessionAction, TransitionOutcome};
use super::storage::SessionStore;
use super::types::{now_ms, CaptureMode, InteractionEvent, Step};
use super::{Orchestrator, RunTicket};

#[derive(Debug)]
pub enum PipelineError {
    ScreenshotFailed(String),
    ImageFailed(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ScreenshotFailed(msg) => write!(formatter, "screenshot failed: {msg}"),
            PipelineError::ImageFailed(msg) => write!(formatter, "image processing failed: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<CaptureError> for PipelineError {
    fn from(error: CaptureError) -> Self {
        PipelineError::ScreenshotFailed(error.to_string())
    }
}

/// Scale a frame down to `max_width`, preserving aspect ratio. Frames
/// already narrow enough pass through untouched.
pub fn scale_to_width(frame: &RgbaImage, max_width: u32) -> RgbaImage {
    let (width, height) = frame.dimensions();
    if width <= max_width || width == 0 {
        return frame.clone();
    }
    let scaled_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
    imageops::resize(frame, max_width, scaled_height, imageops::FilterType::Lanczos3)
}

/// Thumbnail dimensions for a frame, bounded by `thumb_width`.
pub fn thumbnail_size(frame: &RgbaImage, thumb_width: u32) -> (u32, u32) {
    let (width, height) = frame.dimensions();
    if width <= thumb_width || width == 0 {
        return (width.max(1), height.max(1));
    }
    let thumb_height = ((height as u64 * thumb_width as u64) / width as u64).max(1) as u32;
    (thumb_width, thumb_height)
}

fn remove_artifacts(paths: &[&Path]) {
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
}

impl<P, S, C> Orchestrator<P, S, C>
where
    P: HostPort + 'static,
    S: ScreenSource + 'static,
    C: SessionStore + 'static,
{
    /// Run the full capture sequence for an accepted event. `Ok(None)` means
    /// the run was abandoned (session gone, replaced, or no longer
    /// capturing) — never a partial step. The ticket names the session this
    /// run belongs to; a different session in the slot means ours was
    /// cancelled while the pipeline was suspended.
    pub(crate) async fn run_pipeline(
        &self,
        event: &InteractionEvent,
        ticket: &RunTicket,
    ) -> Result<Option<Step>, PipelineError> {
        // A pre-click capture may still be hiding the toolbar; let it land
        // so its frame is available for the fast path below.
        self.wait_buffer_idle().await;

        let buffered = self.buffer().take();
        let frame = match buffered {
            Some(entry)
                if is_fresh(entry.captured_at_ms, now_ms(), self.inner.config.buffer_max_age_ms) =>
            {
                debug!(
                    "using pre-click frame captured {}ms before processing",
                    now_ms() - entry.captured_at_ms
                );
                entry.frame
            }
            _ => {
                if let Err(err) = self.inner.port.send(HostMessage::HideToolbar).await {
                    debug!("toolbar hide failed (page may be gone): {err}");
                }
                self.await_settle(&event.url).await;
                let captured = self.inner.screen.capture_screenshot().await;
                if captured.is_err() {
                    // Leave the UI usable even when the grab failed.
                    self.request_show().await;
                }
                captured?
            }
        };
        self.request_show().await;

        let (step_id, screenshot_path, thumbnail_path) = {
            let state = self.state();
            let Some(session) = state.session.as_ref() else {
                return Ok(None);
            };
            if session.id != ticket.session_id {
                return Ok(None);
            }
            let step_id = Uuid::new_v4().to_string();
            (
                step_id.clone(),
                session.screenshot_path(&step_id),
                session.thumbnail_path(&step_id),
            )
        };

        let display = scale_to_width(&frame, self.inner.config.max_display_width);
        let (thumb_w, thumb_h) = thumbnail_size(&display, self.inner.config.thumbnail_width);
        let thumb = imageops::thumbnail(&display, thumb_w, thumb_h);
        display
            .save(&screenshot_path)
            .map_err(|e| PipelineError::ImageFailed(e.to_string()))?;
        thumb
            .save(&thumbnail_path)
            .map_err(|e| PipelineError::ImageFailed(e.to_string()))?;

        // Cancellation recheck: the session may have been discarded, or
        // discarded and replaced, while the pipeline was suspended on I/O.
        // Only the session this run was ticketed for may receive the step.
        let step = {
            let mut state = self.state();
            let Some(session) = state.session.as_mut() else {
                remove_artifacts(&[&screenshot_path, &thumbnail_path]);
                return Ok(None);
            };
            if session.id != ticket.session_id || session.status != SessionStatus::Capturing {
                remove_artifacts(&[&screenshot_path, &thumbnail_path]);
                return Ok(None);
            }

            let step = Step {
                id: step_id,
                step_number: session.next_step_number(),
                description: event.describe(),
                screenshot_path: Some(screenshot_path.to_string_lossy().into_owned()),
                thumbnail_path: Some(thumbnail_path.to_string_lossy().into_owned()),
                element: event.element.clone(),
                event: event.clone(),
                timestamp_ms: now_ms(),
                url: event.url.clone(),
                annotations: None,
            };
            session.add_step(step.clone());
            if session.mode == CaptureMode::SingleShot {
                // Single-screenshot sessions go straight to editing.
                if let Ok(TransitionOutcome::To(next)) =
                    super::state::transition(session.status, SessionAction::Stop)
                {
                    session.status = next;
                    session.completed_at_ms = Some(now_ms());
                }
            }
            state.last_done_wall_ms = Some(now_ms());
            step
        };

        self.persist().await;
        Ok(Some(step))
    }

    /// Re-show the toolbar, unless the screenshot lock is held — then the
    /// request is parked and the lock holder runs it on release.
    pub(crate) async fn request_show(&self) {
        {
            let mut lock = self.screenshot_lock();
            if lock.is_locked() {
                lock.defer_show(ShowRequest::new());
                debug!("toolbar show deferred behind screenshot lock");
                return;
            }
        }
        if let Err(err) = self.inner.port.send(HostMessage::ShowToolbar).await {
            debug!("toolbar show failed (page may be gone): {err}");
        }
    }

    /// Bounded wait for the page-settle signal; a timeout degrades to
    /// capturing whatever is on screen.
    async fn await_settle(&self, url: &str) {
        let settle = self.inner.port.send(HostMessage::AwaitSettle {
            url: url.to_string(),
        });
        let timeout_ms = self.inner.config.settle_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), settle).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!("settle wait failed (page may be gone): {err}"),
            Err(_) => debug!("settle wait timed out after {timeout_ms}ms"),
        }
    }

    async fn wait_buffer_idle(&self) {
        loop {
            let notified = self.inner.buffer_idle.notified();
            if !self.buffer().in_flight() {
                return;
            }
            notified.await;
        }
    }
}
