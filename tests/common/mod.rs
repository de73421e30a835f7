#![allow(dead_code)]

//! In-memory fakes for the host transport, screen source and session store.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbaImage;
use pagecast::{
    CaptureConfig, CaptureError, CaptureMode, CaptureSession, EventKind, HostAck, HostMessage,
    HostPort, InteractionEvent, Orchestrator, PortError, ScreenSource, SessionOptions,
    SessionStore, StorageError,
};

/// Fake transport that records every message and acknowledges immediately.
#[derive(Clone, Default)]
pub struct FakePort {
    sent: Arc<Mutex<Vec<HostMessage>>>,
}

impl FakePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<HostMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: fn(&HostMessage) -> bool) -> usize {
        self.sent().iter().filter(|m| wanted(m)).count()
    }
}

impl HostPort for FakePort {
    async fn send(&self, message: HostMessage) -> Result<HostAck, PortError> {
        self.sent.lock().unwrap().push(message);
        Ok(HostAck)
    }
}

/// Fake screen source with a configurable capture latency.
#[derive(Clone)]
pub struct FakeScreen {
    delay: Duration,
    captures: Arc<AtomicUsize>,
}

impl FakeScreen {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            captures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl ScreenSource for FakeScreen {
    async fn capture_screenshot(&self) -> Result<RgbaImage, CaptureError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(RgbaImage::new(64, 48))
    }
}

/// In-memory single-slot store.
#[derive(Clone, Default)]
pub struct MemStore {
    slot: Arc<Mutex<Option<CaptureSession>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<CaptureSession> {
        self.slot.lock().unwrap().clone()
    }
}

impl SessionStore for MemStore {
    async fn save(&self, session: &CaptureSession) -> Result<(), StorageError> {
        *self.slot.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    async fn restore(&self) -> Result<Option<CaptureSession>, StorageError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().unwrap() = None;
        Ok(())
    }

    async fn purge_expired(&self, retention_ms: i64) -> Result<(), StorageError> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(session) = slot.as_ref() {
            if pagecast::recorder::types::now_ms() - session.updated_at_ms > retention_ms {
                *slot = None;
            }
        }
        Ok(())
    }
}

/// Poll until the session holds at least `steps` steps. Deferred events
/// replay on their own task, so a test cannot observe them synchronously.
pub async fn session_with_steps<P, S, C>(
    orch: &Orchestrator<P, S, C>,
    steps: usize,
) -> CaptureSession
where
    P: HostPort + 'static,
    S: ScreenSource + 'static,
    C: SessionStore + 'static,
{
    for _ in 0..200 {
        if let Some(session) = orch.session().await {
            if session.steps.len() >= steps {
                return session;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session never reached {steps} steps");
}

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config(root: &Path) -> CaptureConfig {
    CaptureConfig {
        cache_root: root.join("sessions"),
        ..CaptureConfig::default()
    }
}

pub fn options() -> SessionOptions {
    SessionOptions {
        page_id: "tab-1".to_string(),
        title: "Untitled recording".to_string(),
        mode: CaptureMode::Workflow,
        start_url: "https://example.com".to_string(),
    }
}

pub fn event(kind: EventKind, timestamp_ms: i64) -> InteractionEvent {
    let mut event = InteractionEvent::new(kind, "https://example.com");
    event.timestamp_ms = timestamp_ms;
    event
}
