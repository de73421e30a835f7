//! Capture orchestration core.
//!
//! All mutable orchestration state lives behind one [`Orchestrator`] value:
//! the active session, the pipeline busy flag, the single deferred-event
//! slot, the screenshot lock and the pre-click buffer. Critical sections
//! never span an await, so the busy-flag check-and-set is race-free against
//! interleaved async calls. The orchestrator itself is a cheap cloneable
//! handle over shared state, which lets a deferred event replay on its own
//! task without holding up the caller that parked it.

pub mod dedup;
pub mod pipeline;
pub mod port;
pub mod pre_click;
pub mod session;
pub mod state;
pub mod storage;
pub mod types;

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::Notify;

use self::dedup::{GateDecision, LastStepMarker};
use self::port::{HostMessage, HostPort, ScreenSource};
use self::pre_click::{PreClickBuffer, ScreenshotLock};
use self::session::{CaptureSession, SessionOptions};
use self::state::{SessionAction, SessionStatus, TransitionError, TransitionOutcome};
use self::storage::SessionStore;
use self::types::{now_ms, CaptureConfig, InteractionEvent};

#[derive(Debug)]
pub enum SessionError {
    /// The single capture slot is occupied.
    AlreadyActive,
    /// No session in memory and none to rehydrate.
    NoActiveSession,
    Transition(TransitionError),
    Io(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyActive => write!(formatter, "a capture session is already active"),
            SessionError::NoActiveSession => write!(formatter, "no active session"),
            SessionError::Transition(error) => write!(formatter, "{error}"),
            SessionError::Io(error) => write!(formatter, "io error: {error}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TransitionError> for SessionError {
    fn from(error: TransitionError) -> Self {
        SessionError::Transition(error)
    }
}

impl From<io::Error> for SessionError {
    fn from(error: io::Error) -> Self {
        SessionError::Io(error)
    }
}

/// Volatile orchestrator state; the durable mirror lives in the store.
#[derive(Debug, Default)]
pub(crate) struct OrchestratorState {
    pub(crate) session: Option<CaptureSession>,
    /// Single-flight guard for the screenshot pipeline.
    pub(crate) busy: bool,
    /// At most one event waits behind a busy pipeline.
    pub(crate) deferred: Option<InteractionEvent>,
    /// Wall-clock moment the last step finished being created.
    pub(crate) last_done_wall_ms: Option<i64>,
    /// Lazy-rehydration latch; set after the first restore attempt.
    pub(crate) hydrated: bool,
    /// Bumped by `start` and `cancel`. An in-flight pipeline run whose
    /// ticket carries an older epoch belongs to a discarded session and
    /// must not touch the flags or the replacement session.
    pub(crate) epoch: u64,
}

/// Proof the gate accepted an event: which session owns the run, and the
/// epoch the busy flag was set under.
#[derive(Debug, Clone)]
pub(crate) struct RunTicket {
    pub(crate) epoch: u64,
    pub(crate) session_id: String,
}

pub(crate) struct Inner<P, S, C>
where
    P: HostPort,
    S: ScreenSource,
    C: SessionStore,
{
    pub(crate) config: CaptureConfig,
    pub(crate) port: P,
    pub(crate) screen: S,
    pub(crate) store: C,
    pub(crate) state: Mutex<OrchestratorState>,
    pub(crate) lock: Mutex<ScreenshotLock>,
    pub(crate) buffer: Mutex<PreClickBuffer>,
    pub(crate) buffer_idle: Notify,
}

pub struct Orchestrator<P, S, C>
where
    P: HostPort,
    S: ScreenSource,
    C: SessionStore,
{
    pub(crate) inner: Arc<Inner<P, S, C>>,
}

impl<P, S, C> Clone for Orchestrator<P, S, C>
where
    P: HostPort,
    S: ScreenSource,
    C: SessionStore,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, S, C> Orchestrator<P, S, C>
where
    P: HostPort + 'static,
    S: ScreenSource + 'static,
    C: SessionStore + 'static,
{
    /// Build an orchestrator and purge stale snapshots from the store.
    pub async fn new(config: CaptureConfig, port: P, screen: S, store: C) -> Self {
        if let Err(err) = store.purge_expired(config.retention_ms).await {
            warn!("snapshot purge failed: {err}");
        }
        Self {
            inner: Arc::new(Inner {
                config,
                port,
                screen,
                store,
                state: Mutex::new(OrchestratorState::default()),
                lock: Mutex::new(ScreenshotLock::new()),
                buffer: Mutex::new(PreClickBuffer::new()),
                buffer_idle: Notify::new(),
            }),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn screenshot_lock(&self) -> MutexGuard<'_, ScreenshotLock> {
        self.inner.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn buffer(&self) -> MutexGuard<'_, PreClickBuffer> {
        self.inner.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rehydrate the session from the durable snapshot if volatile memory is
    /// empty (host process was torn down and restarted). Runs at most one
    /// restore; callers go through this before acting.
    pub(crate) async fn ensure_hydrated(&self) {
        {
            let state = self.state();
            if state.hydrated || state.session.is_some() {
                return;
            }
        }

        let restored = match self.inner.store.restore().await {
            Ok(restored) => restored,
            Err(err) => {
                warn!("session restore failed: {err}");
                None
            }
        };

        let mut state = self.state();
        state.hydrated = true;
        if state.session.is_none() {
            if let Some(session) = restored {
                debug!(
                    "rehydrated session {} with {} steps",
                    session.id,
                    session.steps.len()
                );
                // The wall-clock marker did not survive the restart; the
                // snapshot's last-touched time is the closest stand-in.
                state.last_done_wall_ms = Some(session.updated_at_ms);
                state.session = Some(session);
            }
        }
    }

    /// Mirror the in-memory session to the store, best-effort.
    pub(crate) async fn persist(&self) {
        let snapshot = self.state().session.clone();
        let Some(snapshot) = snapshot else { return };
        if let Err(err) = self.inner.store.save(&snapshot).await {
            warn!("session persist failed: {err}");
        }
    }

    /// Start a new capture session in the single global slot.
    pub async fn start(&self, options: SessionOptions) -> Result<String, SessionError> {
        self.ensure_hydrated().await;

        let session = {
            let mut state = self.state();
            let occupied = state
                .session
                .as_ref()
                .map(|s| s.status != SessionStatus::Done)
                .unwrap_or(false);
            if occupied {
                return Err(SessionError::AlreadyActive);
            }

            let session = CaptureSession::new(options, &self.inner.config.cache_root)?;
            state.hydrated = true;
            state.busy = false;
            state.deferred = None;
            state.last_done_wall_ms = None;
            state.epoch = state.epoch.wrapping_add(1);
            state.session = Some(session.clone());
            session
        };
        self.buffer().clear();

        if let Err(err) = self.inner.store.save(&session).await {
            warn!("session persist failed: {err}");
        }
        Ok(session.id)
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.apply_transition(SessionAction::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.apply_transition(SessionAction::Resume).await
    }

    /// End capture and move to editing, snapshotting the completion time.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.apply_transition(SessionAction::Stop).await
    }

    pub async fn finish(&self) -> Result<(), SessionError> {
        self.apply_transition(SessionAction::Finish).await
    }

    async fn apply_transition(&self, action: SessionAction) -> Result<(), SessionError> {
        self.ensure_hydrated().await;
        {
            let mut state = self.state();
            let Some(session) = state.session.as_mut() else {
                return Err(SessionError::NoActiveSession);
            };
            match state::transition(session.status, action)? {
                TransitionOutcome::To(next) => {
                    session.status = next;
                    if next == SessionStatus::Editing {
                        session.completed_at_ms = Some(now_ms());
                    }
                    session.updated_at_ms = now_ms();
                }
                // Discard outcomes are routed through `cancel()`; an action
                // landing here with one is a misuse, not a panic.
                TransitionOutcome::Discard => {
                    return Err(TransitionError::Invalid {
                        from: session.status,
                        action,
                    }
                    .into());
                }
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Discard the session and all of its buffers entirely; no persisted
    /// record is left behind. A pipeline run still in flight is orphaned by
    /// the epoch bump and drops its result at the final recheck.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.ensure_hydrated().await;

        let session = {
            let mut state = self.state();
            let Some(session) = state.session.as_ref() else {
                return Err(SessionError::NoActiveSession);
            };
            let outcome = state::transition(session.status, SessionAction::Cancel)?;
            if !matches!(outcome, TransitionOutcome::Discard) {
                return Err(TransitionError::Invalid {
                    from: session.status,
                    action: SessionAction::Cancel,
                }
                .into());
            }
            state.busy = false;
            state.deferred = None;
            state.last_done_wall_ms = None;
            state.epoch = state.epoch.wrapping_add(1);
            state.session.take()
        };
        self.buffer().clear();

        if let Some(session) = session {
            session.cleanup();
        }
        if let Err(err) = self.inner.store.clear().await {
            warn!("snapshot clear failed: {err}");
        }
        Ok(())
    }

    /// Handle an `INTERACTION_EVENT` message. Replies with the created step
    /// id, or `None` when the event was deduplicated, deferred, rejected by
    /// policy, or the pipeline failed — rejection is never an error. An
    /// event parked behind this run replays on its own task; the reply does
    /// not wait for it.
    pub async fn handle_interaction(&self, event: InteractionEvent) -> Option<String> {
        self.ensure_hydrated().await;
        let (reply, next) = self.execute(&event, false).await;
        if let Some(next) = next {
            self.spawn_replay(next);
        }
        reply
    }

    /// Gate, run and release one event. Returns the created step id and the
    /// deferred event this run uncovered, if any.
    async fn execute(
        &self,
        event: &InteractionEvent,
        from_queue: bool,
    ) -> (Option<String>, Option<InteractionEvent>) {
        let Some(ticket) = self.gate_and_mark(event, from_queue) else {
            return (None, None);
        };

        let result = self.run_pipeline(event, &ticket).await;
        let next = {
            let mut state = self.state();
            if state.epoch == ticket.epoch {
                state.busy = false;
                state.deferred.take()
            } else {
                // start() or cancel() already reset the flags; touching them
                // now would clobber the replacement session's run.
                None
            }
        };

        let reply = match result {
            Ok(Some(step)) => {
                debug!("step {} created: {}", step.step_number, step.description);
                Some(step.id)
            }
            Ok(None) => {
                debug!("pipeline run abandoned, no step created");
                None
            }
            Err(err) => {
                warn!("pipeline failed: {err}");
                None
            }
        };
        (reply, next)
    }

    /// Replay a deferred event without holding up the caller whose run
    /// uncovered it. The task drains follow-up deferrals the same way, so
    /// "at most one in flight, at most one deferred" still holds per epoch.
    fn spawn_replay(&self, event: InteractionEvent) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut pending = Some(event);
            while let Some(event) = pending.take() {
                debug!("replaying deferred {:?} event", event.kind);
                let (_, next) = orchestrator.execute(&event, true).await;
                pending = next;
            }
        });
    }

    /// Synchronous gate: decide, and in the same critical section either
    /// mark the pipeline busy or park the event in the deferred slot. A
    /// ticket comes back only for an accepted run.
    fn gate_and_mark(&self, event: &InteractionEvent, from_queue: bool) -> Option<RunTicket> {
        let mut state = self.state();

        let (status, steps_len, last_dom) = match state.session.as_ref() {
            Some(session) => (
                Some(session.status),
                session.steps.len(),
                session.last_step().map(|step| step.event.timestamp_ms),
            ),
            None => (None, 0, None),
        };
        let last = last_dom.map(|dom_ts_ms| LastStepMarker {
            dom_ts_ms,
            done_wall_ms: state.last_done_wall_ms,
        });

        let decision = dedup::evaluate(
            &self.inner.config,
            status,
            steps_len,
            last,
            event,
            now_ms(),
            state.busy,
            from_queue,
        );
        match decision {
            GateDecision::Run => {
                let session_id = state.session.as_ref().map(|s| s.id.clone())?;
                state.busy = true;
                Some(RunTicket {
                    epoch: state.epoch,
                    session_id,
                })
            }
            GateDecision::Defer => {
                debug!("event {:?} deferred behind busy pipeline", event.kind);
                if !dedup::offer_deferred(&mut state.deferred, event.clone()) {
                    debug!("event {:?} lost the deferred slot", event.kind);
                }
                None
            }
            GateDecision::Drop(reason) => {
                debug!("event {:?} dropped: {reason:?}", event.kind);
                None
            }
        }
    }

    /// Tell the instrumentation about a same-document navigation it cannot
    /// observe itself; it comes back as a synthetic navigation event.
    pub async fn notify_navigation(&self, url: &str) {
        if let Err(err) = self
            .inner
            .port
            .send(HostMessage::NavigationDetected {
                url: url.to_string(),
            })
            .await
        {
            debug!("navigation notify failed (page may be gone): {err}");
        }
    }

    /// Editor passthrough: replace a step's description.
    pub async fn rename_step(&self, step_id: &str, description: &str) -> bool {
        self.edit_session(|session| session.rename_step(step_id, description))
            .await
    }

    /// Editor passthrough: delete a step; numbering stays contiguous.
    pub async fn delete_step(&self, step_id: &str) -> bool {
        self.edit_session(|session| session.delete_step(step_id)).await
    }

    /// Editor passthrough: move a step to a 1-based position.
    pub async fn move_step(&self, step_id: &str, position: u32) -> bool {
        self.edit_session(|session| session.move_step(step_id, position))
            .await
    }

    async fn edit_session<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut CaptureSession) -> bool,
    {
        self.ensure_hydrated().await;
        let changed = {
            let mut state = self.state();
            match state.session.as_mut() {
                Some(session) => edit(session),
                None => false,
            }
        };
        if changed {
            self.persist().await;
        }
        changed
    }

    /// Snapshot of the current session, if any.
    pub async fn session(&self) -> Option<CaptureSession> {
        self.ensure_hydrated().await;
        self.state().session.clone()
    }
}
