//! Pagecast turns loosely-ordered interaction signals from an instrumented
//! page into an ordered, screenshot-backed workflow recording.
//!
//! The crate is the orchestration core only: the session state machine, the
//! event dedup gate with its single deferred slot, the screenshot pipeline
//! with the pre-click fast path, and best-effort persistence for transparent
//! recovery after a host restart. DOM inspection, the annotation editor and
//! export rendering live behind the trait seams in [`recorder::port`] and
//! [`recorder::storage`].

pub mod recorder;

pub use recorder::dedup::{DropReason, GateDecision};
pub use recorder::pipeline::PipelineError;
pub use recorder::port::{CaptureError, HostAck, HostMessage, HostPort, PortError, ScreenSource};
pub use recorder::pre_click::{PreClickBuffer, ScreenshotLock, ShowRequest};
pub use recorder::session::{CaptureSession, SessionOptions};
pub use recorder::state::{SessionAction, SessionStatus, TransitionError, TransitionOutcome};
pub use recorder::storage::{JsonStore, SessionStore, StorageError};
pub use recorder::types::{
    CaptureConfig, CaptureMode, ElementInfo, EventKind, InteractionEvent, Step,
};
pub use recorder::{Orchestrator, SessionError};
