//! One recording in progress or completed: the ordered step list plus the
//! per-session screenshot directory.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::SessionStatus;
use super::types::{now_ms, CaptureMode, Step};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub page_id: String,
    pub title: String,
    pub mode: CaptureMode,
    pub start_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSession {
    pub id: String,
    pub page_id: String,
    pub status: SessionStatus,
    pub title: String,
    pub mode: CaptureMode,
    pub steps: Vec<Step>,
    pub start_url: String,
    pub started_at_ms: i64,
    pub updated_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub temp_dir: PathBuf,
}

impl CaptureSession {
    /// Create a session in `Capturing` state with its screenshot directory
    /// under `cache_root`.
    pub fn new(options: SessionOptions, cache_root: &Path) -> io::Result<Self> {
        let id = Uuid::new_v4().to_string();
        let temp_dir = cache_root.join(&id);
        std::fs::create_dir_all(&temp_dir)?;

        let now = now_ms();
        Ok(Self {
            id,
            page_id: options.page_id,
            status: SessionStatus::Capturing,
            title: options.title,
            mode: options.mode,
            steps: Vec::new(),
            start_url: options.start_url,
            started_at_ms: now,
            updated_at_ms: now,
            completed_at_ms: None,
            temp_dir,
        })
    }

    /// Remove this session's temp directory and all screenshots.
    pub fn cleanup(&self) {
        if self.temp_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.temp_dir);
        }
    }

    /// Next value in the contiguous 1..N step numbering.
    pub fn next_step_number(&self) -> u32 {
        self.steps.len() as u32 + 1
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
        self.updated_at_ms = now_ms();
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn screenshot_path(&self, step_id: &str) -> PathBuf {
        self.temp_dir.join(format!("{step_id}.png"))
    }

    pub fn thumbnail_path(&self, step_id: &str) -> PathBuf {
        self.temp_dir.join(format!("{step_id}.thumb.png"))
    }

    /// Editor operation: replace a step's description.
    pub fn rename_step(&mut self, step_id: &str, description: &str) -> bool {
        let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) else {
            return false;
        };
        step.description = description.to_string();
        self.updated_at_ms = now_ms();
        true
    }

    /// Editor operation: delete a step and close the numbering gap. Also
    /// removes the step's screenshot files.
    pub fn delete_step(&mut self, step_id: &str) -> bool {
        let Some(index) = self.steps.iter().position(|s| s.id == step_id) else {
            return false;
        };
        let step = self.steps.remove(index);
        for path in [&step.screenshot_path, &step.thumbnail_path] {
            if let Some(path) = path {
                let _ = std::fs::remove_file(path);
            }
        }
        self.renumber();
        self.updated_at_ms = now_ms();
        true
    }

    /// Editor operation: move a step to a 1-based position, shifting the
    /// others linearly.
    pub fn move_step(&mut self, step_id: &str, position: u32) -> bool {
        if position == 0 || position as usize > self.steps.len() {
            return false;
        }
        let Some(index) = self.steps.iter().position(|s| s.id == step_id) else {
            return false;
        };
        let step = self.steps.remove(index);
        self.steps.insert(position as usize - 1, step);
        self.renumber();
        self.updated_at_ms = now_ms();
        true
    }

    fn renumber(&mut self) {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.step_number = index as u32 + 1;
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_step(number: u32, dom_ts_ms: i64) -> Step {
    use super::types::{EventKind, InteractionEvent};

    let mut event = InteractionEvent::new(EventKind::Click, "https://example.com");
    event.timestamp_ms = dom_ts_ms;
    Step {
        id: Uuid::new_v4().to_string(),
        step_number: number,
        description: format!("Step {number}"),
        screenshot_path: None,
        thumbnail_path: None,
        element: None,
        event,
        timestamp_ms: dom_ts_ms,
        url: "https://example.com".to_string(),
        annotations: None,
    }
}
