use parking_lot::{Mutex, MutexGuard};
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of a single frame. `rendered`, `abort` and `failed` are
/// terminal: once reached, a task never transitions again.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskState {
    Uploading,
    Waiting,
    Rendering,
    Rendered,
    Abort,
    Failed,
}

impl TaskState {
    /// The wire and storage encoding, a closed set of lower-case tokens.
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Uploading => "uploading",
            TaskState::Waiting => "waiting",
            TaskState::Rendering => "rendering",
            TaskState::Rendered => "rendered",
            TaskState::Abort => "abort",
            TaskState::Failed => "failed",
        }
    }

    pub fn parse(token: &str) -> Option<TaskState> {
        match token {
            "uploading" => Some(TaskState::Uploading),
            "waiting" => Some(TaskState::Waiting),
            "rendering" => Some(TaskState::Rendering),
            "rendered" => Some(TaskState::Rendered),
            "abort" => Some(TaskState::Abort),
            "failed" => Some(TaskState::Failed),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        match self {
            TaskState::Rendered | TaskState::Abort | TaskState::Failed => true,
            _ => false,
        }
    }
}

/// One frame of one submitted job. The immutable identity fields are set at
/// submission; only `state` mutates, always inside the per-task mutex.
pub struct Task {
    pub project: String,
    pub id: String,
    pub input: String,
    pub output: String,
    pub frame: u32,
    pub renderer_name: String,
    pub renderer_version: String,
    pub start_time: String,
    state: Mutex<TaskState>,
}

impl Task {
    pub fn from_row(row: TaskRow, state: TaskState) -> Task {
        Task {
            project: row.project,
            id: row.id,
            input: row.input,
            output: row.output,
            frame: row.frame,
            renderer_name: row.renderer_name,
            renderer_version: row.renderer_version,
            start_time: row.start_time,
            state: Mutex::new(state),
        }
    }

    /// Current state. Crosses the task critical section.
    #[inline]
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Unconditional state set.
    #[inline]
    pub fn set_state(&self, next: TaskState) {
        *self.state.lock() = next;
    }

    /// Compare-and-set under the task mutex. Returns true if the transition
    /// was taken.
    #[inline]
    pub fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let mut state = self.state.lock();

        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Exposes the state guard for read-check-write sequences that must not
    /// interleave, such as the dispatch double-check.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock()
    }

    /// Plain row image of the task at this instant.
    pub fn snapshot(&self) -> TaskRow {
        TaskRow {
            project: self.project.clone(),
            id: self.id.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            frame: self.frame,
            state: self.state().as_str().to_string(),
            renderer_name: self.renderer_name.clone(),
            renderer_version: self.renderer_version.clone(),
            start_time: self.start_time.clone(),
        }
    }
}

/// Serializable image of a task: the storage row and the JSON body handed to
/// workers. Field casing matches the legacy wire format.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TaskRow {
    pub project: String,
    pub id: String,
    pub input: String,
    pub output: String,
    pub frame: u32,
    pub state: String,
    #[serde(rename = "rendererName")]
    pub renderer_name: String,
    #[serde(rename = "rendererVersion")]
    pub renderer_version: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
}

/// A submitted render job before expansion into per-frame tasks.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub project: String,
    pub input: String,
    pub output: String,
    pub frame_start: u32,
    pub frame_stop: u32,
    pub renderer_name: String,
    pub renderer_version: String,
    pub start_time: String,
}

impl JobSpec {
    /// Expands the submission into one task per frame in
    /// `[frame_start, frame_stop]`, all starting out as `uploading`.
    pub fn expand(&self, id: &str) -> Vec<Arc<Task>> {
        let mut tasks = Vec::new();

        for frame in self.frame_start..=self.frame_stop {
            tasks.push(Arc::new(Task {
                project: self.project.clone(),
                id: id.to_string(),
                input: self.input.clone(),
                output: self.output.clone(),
                frame,
                renderer_name: self.renderer_name.clone(),
                renderer_version: self.renderer_version.clone(),
                start_time: self.start_time.clone(),
                state: Mutex::new(TaskState::Uploading),
            }))
        }

        tasks
    }
}
