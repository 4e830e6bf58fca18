use super::Scheduler;
use crate::store::Effect;
use crate::task::{JobSpec, TaskState};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hearth::logging::{debug, info};
use serde_derive::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;

/// Submission receipt handed back to the client. Field casing matches the
/// legacy wire format.
#[derive(Serialize, Clone, Debug)]
pub struct Ticket {
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "State")]
    pub state: String,
}

/// Outcome of an upload-completion check.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UploadOutcome {
    Completed,
    Uploading,
    NotUploaded,
    Failed,
}

impl UploadOutcome {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            UploadOutcome::Completed => "Completed",
            UploadOutcome::Uploading => "Uploading",
            UploadOutcome::NotUploaded => "Not uploaded",
            UploadOutcome::Failed => "General error",
        }
    }
}

/// Per-job aggregate progress. `nb` counts every task of the job plus every
/// live render, so rendering frames are counted twice; the legacy clients
/// expect exactly this aggregate.
#[derive(Serialize, Clone, Debug)]
pub struct JobProgress {
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Percent")]
    pub percent: f64,
    #[serde(rename = "Nb")]
    pub nb: u64,
    #[serde(rename = "StartTime")]
    pub start_time: String,
}

/// Job ids only need to be unique and opaque at human submission rates:
/// a digest of the submission instant, slashes stripped for URL safety.
fn job_token() -> String {
    let stamp = hearth::time::wallclock_string();
    let digest = Sha256::digest(stamp.as_bytes());

    STANDARD.encode(digest).replace('/', "")
}

impl Scheduler {
    /// Expands a submission into one `uploading` task per frame, registers
    /// them and queues the bulk insert. The job is ready for its input
    /// upload once the receipt is returned.
    pub fn submit_job(&self, spec: JobSpec) -> Ticket {
        let id = job_token();
        let tasks = spec.expand(&id);

        info!(self.log, "job submitted";
              "project" => &spec.project,
              "id" => &id,
              "frames" => tasks.len());

        let rows = tasks.iter().map(|task| task.snapshot()).collect();

        self.registry.insert_job(&id, tasks);
        self.sink.push(Effect::InsertTasks { rows });

        Ticket {
            token: id,
            project: spec.project,
            state: "ready".to_string(),
        }
    }

    /// Verifies the uploaded input against the declared size and, on a
    /// match, releases every frame of the job to the dispatch pool. The
    /// size check fences out partially transferred files.
    pub fn upload_completed(&self, id: &str, input: &str, declared: u64) -> UploadOutcome {
        let path = self.config().folder.join(id).join(input);

        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(ref err) if err.kind() == io::ErrorKind::NotFound => {
                return UploadOutcome::NotUploaded;
            }
            Err(_) => return UploadOutcome::Failed,
        };

        if !meta.is_file() || meta.len() != declared {
            return UploadOutcome::Uploading;
        }

        if let Some(tasks) = self.registry.job_tasks(id) {
            for task in tasks {
                // Only frames still uploading move on; an aborted job must
                // not resurrect.
                if task.transition(TaskState::Uploading, TaskState::Waiting) {
                    self.sink.push(Effect::TaskState {
                        id: id.to_string(),
                        frame: task.frame,
                        state: TaskState::Waiting,
                    });
                }
            }
        }

        info!(self.log, "upload completed"; "id" => id, "input" => input, "bytes" => declared);

        UploadOutcome::Completed
    }

    /// Marks every non-terminal frame of the job `abort` and drops its
    /// renders wholesale; in-flight workers pick the signal up on their
    /// next heartbeat. Returns false for an unknown job.
    pub fn abort_job(&self, id: &str) -> bool {
        let tasks = match self.registry.job_tasks(id) {
            Some(tasks) => tasks,
            None => return false,
        };

        for task in &tasks {
            let mut state = task.lock();

            if state.is_terminal() {
                continue;
            }

            *state = TaskState::Abort;
            drop(state);

            self.sink.push(Effect::TaskState {
                id: id.to_string(),
                frame: task.frame,
                state: TaskState::Abort,
            });
        }

        let dropped = self.registry.remove_job_renders(id);

        info!(self.log, "job aborted"; "id" => id, "frames" => tasks.len(), "live_renders" => dropped);

        true
    }

    /// Aggregate progress per job: every rendered frame contributes 1.0,
    /// every live render its reported fraction, and `nb` counts both walks.
    pub fn job_progress(&self) -> Vec<JobProgress> {
        let mut report: Vec<JobProgress> = Vec::new();

        let position = |report: &mut Vec<JobProgress>, id: &str, project: &str, start: &str| {
            match report.iter().position(|entry| entry.id == id) {
                Some(at) => at,
                None => {
                    report.push(JobProgress {
                        project: project.to_string(),
                        id: id.to_string(),
                        percent: 0.0,
                        nb: 0,
                        start_time: start.to_string(),
                    });
                    report.len() - 1
                }
            }
        };

        for (id, tasks) in self.registry.jobs() {
            for task in &tasks {
                let at = position(&mut report, &id, &task.project, &task.start_time);

                report[at].nb += 1;

                if task.state() == TaskState::Rendered {
                    report[at].percent += 1.0;
                }
            }
        }

        for (id, frame, render) in self.registry.renders() {
            let (project, start_time) = match self.registry.task(&id, frame) {
                Some(task) => (task.project.clone(), task.start_time.clone()),
                None => (String::new(), String::new()),
            };

            let at = position(&mut report, &id, &project, &start_time);

            report[at].nb += 1;
            report[at].percent += render.percent.parse::<f64>().unwrap_or(0.0);
        }

        for entry in report.iter_mut() {
            if entry.nb > 0 {
                entry.percent /= entry.nb as f64;
            }
        }

        debug!(self.log, "progress report built"; "jobs" => report.len());

        report
    }
}
