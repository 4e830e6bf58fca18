use super::Scheduler;
use crate::node::Node;
use crate::registry::Render;
use crate::store::Effect;
use crate::task::{TaskRow, TaskState};
use hearth::logging::{debug, info, warn};
use std::sync::Arc;

/// Reply of a heartbeat, folded to the stable wire strings by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatReply {
    /// Progress recorded (and the frame completed, if reported rendered).
    Ok,
    /// The job was aborted; the worker must stop its renderer.
    Abort,
    /// No live render matches `(id, frame)`.
    NoRender,
    /// The frame is in a state that takes no heartbeats; the worker treats
    /// this as a cancel.
    FrameIs(TaskState),
}

impl Scheduler {
    /// Hands the first waiting frame to the calling node. The task state is
    /// re-checked under its mutex and the node is commissioned before the
    /// frame is marked rendering, so two concurrent calls can neither share
    /// a frame nor a node. Returns nothing when no frame is waiting or the
    /// node lost its commission race.
    pub fn next_task(&self, node: &Arc<Node>) -> Option<TaskRow> {
        for (id, tasks) in self.registry.jobs() {
            for task in tasks {
                let mut state = task.lock();

                // Double-check after acquisition: the scan saw an older state.
                if *state != TaskState::Waiting {
                    continue;
                }

                if !node.commission() {
                    debug!(self.log, "commission refused"; "node" => node.key(), "id" => &id);
                    return None;
                }

                *state = TaskState::Rendering;
                self.registry
                    .insert_render(&id, task.frame, Render::new(node.key()));
                drop(state);

                self.sink.push(Effect::TaskState {
                    id: id.clone(),
                    frame: task.frame,
                    state: TaskState::Rendering,
                });
                self.sink.push(Effect::NodeState {
                    name: node.name.clone(),
                    ip: node.ip.clone(),
                    state: node.state(),
                });

                info!(self.log, "frame dispatched";
                      "id" => &id,
                      "frame" => task.frame,
                      "node" => node.key());

                return Some(task.snapshot());
            }
        }

        None
    }

    /// Records a worker's progress report for `(id, frame)`. Completion
    /// frees the node and retires the render; an aborted frame answers the
    /// abort signal whether or not its render is still in the table, since
    /// AbortJob drops renders wholesale.
    pub fn heartbeat(
        &self,
        id: &str,
        frame: u32,
        reported: TaskState,
        percent: &str,
        mem: &str,
    ) -> HeartbeatReply {
        let task = match self.registry.task(id, frame) {
            Some(task) => task,
            None => return HeartbeatReply::NoRender,
        };

        let mut state = task.lock();

        match *state {
            TaskState::Abort => {
                drop(state);
                self.registry.remove_render(id, frame);

                debug!(self.log, "abort signalled to worker"; "id" => id, "frame" => frame);

                HeartbeatReply::Abort
            }
            TaskState::Rendering => {
                let render = match self.registry.render(id, frame) {
                    Some(render) => render,
                    None => {
                        drop(state);
                        return HeartbeatReply::NoRender;
                    }
                };

                self.registry.set_render_progress(id, frame, percent, mem);
                *state = reported;

                // The render leaves the table under the same guard that
                // completes the frame.
                if reported == TaskState::Rendered {
                    self.registry.remove_render(id, frame);
                }

                drop(state);

                if reported == TaskState::Rendered {
                    if let Some(node) = self.registry.node(&render.node_key) {
                        node.free();
                        self.sink.push(Effect::NodeState {
                            name: node.name.clone(),
                            ip: node.ip.clone(),
                            state: node.state(),
                        });
                    }

                    self.sink.push(Effect::TaskState {
                        id: id.to_string(),
                        frame,
                        state: TaskState::Rendered,
                    });

                    info!(self.log, "frame completed"; "id" => id, "frame" => frame);
                } else {
                    debug!(self.log, "heartbeat";
                           "id" => id,
                           "frame" => frame,
                           "percent" => percent,
                           "mem" => mem);
                }

                HeartbeatReply::Ok
            }
            other => {
                drop(state);

                // A frame in any other state only has a diagnostic to offer,
                // and only while a render is still pointing at it.
                if self.registry.render(id, frame).is_none() {
                    return HeartbeatReply::NoRender;
                }

                warn!(self.log, "heartbeat for inactive frame";
                      "id" => id,
                      "frame" => frame,
                      "state" => other.as_str());

                HeartbeatReply::FrameIs(other)
            }
        }
    }
}
