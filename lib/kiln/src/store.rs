use crate::node::{NodeRow, NodeState};
use crate::task::{TaskRow, TaskState};
use crossbeam_channel::{Receiver, Sender};
use hearth::logging::{self, debug, error, o};
use std::thread;

/// One durable mutation, queued by a request handler and applied by the
/// writer. Effects for one entity are applied in enqueue order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Update the state column of one task row.
    TaskState {
        id: String,
        frame: u32,
        state: TaskState,
    },
    /// Bulk insert for a newly submitted job.
    InsertTasks { rows: Vec<TaskRow> },
    /// Update the state column of one node row.
    NodeState {
        name: String,
        ip: String,
        state: NodeState,
    },
    /// New worker registration.
    InsertNode { row: NodeRow },
}

#[derive(Debug)]
pub enum StoreError {
    /// The underlying row store rejected the operation.
    Driver(String),
    /// A loaded row could not be interpreted.
    Corrupt(String),
}

/// Boundary contract of the durable row store. Implementations apply each
/// effect in a single transaction; prepared-statement reuse and locking are
/// the driver's concern. The writer thread is the only caller of `apply`.
pub trait Store: Send {
    fn apply(&mut self, effect: &Effect) -> Result<(), StoreError>;

    /// All task rows, terminal or not. Interpretation happens at recovery.
    fn load_tasks(&mut self) -> Result<Vec<TaskRow>, StoreError>;

    fn load_nodes(&mut self) -> Result<Vec<NodeRow>, StoreError>;
}

/// Producer handle to the effect queue. Enqueueing never blocks and never
/// touches storage.
#[derive(Clone)]
pub struct EffectSink {
    tx: Sender<Effect>,
}

impl EffectSink {
    #[inline]
    pub fn push(&self, effect: Effect) {
        // A send error means the writer is gone, which only happens during
        // shutdown; the record is dropped with the rest of the queue.
        drop(self.tx.send(effect));
    }
}

/// Single-writer background thread draining the effect queue in FIFO order.
/// A record the store rejects is logged and skipped; the in-memory registry
/// remains the truth.
pub struct EffectWriter {
    tx: Option<Sender<Effect>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EffectWriter {
    pub fn spawn(mut store: Box<dyn Store>, log: &logging::Logger) -> EffectWriter {
        let (tx, rx): (Sender<Effect>, Receiver<Effect>) = crossbeam_channel::unbounded();
        let writer_log = log.new(o!("thread" => "effect-writer"));

        let thread = thread::Builder::new()
            .name("effect-writer".to_string())
            .spawn(move || {
                for effect in rx.iter() {
                    if let Err(err) = store.apply(&effect) {
                        error!(writer_log, "dropping effect record";
                               "err" => ?err,
                               "effect" => ?effect);
                    }
                }

                debug!(writer_log, "effect queue drained");
            })
            .expect("Failed to spawn effect writer");

        EffectWriter {
            tx: Some(tx),
            thread: Some(thread),
        }
    }

    /// New producer handle. Handles stay valid for the writer's lifetime.
    pub fn sink(&self) -> EffectSink {
        EffectSink {
            tx: self.tx.as_ref().expect("Writer already shut down").clone(),
        }
    }

    /// Closes the queue and waits for the final drain. Outstanding sinks
    /// must be dropped first or the join will wait on them.
    pub fn shutdown(mut self) {
        self.tx.take();

        if let Some(thread) = self.thread.take() {
            drop(thread.join());
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mem::MemStore;
    use super::*;
    use hearth::logging;

    fn task_row(id: &str, frame: u32, state: &str) -> TaskRow {
        TaskRow {
            project: "cube".to_string(),
            id: id.to_string(),
            input: "cube.blend".to_string(),
            output: "cube_out".to_string(),
            frame,
            state: state.to_string(),
            renderer_name: "blender".to_string(),
            renderer_version: "2.91.0".to_string(),
            start_time: "t0".to_string(),
        }
    }

    #[test]
    fn test_writer_applies_in_enqueue_order() {
        let store = MemStore::new();
        let writer = EffectWriter::spawn(Box::new(store.clone()), &logging::discard());
        let sink = writer.sink();

        sink.push(Effect::InsertTasks {
            rows: vec![task_row("job1", 1, "uploading")],
        });
        sink.push(Effect::TaskState {
            id: "job1".to_string(),
            frame: 1,
            state: TaskState::Waiting,
        });
        sink.push(Effect::TaskState {
            id: "job1".to_string(),
            frame: 1,
            state: TaskState::Rendering,
        });

        drop(sink);
        writer.shutdown();

        assert_eq!(store.task_state("job1", 1).unwrap(), "rendering");
    }

    #[test]
    fn test_writer_skips_failed_records() {
        let store = MemStore::new();
        store.seed_task(task_row("job1", 1, "uploading"));
        store.fail_next(1);

        let writer = EffectWriter::spawn(Box::new(store.clone()), &logging::discard());
        let sink = writer.sink();

        // The first record fails and is dropped; the second still lands.
        sink.push(Effect::TaskState {
            id: "job1".to_string(),
            frame: 1,
            state: TaskState::Waiting,
        });
        sink.push(Effect::TaskState {
            id: "job1".to_string(),
            frame: 1,
            state: TaskState::Abort,
        });

        drop(sink);
        writer.shutdown();

        assert_eq!(store.task_state("job1", 1).unwrap(), "abort");
    }

    #[test]
    fn test_writer_handles_concurrent_producers() {
        let store = MemStore::new();
        let writer = EffectWriter::spawn(Box::new(store.clone()), &logging::discard());

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let sink = writer.sink();
                std::thread::spawn(move || {
                    for frame in 0..50u32 {
                        sink.push(Effect::InsertTasks {
                            rows: vec![task_row(&format!("job{}", producer), frame, "uploading")],
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        writer.shutdown();

        assert_eq!(store.task_rows().len(), 200);
    }

    #[test]
    fn test_node_effects() {
        let store = MemStore::new();
        let writer = EffectWriter::spawn(Box::new(store.clone()), &logging::discard());
        let sink = writer.sink();

        sink.push(Effect::InsertNode {
            row: NodeRow {
                name: "w1".to_string(),
                ip: "10.0.0.5".to_string(),
                api_key: "key".to_string(),
                state: "available".to_string(),
            },
        });
        sink.push(Effect::NodeState {
            name: "w1".to_string(),
            ip: "10.0.0.5".to_string(),
            state: NodeState::Rendering,
        });

        drop(sink);
        writer.shutdown();

        assert_eq!(store.node_state("w1", "10.0.0.5").unwrap(), "rendering");
    }
}
