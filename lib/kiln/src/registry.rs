use crate::node::Node;
use crate::task::Task;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// The live association between a commissioned task and the node producing
/// it. Carries lookup keys only; tasks and nodes are re-resolved through the
/// registry by whoever holds a render.
#[derive(Clone, Debug)]
pub struct Render {
    pub node_key: String,
    /// String-encoded progress fraction in `[0, 1]`, as reported.
    pub percent: String,
    /// String-encoded memory use, as reported.
    pub mem: String,
}

impl Render {
    pub fn new(node_key: String) -> Render {
        Render {
            node_key,
            percent: "0.0".to_string(),
            mem: "0.0".to_string(),
        }
    }
}

/// Concurrent working set of the coordinator: tasks keyed by job id and
/// frame, nodes keyed by `name//ip`, renders keyed like tasks. Lookups hand
/// out `Arc` clones; no registry lock is held across caller code.
pub struct Registry {
    tasks: RwLock<HashMap<String, HashMap<u32, Arc<Task>>>>,
    nodes: RwLock<HashMap<String, Arc<Node>>>,
    renders: RwLock<HashMap<String, HashMap<u32, Render>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            tasks: RwLock::new(HashMap::new()),
            nodes: RwLock::new(HashMap::new()),
            renders: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts the expanded tasks of a job, keyed by frame. Frames already
    /// present are left untouched.
    pub fn insert_job(&self, id: &str, tasks: Vec<Arc<Task>>) {
        let mut guard = self.tasks.write();
        let frames = guard.entry(id.to_string()).or_insert_with(HashMap::new);

        for task in tasks {
            frames.entry(task.frame).or_insert(task);
        }
    }

    #[inline]
    pub fn has_job(&self, id: &str) -> bool {
        self.tasks.read().contains_key(id)
    }

    /// All tasks of one job, sorted by frame.
    pub fn job_tasks(&self, id: &str) -> Option<Vec<Arc<Task>>> {
        let guard = self.tasks.read();

        guard.get(id).map(|frames| {
            let mut tasks: Vec<_> = frames.values().cloned().collect();
            tasks.sort_by_key(|task| task.frame);
            tasks
        })
    }

    #[inline]
    pub fn task(&self, id: &str, frame: u32) -> Option<Arc<Task>> {
        self.tasks
            .read()
            .get(id)
            .and_then(|frames| frames.get(&frame))
            .cloned()
    }

    /// Point-in-time snapshot of every job with its tasks sorted by frame.
    /// Job order is unspecified.
    pub fn jobs(&self) -> Vec<(String, Vec<Arc<Task>>)> {
        let guard = self.tasks.read();

        guard
            .iter()
            .map(|(id, frames)| {
                let mut tasks: Vec<_> = frames.values().cloned().collect();
                tasks.sort_by_key(|task| task.frame);
                (id.clone(), tasks)
            })
            .collect()
    }

    /// Registers a node under its `name//ip` key. Returns false if the key
    /// was already taken (the existing node is kept).
    pub fn register_node(&self, node: Arc<Node>) -> bool {
        let mut guard = self.nodes.write();
        let key = node.key();

        if guard.contains_key(&key) {
            false
        } else {
            guard.insert(key, node);
            true
        }
    }

    #[inline]
    pub fn node(&self, key: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(key).cloned()
    }

    /// Point-in-time snapshot of all registered nodes.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn insert_render(&self, id: &str, frame: u32, render: Render) {
        self.renders
            .write()
            .entry(id.to_string())
            .or_insert_with(HashMap::new)
            .insert(frame, render);
    }

    #[inline]
    pub fn render(&self, id: &str, frame: u32) -> Option<Render> {
        self.renders
            .read()
            .get(id)
            .and_then(|frames| frames.get(&frame))
            .cloned()
    }

    /// Updates the reported progress of a live render. Returns false if the
    /// render is gone.
    pub fn set_render_progress(&self, id: &str, frame: u32, percent: &str, mem: &str) -> bool {
        let mut guard = self.renders.write();

        match guard.get_mut(id).and_then(|frames| frames.get_mut(&frame)) {
            Some(render) => {
                render.percent = percent.to_string();
                render.mem = mem.to_string();
                true
            }
            None => false,
        }
    }

    /// Removes one render, returning it if it existed. Empty per-job maps
    /// are dropped so job ids do not accumulate.
    pub fn remove_render(&self, id: &str, frame: u32) -> Option<Render> {
        let mut guard = self.renders.write();
        let removed = guard.get_mut(id).and_then(|frames| frames.remove(&frame));

        if let Some(frames) = guard.get(id) {
            if frames.is_empty() {
                guard.remove(id);
            }
        }

        removed
    }

    /// Removes every render of one job wholesale, returning how many there
    /// were.
    pub fn remove_job_renders(&self, id: &str) -> usize {
        self.renders
            .write()
            .remove(id)
            .map(|frames| frames.len())
            .unwrap_or(0)
    }

    /// Removes every render held by one node, returning the `(id, frame)`
    /// coordinates of the affected tasks.
    pub fn drain_node_renders(&self, node_key: &str) -> Vec<(String, u32)> {
        let mut guard = self.renders.write();
        let mut drained = Vec::new();

        for (id, frames) in guard.iter_mut() {
            frames.retain(|&frame, render| {
                if render.node_key == node_key {
                    drained.push((id.clone(), frame));
                    false
                } else {
                    true
                }
            });
        }

        guard.retain(|_, frames| !frames.is_empty());

        drained
    }

    /// Point-in-time snapshot of every live render.
    pub fn renders(&self) -> Vec<(String, u32, Render)> {
        let guard = self.renders.read();

        guard
            .iter()
            .flat_map(|(id, frames)| {
                frames
                    .iter()
                    .map(move |(&frame, render)| (id.clone(), frame, render.clone()))
            })
            .collect()
    }

    pub fn render_count(&self, id: &str) -> usize {
        self.renders
            .read()
            .get(id)
            .map(|frames| frames.len())
            .unwrap_or(0)
    }
}
