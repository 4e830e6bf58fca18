//! Start-up seeding of the registry from the row store.

use crate::node::{Node, NodeState};
use crate::registry::Registry;
use crate::store::{Store, StoreError};
use crate::task::{Task, TaskState};
use hearth::logging::{self, info, warn};
use std::sync::Arc;

/// Result of seeding the registry from storage.
pub struct Seeded {
    pub registry: Arc<Registry>,
    /// Api keys of every recovered node, to be admitted into the client
    /// key list.
    pub node_keys: Vec<String>,
}

/// Rebuilds the working set from storage. Nodes come back with their last
/// persisted state. Tasks in a terminal state stay behind; tasks that were
/// `rendering` when the coordinator died are demoted to `waiting` before
/// the registry becomes visible, so the frames get dispatched again.
pub fn seed(store: &mut dyn Store, log: &logging::Logger) -> Result<Seeded, StoreError> {
    let registry = Registry::new();
    let mut node_keys = Vec::new();

    let node_rows = store.load_nodes()?;
    let node_count = node_rows.len();

    for row in node_rows {
        let state = match NodeState::parse(&row.state) {
            Some(state) => state,
            None => {
                warn!(log, "skipping node row with unknown state";
                      "name" => &row.name,
                      "ip" => &row.ip,
                      "state" => &row.state);
                continue;
            }
        };

        node_keys.push(row.api_key.clone());
        registry.register_node(Arc::new(Node::from_row(row, state)));
    }

    let task_rows = store.load_tasks()?;
    let row_count = task_rows.len();
    let mut live = 0usize;

    for row in task_rows {
        let state = match TaskState::parse(&row.state) {
            Some(state) => state,
            None => {
                warn!(log, "skipping task row with unknown state";
                      "id" => &row.id,
                      "frame" => row.frame,
                      "state" => &row.state);
                continue;
            }
        };

        if state.is_terminal() {
            continue;
        }

        let state = if state == TaskState::Rendering {
            TaskState::Waiting
        } else {
            state
        };

        let id = row.id.clone();
        registry.insert_job(&id, vec![Arc::new(Task::from_row(row, state))]);
        live += 1;
    }

    info!(log, "registry seeded from storage";
          "nodes" => node_count,
          "task_rows" => row_count,
          "live_tasks" => live);

    Ok(Seeded {
        registry: Arc::new(registry),
        node_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRow;
    use crate::store::mem::MemStore;
    use crate::task::TaskRow;

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

    fn node_row(name: &str, state: &str) -> NodeRow {
        NodeRow {
            name: name.to_string(),
            ip: "10.0.0.5".to_string(),
            api_key: format!("{}_key", name),
            state: state.to_string(),
        }
    }

    #[test]
    fn test_rendering_tasks_demoted_to_waiting() {
        let mut store = MemStore::new();
        store.seed_task(task_row("job1", 1, "rendering"));
        store.seed_task(task_row("job1", 2, "waiting"));
        store.seed_task(task_row("job1", 3, "uploading"));

        let seeded = seed(&mut store, &logging::discard()).unwrap();

        let registry = seeded.registry;
        assert_eq!(
            registry.task("job1", 1).unwrap().state(),
            TaskState::Waiting
        );
        assert_eq!(
            registry.task("job1", 2).unwrap().state(),
            TaskState::Waiting
        );
        assert_eq!(
            registry.task("job1", 3).unwrap().state(),
            TaskState::Uploading
        );
    }

    #[test]
    fn test_terminal_tasks_not_loaded() {
        let mut store = MemStore::new();
        store.seed_task(task_row("job1", 1, "rendered"));
        store.seed_task(task_row("job1", 2, "failed"));
        store.seed_task(task_row("job1", 3, "abort"));
        store.seed_task(task_row("job1", 4, "waiting"));

        let seeded = seed(&mut store, &logging::discard()).unwrap();

        let tasks = seeded.registry.job_tasks("job1").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].frame, 4);
    }

    #[test]
    fn test_unknown_task_state_skipped() {
        let mut store = MemStore::new();
        store.seed_task(task_row("job1", 1, "completed"));
        store.seed_task(task_row("job1", 2, "waiting"));

        let seeded = seed(&mut store, &logging::discard()).unwrap();

        let tasks = seeded.registry.job_tasks("job1").unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_nodes_keep_persisted_state() {
        let mut store = MemStore::new();
        store.seed_node(node_row("w1", "rendering"));
        store.seed_node(node_row("w2", "down"));

        let seeded = seed(&mut store, &logging::discard()).unwrap();

        assert_eq!(
            seeded.registry.node("w1//10.0.0.5").unwrap().state(),
            NodeState::Rendering
        );
        assert_eq!(
            seeded.registry.node("w2//10.0.0.5").unwrap().state(),
            NodeState::Down
        );
        assert_eq!(seeded.node_keys, vec!["w1_key", "w2_key"]);
    }
}
