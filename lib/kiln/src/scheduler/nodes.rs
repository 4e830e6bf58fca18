use super::Scheduler;
use crate::node::{Node, NodeState};
use crate::store::Effect;
use crate::task::TaskState;
use hearth::logging::{info, warn};
use std::sync::Arc;

/// Outcome of a worker registration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Registration {
    Added,
    Exists,
}

impl Registration {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Registration::Added => "Added",
            Registration::Exists => "Exists",
        }
    }
}

impl Scheduler {
    /// Registers a worker under `(name, ip)`, or re-announces an existing
    /// one. Either way the node ends up available; the api key is stored
    /// for auditing, not authenticated here.
    pub fn register_node(&self, name: &str, ip: &str, api_key: &str) -> Registration {
        if let Some(node) = self.resolve_node(name, ip) {
            node.set_state(NodeState::Available);
            self.push_node_state(&node);

            info!(self.log, "node re-announced"; "node" => node.key());

            return Registration::Exists;
        }

        let node = Arc::new(Node::new(name, ip, api_key, NodeState::Available));

        if self.registry.register_node(node.clone()) {
            self.sink.push(Effect::InsertNode { row: node.row() });

            info!(self.log, "node registered"; "node" => node.key());

            Registration::Added
        } else {
            // Lost an insert race with a concurrent registration of the
            // same key; treat like a re-announcement.
            let node = self.resolve_node(name, ip).expect("Node vanished after race");
            node.set_state(NodeState::Available);
            self.push_node_state(&node);

            Registration::Exists
        }
    }

    /// Returns a worker to the pool after it finished or gave up a frame.
    /// Returns false for an unknown node.
    pub fn release_node(&self, name: &str, ip: &str) -> bool {
        let node = match self.resolve_node(name, ip) {
            Some(node) => node,
            None => return false,
        };

        node.free();
        self.push_node_state(&node);

        info!(self.log, "node released"; "node" => node.key(), "state" => node.state().as_str());

        true
    }

    /// Takes a worker out of rotation after it reported itself broken and
    /// requeues every frame it was rendering. Returns false for an unknown
    /// node.
    pub fn fail_node(&self, name: &str, ip: &str) -> bool {
        let node = match self.resolve_node(name, ip) {
            Some(node) => node,
            None => return false,
        };

        node.set_state(NodeState::Error);
        self.push_node_state(&node);

        let requeued = self.registry.drain_node_renders(&node.key());

        for (id, frame) in &requeued {
            if let Some(task) = self.registry.task(id, *frame) {
                task.set_state(TaskState::Waiting);
                self.sink.push(Effect::TaskState {
                    id: id.clone(),
                    frame: *frame,
                    state: TaskState::Waiting,
                });
            }
        }

        warn!(self.log, "node failed, frames requeued";
              "node" => node.key(),
              "requeued" => requeued.len());

        true
    }

    fn push_node_state(&self, node: &Node) {
        self.sink.push(Effect::NodeState {
            name: node.name.clone(),
            ip: node.ip.clone(),
            state: node.state(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::Rig;
    use super::*;
    use crate::task::JobSpec;

    fn spec() -> JobSpec {
        JobSpec {
            project: "cube".to_string(),
            input: "cube.blend".to_string(),
            output: "cube_out".to_string(),
            frame_start: 1,
            frame_stop: 2,
            renderer_name: "blender".to_string(),
            renderer_version: "2.91.0".to_string(),
            start_time: "t0".to_string(),
        }
    }

    #[test]
    fn test_register_new_node() {
        let rig = Rig::new();

        let outcome = rig.scheduler.register_node("w1", "10.0.0.5", "test_api");

        assert_eq!(outcome, Registration::Added);

        let node = rig.registry.node("w1//10.0.0.5").unwrap();
        assert_eq!(node.state(), NodeState::Available);
        assert_eq!(node.api_key, "test_api");

        let store = rig.settle();
        assert_eq!(store.node_rows().len(), 1);
        assert_eq!(store.node_state("w1", "10.0.0.5").unwrap(), "available");
    }

    #[test]
    fn test_reannounce_resets_to_available() {
        let rig = Rig::new();

        rig.scheduler.register_node("w1", "10.0.0.5", "test_api");
        rig.registry
            .node("w1//10.0.0.5")
            .unwrap()
            .set_state(NodeState::Down);

        let outcome = rig.scheduler.register_node("w1", "10.0.0.5", "test_api");

        assert_eq!(outcome, Registration::Exists);
        assert_eq!(
            rig.registry.node("w1//10.0.0.5").unwrap().state(),
            NodeState::Available
        );
    }

    #[test]
    fn test_same_name_different_ip_is_distinct() {
        let rig = Rig::new();

        assert_eq!(
            rig.scheduler.register_node("w1", "10.0.0.5", "test_api"),
            Registration::Added
        );
        assert_eq!(
            rig.scheduler.register_node("w1", "10.0.0.6", "test_api"),
            Registration::Added
        );

        assert_eq!(rig.registry.nodes().len(), 2);
    }

    #[test]
    fn test_release_node() {
        let rig = Rig::new();

        rig.scheduler.register_node("w1", "10.0.0.5", "test_api");
        let node = rig.registry.node("w1//10.0.0.5").unwrap();
        node.set_state(NodeState::Rendering);

        assert!(rig.scheduler.release_node("w1", "10.0.0.5"));
        assert_eq!(node.state(), NodeState::Available);

        assert!(!rig.scheduler.release_node("w9", "10.0.0.5"));
    }

    #[test]
    fn test_fail_node_requeues_frames() {
        let rig = Rig::new();

        let ticket = rig.scheduler.submit_job(spec());
        let id = ticket.token.clone();

        for task in rig.registry.job_tasks(&id).unwrap() {
            task.set_state(TaskState::Waiting);
        }

        rig.scheduler.register_node("w1", "10.0.0.5", "test_api");
        let node = rig.registry.node("w1//10.0.0.5").unwrap();

        let row = rig.scheduler.next_task(&node).unwrap();
        assert_eq!(row.frame, 1);

        assert!(rig.scheduler.fail_node("w1", "10.0.0.5"));

        assert_eq!(node.state(), NodeState::Error);
        assert!(rig.registry.render(&id, 1).is_none());
        assert_eq!(
            rig.registry.task(&id, 1).unwrap().state(),
            TaskState::Waiting
        );

        // The requeued frame is dispatchable again.
        rig.scheduler.register_node("w2", "10.0.0.6", "test_api");
        let fresh = rig.registry.node("w2//10.0.0.6").unwrap();
        let row = rig.scheduler.next_task(&fresh).unwrap();
        assert_eq!(row.frame, 1);

        let store = rig.settle();
        assert_eq!(store.node_state("w1", "10.0.0.5").unwrap(), "error");
    }

    #[test]
    fn test_fail_unknown_node() {
        let rig = Rig::new();

        assert!(!rig.scheduler.fail_node("ghost", "10.0.0.9"));
    }
}
