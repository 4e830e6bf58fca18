use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

/// Lifecycle of a registered worker.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeState {
    Available,
    Rendering,
    Down,
    Error,
}

impl NodeState {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Available => "available",
            NodeState::Rendering => "rendering",
            NodeState::Down => "down",
            NodeState::Error => "error",
        }
    }

    pub fn parse(token: &str) -> Option<NodeState> {
        match token {
            "available" => Some(NodeState::Available),
            "rendering" => Some(NodeState::Rendering),
            "down" => Some(NodeState::Down),
            "error" => Some(NodeState::Error),
            _ => None,
        }
    }
}

/// A registered worker. Identity is `(name, ip)`; only `state` mutates.
pub struct Node {
    pub name: String,
    pub ip: String,
    pub api_key: String,
    state: Mutex<NodeState>,
}

/// Registry key of a node. Two nodes with the same name on different hosts
/// are distinct; deployments must keep `(name, ip)` unique.
#[inline]
pub fn node_key(name: &str, ip: &str) -> String {
    format!("{}//{}", name, ip)
}

impl Node {
    pub fn new(name: &str, ip: &str, api_key: &str, state: NodeState) -> Node {
        Node {
            name: name.to_string(),
            ip: ip.to_string(),
            api_key: api_key.to_string(),
            state: Mutex::new(state),
        }
    }

    pub fn from_row(row: NodeRow, state: NodeState) -> Node {
        Node {
            name: row.name,
            ip: row.ip,
            api_key: row.api_key,
            state: Mutex::new(state),
        }
    }

    #[inline]
    pub fn key(&self) -> String {
        node_key(&self.name, &self.ip)
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Claims the node for a render. Of any set of concurrent calls on an
    /// available node, exactly one returns true.
    #[inline]
    pub fn commission(&self) -> bool {
        let mut state = self.state.lock();

        if *state == NodeState::Available {
            *state = NodeState::Rendering;
            true
        } else {
            false
        }
    }

    /// Returns a rendering node to the pool. No-op in any other state.
    #[inline]
    pub fn free(&self) {
        let mut state = self.state.lock();

        if *state == NodeState::Rendering {
            *state = NodeState::Available;
        }
    }

    /// Reactivates a node marked down. No-op in any other state.
    #[inline]
    pub fn up(&self) {
        let mut state = self.state.lock();

        if *state == NodeState::Down {
            *state = NodeState::Available;
        }
    }

    /// Unconditional state set within the closed state set.
    #[inline]
    pub fn set_state(&self, next: NodeState) {
        *self.state.lock() = next;
    }

    /// Plain row image of the node at this instant.
    pub fn row(&self) -> NodeRow {
        NodeRow {
            name: self.name.clone(),
            ip: self.ip.clone(),
            api_key: self.api_key.clone(),
            state: self.state().as_str().to_string(),
        }
    }
}

/// Serializable image of a node, matching the legacy storage row.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NodeRow {
    pub name: String,
    pub ip: String,
    pub api_key: String,
    pub state: String,
}
