//! Dispatch and lifecycle policies of the coordinator. Every public method
//! backs exactly one external request; all of them mutate the registry
//! in-memory first and queue durable effects second, so a request never
//! waits on storage.

mod dispatch;
mod jobs;
mod nodes;

pub use dispatch::HeartbeatReply;
pub use jobs::{JobProgress, Ticket, UploadOutcome};
pub use nodes::Registration;

use crate::node::{node_key, Node};
use crate::registry::Registry;
use crate::store::EffectSink;
use hearth::config::Configuration;
use hearth::logging::{self, o};
use std::sync::Arc;

pub struct Scheduler {
    registry: Arc<Registry>,
    config: Configuration,
    sink: EffectSink,
    log: logging::Logger,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        config: Configuration,
        sink: EffectSink,
        log: &logging::Logger,
    ) -> Scheduler {
        Scheduler {
            registry,
            config,
            sink,
            log: log.new(o!("component" => "scheduler")),
        }
    }

    /// Preamble shared by every operation: only known client keys get in.
    #[inline]
    pub fn key_known(&self, api_key: &str) -> bool {
        self.config.key_known(api_key)
    }

    /// Resolves the calling worker by `(name, ip)`.
    #[inline]
    pub fn resolve_node(&self, name: &str, ip: &str) -> Option<Arc<Node>> {
        self.registry.node(&node_key(name, ip))
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub(crate) fn config(&self) -> &Configuration {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod harness {
    use super::*;
    use crate::store::mem::MemStore;
    use crate::store::EffectWriter;
    use hearth::logging;
    use std::path::Path;

    /// Fully wired scheduler over a `MemStore`, shared by the operation
    /// tests.
    pub struct Rig {
        pub scheduler: Scheduler,
        pub registry: Arc<Registry>,
        pub store: MemStore,
        writer: EffectWriter,
    }

    impl Rig {
        pub fn new() -> Rig {
            Rig::with_folder(Path::new("/nonexistent"))
        }

        pub fn with_folder(folder: &Path) -> Rig {
            let registry = Arc::new(Registry::new());
            let store = MemStore::new();
            let writer = EffectWriter::spawn(Box::new(store.clone()), &logging::discard());

            let config = Configuration {
                folder: folder.to_path_buf(),
                db_name: "farm.db".into(),
                certname: "farm".to_string(),
                user_api_keys: vec!["test_api".to_string()],
            };

            let scheduler = Scheduler::new(
                registry.clone(),
                config,
                writer.sink(),
                &logging::discard(),
            );

            Rig {
                scheduler,
                registry,
                store,
                writer,
            }
        }

        /// Flushes the queue and hands back the store for assertions on
        /// persisted rows. The scheduler (and its sink) is consumed so the
        /// writer can drain and exit.
        pub fn settle(self) -> MemStore {
            let Rig {
                scheduler,
                registry,
                store,
                writer,
            } = self;

            drop(scheduler);
            drop(registry);
            writer.shutdown();

            store
        }
    }
}
