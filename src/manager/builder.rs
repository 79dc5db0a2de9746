use std::sync::Arc;

use crate::config::Config;
use crate::executor::Executor;
use crate::log::Log;
use crate::putter::Putter;
use crate::SlotNum;

use super::Manager;

/// Builder to spawn a [`Manager`].
///
/// Start with [`builder()`][crate::builder()], then name the local node, the
/// log and the putter in that order. Everything else is optional.
pub struct ManagerBuilderBlank;

impl ManagerBuilderBlank {
    pub fn new() -> Self {
        Self
    }

    /// Names the local node. The id is what the node's membership entry is
    /// keyed by.
    pub fn for_node(self, self_id: impl Into<String>) -> ManagerBuilderWithId {
        ManagerBuilderWithId {
            self_id: self_id.into(),
        }
    }
}

impl Default for ManagerBuilderBlank {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ManagerBuilderBlank`] after the node was named.
pub struct ManagerBuilderWithId {
    self_id: String,
}

impl ManagerBuilderWithId {
    /// Sets the log membership is read from.
    pub fn reading_from(self, log: Arc<dyn Log>) -> ManagerBuilderWithIdAndLog {
        ManagerBuilderWithIdAndLog {
            self_id: self.self_id,
            log,
        }
    }
}

/// [`ManagerBuilderWithId`] after the log was set.
pub struct ManagerBuilderWithIdAndLog {
    self_id: String,
    log: Arc<dyn Log>,
}

impl ManagerBuilderWithIdAndLog {
    /// Sets the putter all outbound messages go to.
    pub fn sending_via<P: Putter>(self, putter: P) -> ManagerBuilderWithAll {
        let config = Config {
            self_id: self.self_id,
            ..Config::default()
        };

        ManagerBuilderWithAll {
            config,
            log: self.log,
            putter: Arc::new(putter),
        }
    }
}

/// A builder with everything required to spawn a [`Manager`].
pub struct ManagerBuilderWithAll {
    config: Config,
    log: Arc<dyn Log>,
    putter: Arc<dyn Putter>,
}

impl ManagerBuilderWithAll {
    /// Sets the number of voters assumed until the log names any members.
    pub fn expecting_cluster_size(mut self, size: usize) -> Self {
        self.config.cluster_size_hint = size;
        self
    }

    /// Sets the slot of the first local proposal on an empty log.
    pub fn starting_at(mut self, slot: SlotNum) -> Self {
        self.config.start_slot = slot;
        self
    }

    /// See [`Config::window`].
    pub fn with_window(mut self, window: u64) -> Self {
        self.config.window = window;
        self
    }

    /// Replaces all tunables. The node id given to
    /// [`for_node`][ManagerBuilderBlank::for_node] is kept.
    pub fn with_config(mut self, config: Config) -> Self {
        let self_id = std::mem::take(&mut self.config.self_id);

        self.config = Config { self_id, ..config };
        self
    }

    /// Spawns the manager's instances in `executor`.
    pub fn spawn_in<E: Executor>(self, executor: E) -> Manager {
        Manager::from_parts(self.config, self.log, self.putter, Arc::new(executor))
    }
}
