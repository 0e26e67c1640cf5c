//! Producer links and the set directory consulted when forwarding.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::locking::lock;
use crate::transport::Transport;

/// Connections to producers, keyed by producer name.
///
/// Iteration follows name order, so "the first producer" is stable.
#[derive(Default)]
pub struct Topology {
    links: Mutex<BTreeMap<String, Arc<dyn Transport>>>,
}

impl Topology {
    /// Empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the connection used to reach `producer`, replacing any
    /// previous one.
    pub fn attach(&self, producer: impl Into<String>, link: Arc<dyn Transport>) {
        lock(&self.links).insert(producer.into(), link);
    }

    /// Connection to `producer`, if attached.
    #[must_use]
    pub fn link(&self, producer: &str) -> Option<Arc<dyn Transport>> {
        lock(&self.links).get(producer).cloned()
    }

    /// First producer in name order together with its connection.
    #[must_use]
    pub fn first_link(&self) -> Option<(String, Arc<dyn Transport>)> {
        lock(&self.links)
            .iter()
            .next()
            .map(|(name, link)| (name.clone(), Arc::clone(link)))
    }

    /// Forgets the link of `producer`.
    pub fn detach(&self, producer: &str) -> Option<Arc<dyn Transport>> {
        lock(&self.links).remove(producer)
    }

    /// Forgets every link running over `connection`.
    pub fn detach_connection(&self, connection: u64) -> usize {
        let mut links = lock(&self.links);
        let before = links.len();
        links.retain(|_, link| link.connection_id() != connection);
        before - links.len()
    }

    /// Attached producer names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        lock(&self.links).keys().cloned().collect()
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Topology")
            .field("producers", &self.names())
            .finish()
    }
}

/// Where a metric set held by this daemon came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOrigin {
    /// Pulled from the named producer.
    Producer(String),
    /// Sampled locally by the named plugin.
    Sampler(String),
}

/// Directory entry for one set instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetEntry {
    /// Schema name of the set.
    pub schema: String,
    /// Origin of the set.
    pub origin: SetOrigin,
}

/// Set instances known to this daemon.
#[derive(Debug, Default)]
pub struct SetDirectory {
    sets: DashMap<String, SetEntry>,
}

impl SetDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `instance`, replacing any previous entry.
    pub fn insert(&self, instance: impl Into<String>, entry: SetEntry) {
        self.sets.insert(instance.into(), entry);
    }

    /// Entry of `instance`, copied out of the map.
    #[must_use]
    pub fn get(&self, instance: &str) -> Option<SetEntry> {
        self.sets.get(instance).map(|entry| entry.value().clone())
    }

    /// Forgets `instance`.
    pub fn remove(&self, instance: &str) -> Option<SetEntry> {
        self.sets.remove(instance).map(|(_, entry)| entry)
    }

    /// Number of known sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no set is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
