//! `ClusterRegistry`: a mapping from connection parameters to a live, shared [`Cluster`].
//!
//! Reimplements the reference driver's implicit per-process topology management as an explicit
//! value: an application constructs one `ClusterRegistry` (or uses [`ClusterRegistry::global`] for
//! the common single-process case) rather than relying on a hidden static. Registration, lookup,
//! and disposal are serialized by a single `std::sync::Mutex`, matching the single-lock design
//! called out for this component.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use once_cell::sync::OnceCell;

/// Value-equality key over the connection parameters that determine whether two `Client`s should
/// share the same underlying cluster: the seed host list (order-independent) and whether the
/// deployment is addressed through a load balancer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    hosts: Vec<String>,
    load_balanced: bool,
}

impl ClusterKey {
    /// Builds a key from a seed list and the load-balanced flag. The host list is sorted so that
    /// two seed lists differing only in order hash and compare equal.
    pub fn new(hosts: impl IntoIterator<Item = impl Into<String>>, load_balanced: bool) -> Self {
        let mut hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        hosts.sort();
        Self {
            hosts,
            load_balanced,
        }
    }
}

/// The registry's unit of sharing. Topology monitoring and the connection pool behind it are
/// external collaborators; this crate only needs a handle stable enough to hash-map on and share
/// via `Arc`.
#[derive(Debug)]
pub struct Cluster {
    key: ClusterKey,
}

impl Cluster {
    fn new(key: ClusterKey) -> Self {
        Self { key }
    }

    /// The connection parameters this cluster was created for.
    pub fn key(&self) -> &ClusterKey {
        &self.key
    }
}

/// Process-wide table of live clusters, keyed by [`ClusterKey`]. Created as an explicit value at
/// process start; lives until the value (or the process) is dropped.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: Mutex<HashMap<ClusterKey, Arc<Cluster>>>,
}

static GLOBAL: OnceCell<ClusterRegistry> = OnceCell::new();

impl ClusterRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            clusters: Mutex::new(HashMap::new()),
        }
    }

    /// A process-wide registry, lazily created on first use. Convenience for the common case of a
    /// single registry per process; callers that need isolated registries (e.g. tests running
    /// concurrently against distinct keys) should construct their own via [`ClusterRegistry::new`].
    pub fn global() -> &'static ClusterRegistry {
        GLOBAL.get_or_init(ClusterRegistry::new)
    }

    /// Returns the existing cluster for `key`, or atomically creates and registers one.
    pub fn get_or_create(&self, key: ClusterKey) -> Arc<Cluster> {
        let mut clusters = self.clusters.lock().unwrap();
        clusters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Cluster::new(key)))
            .clone()
    }

    /// Looks up a cluster without creating one.
    pub fn get(&self, key: &ClusterKey) -> Option<Arc<Cluster>> {
        self.clusters.lock().unwrap().get(key).cloned()
    }

    /// Removes `key`'s entry from the registry, tearing down the cluster if this was the last
    /// reference. Idempotent: disposing an absent key is a no-op.
    pub fn dispose(&self, key: &ClusterKey) {
        self.clusters.lock().unwrap().remove(key);
    }

    /// The number of distinct clusters currently registered.
    pub fn len(&self) -> usize {
        self.clusters.lock().unwrap().len()
    }

    /// Whether the registry currently holds no clusters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
