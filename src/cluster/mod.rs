//! Process-wide shared-resource policy: a registry of live clusters keyed by connection
//! parameters, so that two `Client`s constructed with the same parameters share one underlying
//! cluster rather than each opening their own monitoring/connection machinery.
//!
//! Topology monitoring, server discovery, and the transport layer are external collaborators
//! (SPEC §1); a [`Cluster`] here is just the registry's unit of sharing, named by its connection
//! parameters.

pub mod registry;

pub use registry::{Cluster, ClusterKey, ClusterRegistry};
