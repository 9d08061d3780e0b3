//! The server-type classification used to decide command shape (e.g. whether a server accepts
//! `writeConcern`) and retryability (e.g. whether a server is part of a replica set).

use serde::{Deserialize, Serialize};

/// The possible types of server a connection can be established with.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Serialize, Default)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica-set server.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data-bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// A hidden, starting up, or recovering node in a replica set.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set, or one removed from its config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A load-balancing proxy between the driver and the deployment.
    LoadBalancer,

    /// A server the driver hasn't yet communicated with or can't connect to.
    #[serde(alias = "PossiblePrimary")]
    #[default]
    Unknown,
}

impl ServerType {
    /// Whether this server type is a data-bearing member of a replica set (used to decide
    /// whether retryable-write/session support is even possible).
    pub(crate) fn is_replica_set_member(self) -> bool {
        matches!(
            self,
            ServerType::RsPrimary | ServerType::RsSecondary | ServerType::RsArbiter
        )
    }

    /// Whether sessions and transaction numbers are meaningful against this server type. Standalone
    /// servers accept `lsid` but never advance transaction numbers meaningfully across a
    /// retryable-write attempt.
    pub(crate) fn supports_retryable_writes(self) -> bool {
        !matches!(self, ServerType::Standalone | ServerType::Unknown)
    }
}
