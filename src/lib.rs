#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]

//! Core operation-execution subsystem for a document-oriented clustered database driver:
//! retryable-write execution, command translation for find/aggregate/bulk write operations,
//! connection handshaking, and cursor materialization.

pub use ::bson;

pub mod client;
pub mod cluster;
mod coll;
pub mod collation;
pub mod concern;
pub mod cursor;
pub mod error;
mod handshake;
pub mod operation;
pub mod options;
pub mod results;
mod selection_criteria;
mod server_type;
mod session;
#[cfg(feature = "sync")]
pub mod sync;

pub(crate) mod bson_util;

pub use crate::{
    client::{
        binding::{Binding, Channel, ChannelSource, ReadWriteBinding, RetryableReadContext,
                  RetryableWriteContext},
        executor::Executor,
    },
    cluster::registry::ClusterRegistry,
    coll::Namespace,
    error::{Error, Result},
    selection_criteria::{ReadPreference, SelectionCriteria},
    server_type::ServerType,
    session::ClientSession,
};
