//! Command translation (C5): one module per server-side command, each responsible for turning a
//! strongly-typed option set into the wire-format `Document` and for interpreting the raw reply
//! back into a typed result.

mod aggregate;
mod bulk_write;
mod delete;
mod find;
mod get_more;
mod insert;
mod update;

use std::collections::VecDeque;

use bson::{Bson, Document, Timestamp};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    concern::WriteConcern,
    coll::Namespace,
    error::{BulkWriteError, BulkWriteFailure, CommandError, Error, ErrorKind, Result, WriteConcernError},
    handshake::ConnectionDescription,
    selection_criteria::SelectionCriteria,
};

pub(crate) use aggregate::{Aggregate, AggregateTarget};
pub(crate) use bulk_write::execute_batches;
pub(crate) use delete::Delete;
pub(crate) use find::Find;
pub(crate) use get_more::GetMore;
pub(crate) use insert::Insert;
pub(crate) use update::Update;

/// The level of retryability a write or read operation supports, per SPEC §4.5's preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retryability {
    Write,
    Read,
    None,
}

/// A server-side operation: builds a command document against a negotiated connection, and
/// interprets that connection's reply.
pub(crate) trait Operation {
    /// The output type this operation produces once a reply has been interpreted.
    type O;

    /// The name of the server-side command this operation issues.
    const NAME: &'static str;

    /// Builds the command document to send, given the connection it will be sent over.
    fn build(&self, description: &ConnectionDescription) -> Result<Document>;

    /// Interprets a raw command reply into this operation's output.
    fn handle_response(&self, response: Document, description: &ConnectionDescription) -> Result<Self::O>;

    /// Criteria for selecting the server this operation should run against.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// The write concern this operation should request, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// The level of retryability this operation supports.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    /// The `limit` a cursor-bearing operation's result should be capped at, if any. Only
    /// meaningful for operations whose `Self::O` is [`CursorBody`].
    fn cursor_limit(&self) -> Option<i64> {
        None
    }

    /// The per-batch size a cursor-bearing operation's result should request, if any.
    fn cursor_batch_size(&self) -> Option<u32> {
        None
    }

    /// The `maxAwaitTimeMS` a cursor-bearing operation's subsequent `getMore`s should use, if any.
    fn cursor_max_await_time(&self) -> Option<std::time::Duration> {
        None
    }
}

/// Merges a serializable option set into a command document. The options type must serialize to a
/// BSON document; any other shape is an internal error.
pub(crate) fn append_options<T: serde::Serialize>(doc: &mut Document, options: Option<&T>) -> Result<()> {
    let Some(options) = options else {
        return Ok(());
    };
    match bson::to_bson(options).map_err(Error::from)? {
        Bson::Document(d) => {
            doc.extend(d);
            Ok(())
        }
        other => Err(ErrorKind::Internal {
            message: format!("options did not serialize to a document: {other:?}"),
        }
        .into()),
    }
}

/// A command reply body carrying only an `ok` and the fields a write command always returns:
/// per-item errors and a write concern error, neither fatal to parsing the reply itself (SPEC
/// §4.7 builds the user-facing [`crate::results::BulkWriteResult`] from these).
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WriteResponseBody {
    #[serde(default)]
    pub(crate) n: u64,
    pub(crate) n_modified: Option<u64>,
    pub(crate) upserted: Option<Vec<UpsertedId>>,
    pub(crate) write_errors: Option<Vec<BulkWriteError>>,
    pub(crate) write_concern_error: Option<WriteConcernError>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct UpsertedId {
    pub(crate) index: usize,
    #[serde(rename = "_id")]
    pub(crate) id: Bson,
}

impl WriteResponseBody {
    /// Raises a [`BulkWriteFailure`] if the reply carried any write errors or a write concern
    /// error; otherwise a no-op.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.write_errors.is_none() && self.write_concern_error.is_none() {
            return Ok(());
        }
        Err(ErrorKind::BulkWrite(BulkWriteFailure {
            write_errors: self.write_errors.clone(),
            write_concern_error: self.write_concern_error.clone(),
            inserted_ids: Default::default(),
        })
        .into())
    }
}

/// A command reply carrying an embedded `cursor` sub-document (`find`/`aggregate`/`getMore`).
#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,
    pub(crate) ns: Namespace,
    #[serde(rename = "firstBatch", alias = "nextBatch", default)]
    pub(crate) batch: VecDeque<Document>,
    #[serde(rename = "atClusterTime")]
    pub(crate) at_cluster_time: Option<Timestamp>,
}

/// Extracts the server-reported failure from a reply whose `ok` field is falsy.
pub(crate) fn command_error_from_reply(reply: &Document) -> Option<Error> {
    if matches!(reply.get("ok").and_then(Bson::as_f64), Some(ok) if ok == 1.0) {
        return None;
    }
    let code = reply.get_i32("code").unwrap_or(0);
    let code_name = reply.get_str("codeName").unwrap_or_default().to_string();
    let message = reply.get_str("errmsg").unwrap_or_default().to_string();
    let labels = reply
        .get_array("errorLabels")
        .ok()
        .map(|arr| arr.iter().filter_map(|b| b.as_str().map(str::to_string)).collect());
    Some(Error::new(
        ErrorKind::Command(CommandError { code, code_name, message }),
        labels,
    ))
}

/// Splits `items` into batches of at most `max_count` items each, without letting the running
/// total reported by `estimate_size` exceed `max_bytes` (SPEC §4.7). A single oversized item still
/// gets its own batch rather than being dropped.
pub(crate) fn batch_by_limits<T>(
    items: Vec<T>,
    estimate_size: impl Fn(&T) -> usize,
    max_count: i64,
    max_bytes: i64,
) -> Vec<Vec<T>> {
    let max_count = max_count.max(1) as usize;
    let max_bytes = max_bytes.max(1) as usize;
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;

    for item in items {
        let size = estimate_size(&item);
        if !current.is_empty() && (current.len() >= max_count || current_bytes + size > max_bytes) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(item);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// A primary-server connection description for operation-level unit tests across this module.
#[cfg(test)]
pub(crate) fn test_description() -> ConnectionDescription {
    use crate::{
        handshake::{ConnectionId, HelloResult},
        server_type::ServerType,
    };
    use std::time::Duration;

    ConnectionDescription {
        connection_id: ConnectionId {
            local: 1,
            server_value: Some(1),
        },
        hello_result: HelloResult {
            server_type: ServerType::RsPrimary,
            max_wire_version: Some(17),
            min_wire_version: Some(0),
            logical_session_timeout: Some(Duration::from_secs(1800)),
            service_id: None,
            connection_id: Some(1),
            sasl_supported_mechs: None,
            max_write_batch_size: None,
            max_bson_object_size: None,
        },
    }
}
