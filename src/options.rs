//! Option structs accepted by the find/aggregate/insert/update/delete command builders (C5,
//! A3 ambient typed configuration). Every optional field is `#[builder(default)]` and
//! `#[skip_serializing_none]`, matching [`crate::concern::WriteConcern`].

use std::time::Duration;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson_util,
    collation::Collation,
    concern::{ReadConcern, WriteConcern},
};

/// Describes the type of cursor to return from a `find`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorType {
    /// Close the cursor once the last data is retrieved.
    NonTailable,
    /// Do not close the cursor when no more data is available; block for awhile instead.
    Tailable,
    /// Like `Tailable`, but block for a longer amount of time before timing out.
    TailableAwait,
}

/// The options that can be used with `find`. See
/// <https://docs.mongodb.com/manual/reference/command/find/> for more information.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
    /// Whether the server can return partial results when a shard is down.
    #[builder(default)]
    pub allow_partial_results: Option<bool>,

    /// The collation to use for this operation.
    #[builder(default)]
    pub collation: Option<Collation>,

    /// Tags the operation with a custom string for logging/profiling.
    #[builder(default)]
    pub comment: Option<String>,

    /// The type of cursor to return. Translated into the `tailable`/`awaitData` wire fields by
    /// the command builder (C5) rather than through serde, since neither has a 1:1 field name.
    #[builder(default)]
    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    /// The index to use, given either by name or by the index spec document itself.
    #[builder(default)]
    pub hint: Option<Document>,

    /// The maximum number of documents to return, either as a cap (positive) or, when negative,
    /// a single-batch cap whose magnitude is the limit.
    #[builder(default)]
    #[serde(skip)]
    pub limit: Option<i64>,

    /// The exclusive upper index bound for a specific index.
    #[builder(default)]
    pub max: Option<Document>,

    /// The maximum amount of time to allow a tailable-await cursor's `getMore` to block. Only
    /// meaningful (and only sent) when `cursor_type` is [`CursorType::TailableAwait`]; the
    /// command builder (C5) gates its emission on that, so it is excluded from the normal
    /// `maxTimeMS` serialization path.
    #[builder(default)]
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// Maximum number of documents or index keys to scan before returning results.
    #[builder(default)]
    pub max_scan: Option<u64>,

    /// The server-side time limit for this operation.
    #[builder(default)]
    #[serde(rename = "maxTimeMS")]
    #[serde(serialize_with = "bson_util::serialize_duration_as_i64_millis")]
    #[serde(deserialize_with = "bson_util::deserialize_duration_from_u64_millis")]
    #[serde(default)]
    pub max_time: Option<Duration>,

    /// The inclusive lower index bound for a specific index.
    #[builder(default)]
    pub min: Option<Document>,

    /// Whether the server should close the cursor after the first batch if the entire result
    /// fits in it.
    #[builder(default)]
    pub no_cursor_timeout: Option<bool>,

    /// The number of documents the server should skip before returning results.
    #[builder(default)]
    pub skip: Option<u64>,

    /// Limits the fields returned for each document.
    #[builder(default)]
    pub projection: Option<Document>,

    /// The default read concern for this operation. Inserted as `readConcern` by the command
    /// builder (C5) rather than through serde, matching [`WriteConcern`]'s manual-insertion
    /// pattern below.
    #[builder(default)]
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// Whether to return only the index keys in the documents returned.
    #[builder(default)]
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    #[builder(default)]
    pub show_record_id: Option<bool>,

    /// The order in which to return matching documents.
    #[builder(default)]
    pub sort: Option<Document>,

    /// Whether the server should use this operation's batch/max-time values as a snapshot read.
    #[builder(default)]
    pub snapshot: Option<bool>,

    /// The number of documents to return per batch.
    #[builder(default)]
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// A map of parameter names and values, referenceable from `$$<name>` in a find filter.
    #[builder(default)]
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,

    /// Legacy OP_QUERY-style modifiers document (`$comment`, `$hint`, `$max`, `$maxScan`,
    /// `$maxTimeMS`, `$min`, `$orderby`, `$returnKey`, `$showDiskLoc`, `$snapshot`). A field set
    /// explicitly above shadows the same semantic here; the command builder (C5) is the only
    /// consumer of this field.
    #[builder(default)]
    #[serde(skip)]
    pub modifiers: Option<Document>,
}

/// The options that can be used with an `aggregate` operation. See
/// <https://docs.mongodb.com/manual/reference/command/aggregate/> for more information.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOptions {
    /// Whether writes to the temporary output collection of a pipeline's final `$out` stage are
    /// acknowledged. Inserted as `writeConcern` by the command builder (C5); see
    /// [`FindOptions::read_concern`] for why this bypasses the normal serde path.
    #[builder(default)]
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// The default read concern for this operation. Inserted as `readConcern` by the command
    /// builder (C5).
    #[builder(default)]
    #[serde(skip)]
    pub read_concern: Option<ReadConcern>,

    /// Enables writing to temporary files by the server.
    #[builder(default)]
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    #[builder(default)]
    #[serde(rename = "cursor")]
    #[serde(serialize_with = "bson_util::serialize_batch_size")]
    #[serde(skip_deserializing)]
    pub batch_size: Option<u32>,

    /// Tags the operation with a custom string for logging/profiling.
    #[builder(default)]
    pub comment: Option<String>,

    /// The collation to use for this operation.
    #[builder(default)]
    pub collation: Option<Collation>,

    /// The index to use for this operation.
    #[builder(default)]
    pub hint: Option<Document>,

    /// The server-side time limit for this operation.
    #[builder(default)]
    #[serde(rename = "maxTimeMS")]
    #[serde(serialize_with = "bson_util::serialize_duration_as_i64_millis")]
    #[serde(deserialize_with = "bson_util::deserialize_duration_from_u64_millis")]
    #[serde(default)]
    pub max_time: Option<Duration>,

    /// The maximum amount of time for the server to wait on new documents to satisfy a `$changeStream`
    /// tailable-await cursor query.
    #[builder(default)]
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// A map of parameter names and values, referenceable from `$$<name>` anywhere in the pipeline.
    #[builder(default)]
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,
}

/// The options that can be used with an `insert` operation. See
/// <https://docs.mongodb.com/manual/reference/command/insert/> for more information.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOptions {
    /// Whether the server should insert all documents it can, continuing past an error, when
    /// `false`.
    #[builder(default)]
    #[serde(skip)]
    pub ordered: Option<bool>,

    /// Whether the documents being inserted should be validated against the collection's
    /// validation rules.
    #[builder(default)]
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this operation. Inserted as `writeConcern` by the command builder
    /// (C5).
    #[builder(default)]
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// Tags the operation with a custom string for logging/profiling.
    #[builder(default)]
    pub comment: Option<Bson>,
}

/// The options that can be used with an `update` operation. See
/// <https://docs.mongodb.com/manual/reference/command/update/> for more information.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    /// A set of filters specifying which array elements an update should apply to.
    #[builder(default)]
    pub array_filters: Option<Vec<Document>>,

    /// Whether the modified documents should be validated against the collection's validation
    /// rules.
    #[builder(default)]
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for this operation.
    #[builder(default)]
    pub collation: Option<Collation>,

    /// The index to use for this operation.
    #[builder(default)]
    pub hint: Option<Document>,

    /// Whether a new document should be created if no document matches the filter.
    #[builder(default)]
    pub upsert: Option<bool>,

    /// The write concern for this operation. Inserted as `writeConcern` by the command builder
    /// (C5).
    #[builder(default)]
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// Tags the operation with a custom string for logging/profiling.
    #[builder(default)]
    pub comment: Option<Bson>,

    /// A map of parameter names and values, referenceable from `$$<name>` in the update document
    /// or pipeline.
    #[builder(default)]
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,
}

/// The options that can be used with a `delete` operation. See
/// <https://docs.mongodb.com/manual/reference/command/delete/> for more information.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOptions {
    /// The collation to use for this operation.
    #[builder(default)]
    pub collation: Option<Collation>,

    /// The index to use for this operation.
    #[builder(default)]
    pub hint: Option<Document>,

    /// The write concern for this operation. Inserted as `writeConcern` by the command builder
    /// (C5).
    #[builder(default)]
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// Tags the operation with a custom string for logging/profiling.
    #[builder(default)]
    pub comment: Option<Bson>,

    /// A map of parameter names and values, referenceable from `$$<name>` in the delete query or
    /// pipeline.
    #[builder(default)]
    #[serde(rename = "let")]
    pub let_vars: Option<Document>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn find_options_default_has_no_modifiers() {
        let opts = FindOptions::builder().build();
        assert!(opts.modifiers.is_none());
    }

    #[test]
    fn update_options_builder_sets_upsert() {
        let opts = UpdateOptions::builder().upsert(true).build();
        assert_eq!(opts.upsert, Some(true));
    }

    #[test]
    fn aggregate_options_serializes_batch_size_as_cursor_doc() {
        let opts = AggregateOptions::builder().batch_size(25).build();
        let doc = bson::to_document(&opts).unwrap();
        assert_eq!(
            doc.get_document("cursor").unwrap().get_i32("batchSize").unwrap(),
            25
        );
    }
}
