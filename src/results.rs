//! The result types returned by the write operations and the cursor materializer (C7).

use std::collections::{HashMap, VecDeque};

use bson::{Bson, RawDocumentBuf};
use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::{coll::Namespace, error::BulkWriteError, error::WriteConcernError};

/// The result of an `insertOne` operation.
#[derive(Clone, Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` field of the document inserted.
    pub inserted_id: Bson,
}

impl InsertOneResult {
    pub(crate) fn from_insert_many_result(result: InsertManyResult) -> Self {
        Self {
            inserted_id: result.inserted_ids.get(&0).cloned().unwrap_or(Bson::Null),
        }
    }
}

/// The result of an `insertMany`/bulk-insert operation.
#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` field of each document inserted, keyed by its index in the request sequence.
    pub inserted_ids: HashMap<usize, Bson>,
}

/// The result of an `updateOne`/`updateMany`/`replaceOne` operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateResult {
    /// The number of documents that matched the filter.
    pub matched_count: u64,

    /// The number of documents that were modified by the operation.
    pub modified_count: u64,

    /// The `_id` field of the upserted document, if any.
    pub upserted_id: Option<Bson>,
}

/// The result of a `deleteOne`/`deleteMany` operation.
#[derive(Clone, Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeleteResult {
    /// The number of documents deleted by the operation.
    pub deleted_count: u64,
}

/// The partial-success result of a bulk-write operation (SPEC §4.7): the write models that
/// succeeded before an ordered batch stopped, or the full aggregate for an unordered one.
#[derive(Clone, Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// Whether the server acknowledged the writes that were attempted.
    pub acknowledged: bool,

    /// The number of documents inserted.
    pub inserted_count: i64,

    /// The `_id` field of each inserted document, keyed by its index in the request sequence.
    pub inserted_ids: HashMap<usize, Bson>,

    /// The number of documents matched by update/replace operations.
    pub matched_count: i64,

    /// The number of documents modified by update/replace operations.
    pub modified_count: i64,

    /// The number of documents upserted.
    pub upserted_count: i64,

    /// The `_id` field of each upserted document, keyed by its index in the request sequence.
    pub upserted_ids: HashMap<usize, Bson>,

    /// The number of documents deleted.
    pub deleted_count: i64,

    /// Per-item server errors encountered while executing the operation, empty on full success.
    pub write_errors: Vec<BulkWriteError>,

    /// The write concern error, if the operation's last acknowledged batch failed to satisfy it.
    pub write_concern_error: Option<WriteConcernError>,
}

impl BulkWriteResult {
    pub(crate) fn merge(&mut self, other: BulkWriteResult) {
        self.acknowledged = self.acknowledged && other.acknowledged;
        self.inserted_count += other.inserted_count;
        self.matched_count += other.matched_count;
        self.modified_count += other.modified_count;
        self.upserted_count += other.upserted_count;
        self.deleted_count += other.deleted_count;
        self.inserted_ids.extend(other.inserted_ids);
        self.upserted_ids.extend(other.upserted_ids);
        self.write_errors.extend(other.write_errors);
        if self.write_concern_error.is_none() {
            self.write_concern_error = other.write_concern_error;
        }
    }
}

/// The result of a single `getMore` (or the initial command's embedded `cursor` body), as
/// consumed by the cursor materializer (C7).
#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<RawDocumentBuf>,
    pub(crate) exhausted: bool,
    pub(crate) ns: Namespace,
    pub(crate) id: i64,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::BulkWriteError;

    #[test]
    fn insert_one_result_from_insert_many_takes_index_zero() {
        let mut inserted_ids = HashMap::new();
        inserted_ids.insert(0usize, Bson::Int32(7));
        let many = InsertManyResult { inserted_ids };
        let one = InsertOneResult::from_insert_many_result(many);
        assert_eq!(one.inserted_id, Bson::Int32(7));
    }

    #[test]
    fn bulk_write_result_merge_accumulates_counts_and_errors() {
        let mut first = BulkWriteResult {
            acknowledged: true,
            inserted_count: 2,
            ..Default::default()
        };
        let second = BulkWriteResult {
            acknowledged: true,
            inserted_count: 1,
            write_errors: vec![BulkWriteError {
                index: 3,
                code: 11000,
                code_name: Some("DuplicateKey".to_string()),
                message: "E11000".to_string(),
                details: None,
            }],
            ..Default::default()
        };
        first.merge(second);
        assert_eq!(first.inserted_count, 3);
        assert_eq!(first.write_errors.len(), 1);
    }

    #[test]
    fn bulk_write_result_merge_unordered_failure_clears_acknowledged() {
        let mut first = BulkWriteResult {
            acknowledged: true,
            ..Default::default()
        };
        let second = BulkWriteResult {
            acknowledged: false,
            ..Default::default()
        };
        first.merge(second);
        assert!(!first.acknowledged);
    }
}
