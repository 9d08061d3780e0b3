//! The `insert` batch command builder (C5) and its retryable-write attempt (C6).

use std::collections::{HashMap, HashSet};

use bson::{doc, oid::ObjectId, Bson, Document};
use futures_core::future::BoxFuture;

use crate::{
    client::{binding::RetryableWriteContext, executor::RetryableWrite},
    coll::Namespace,
    concern::WriteConcern,
    error::Result,
    operation::{append_options, command_error_from_reply, WriteResponseBody},
    options::InsertOptions,
    results::BulkWriteResult,
};

/// One batch of an `insertMany`/bulk-insert request. `start_index` is this batch's offset into
/// the caller's full request sequence, so that `inserted_ids`/`write_errors` indices in the
/// aggregated [`BulkWriteResult`] are meaningful across batches.
#[derive(Debug)]
pub(crate) struct Insert {
    ns: Namespace,
    documents: Vec<Document>,
    ids: Vec<Bson>,
    start_index: usize,
    ordered: bool,
    options: Option<InsertOptions>,
}

impl Insert {
    /// Ensures every document carries an `_id` (generating one where absent) before building the
    /// command, so the caller can report inserted ids even for documents that didn't specify one.
    pub(crate) fn new(
        ns: Namespace,
        mut documents: Vec<Document>,
        start_index: usize,
        options: Option<InsertOptions>,
    ) -> Self {
        let ids = documents
            .iter_mut()
            .map(|document| {
                document
                    .entry("_id".to_string())
                    .or_insert_with(|| Bson::ObjectId(ObjectId::new()))
                    .clone()
            })
            .collect();
        let ordered = options.as_ref().and_then(|o| o.ordered).unwrap_or(true);
        Self {
            ns,
            documents,
            ids,
            start_index,
            ordered,
            options,
        }
    }

    fn build_command(&self, txn_number: Option<i64>) -> Result<Document> {
        let mut command = doc! {
            "insert": self.ns.coll.clone(),
            "documents": self.documents.clone(),
            "ordered": self.ordered,
        };
        append_options(&mut command, self.options.as_ref())?;
        if let Some(write_concern) = self.options.as_ref().and_then(|o| o.write_concern.as_ref()) {
            command.insert("writeConcern", bson::to_bson(write_concern)?);
        }
        if let Some(txn_number) = txn_number {
            command.insert("txnNumber", txn_number);
        }
        Ok(command)
    }
}

impl RetryableWrite for Insert {
    type Output = BulkWriteResult;

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.as_ref().and_then(|o| o.write_concern.as_ref())
    }

    fn execute_attempt<'a>(
        &'a mut self,
        context: &'a mut RetryableWriteContext,
        _attempt: u8,
        txn_number: Option<i64>,
    ) -> BoxFuture<'a, Result<Self::Output>> {
        Box::pin(async move {
            let command = self.build_command(txn_number)?;
            let channel = context.channel()?;
            let reply = channel.connection_mut().send_command(&self.ns.db, command).await?;
            if let Some(err) = command_error_from_reply(&reply) {
                return Err(err);
            }
            let body: WriteResponseBody = bson::from_document(reply)?;

            let failed_indices: HashSet<usize> = body
                .write_errors
                .iter()
                .flatten()
                .map(|e| e.index)
                .collect();

            let mut inserted_ids = HashMap::new();
            for (i, id) in self.ids.iter().enumerate() {
                if !failed_indices.contains(&i) {
                    inserted_ids.insert(self.start_index + i, id.clone());
                }
            }

            let write_errors = body
                .write_errors
                .unwrap_or_default()
                .into_iter()
                .map(|mut e| {
                    e.index += self.start_index;
                    e
                })
                .collect::<Vec<_>>();

            Ok(BulkWriteResult {
                acknowledged: true,
                inserted_count: inserted_ids.len() as i64,
                inserted_ids,
                write_errors,
                write_concern_error: body.write_concern_error,
                ..Default::default()
            })
        })
    }
}
