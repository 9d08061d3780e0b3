//! The `update` batch command builder (C5) and its retryable-write attempt (C6).

use std::collections::HashMap;

use bson::{doc, Document};
use futures_core::future::BoxFuture;

use crate::{
    client::{binding::RetryableWriteContext, executor::RetryableWrite},
    coll::Namespace,
    collation::Collation,
    concern::WriteConcern,
    error::Result,
    operation::{append_options, command_error_from_reply, WriteResponseBody},
    options::UpdateOptions,
    results::BulkWriteResult,
};

/// One `updateOne`/`updateMany`/`replaceOne` write model within a batch.
#[derive(Debug, Clone)]
pub(crate) struct UpdateModel {
    pub(crate) filter: Document,
    pub(crate) update: Document,
    pub(crate) multi: bool,
    pub(crate) upsert: Option<bool>,
    pub(crate) collation: Option<Collation>,
    pub(crate) hint: Option<Document>,
    pub(crate) array_filters: Option<Vec<Document>>,
}

impl UpdateModel {
    fn to_document(&self) -> Result<Document> {
        let mut entry = doc! {
            "q": self.filter.clone(),
            "u": self.update.clone(),
            "multi": self.multi,
        };
        if let Some(upsert) = self.upsert {
            entry.insert("upsert", upsert);
        }
        if let Some(collation) = &self.collation {
            entry.insert("collation", bson::to_bson(collation)?);
        }
        if let Some(hint) = &self.hint {
            entry.insert("hint", hint.clone());
        }
        if let Some(array_filters) = &self.array_filters {
            entry.insert("arrayFilters", array_filters.clone());
        }
        Ok(entry)
    }
}

/// One batch of an `update` bulk-write request.
#[derive(Debug)]
pub(crate) struct Update {
    ns: Namespace,
    models: Vec<UpdateModel>,
    start_index: usize,
    ordered: bool,
    options: Option<UpdateOptions>,
}

impl Update {
    pub(crate) fn new(
        ns: Namespace,
        models: Vec<UpdateModel>,
        start_index: usize,
        ordered: bool,
        options: Option<UpdateOptions>,
    ) -> Self {
        Self {
            ns,
            models,
            start_index,
            ordered,
            options,
        }
    }

    fn build_command(&self, txn_number: Option<i64>) -> Result<Document> {
        let updates = self
            .models
            .iter()
            .map(UpdateModel::to_document)
            .collect::<Result<Vec<_>>>()?;
        let mut command = doc! {
            "update": self.ns.coll.clone(),
            "updates": updates,
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

impl RetryableWrite for Update {
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

            let upserted_count = body.upserted.as_ref().map_or(0, |u| u.len()) as i64;
            let mut upserted_ids = HashMap::new();
            for upserted in body.upserted.into_iter().flatten() {
                upserted_ids.insert(self.start_index + upserted.index, upserted.id);
            }

            let matched = body.n.saturating_sub(upserted_count as u64) as i64;
            let modified = body.n_modified.unwrap_or(0) as i64;

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
                matched_count: matched,
                modified_count: modified,
                upserted_count,
                upserted_ids,
                write_errors,
                write_concern_error: body.write_concern_error,
                ..Default::default()
            })
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn model() -> UpdateModel {
        UpdateModel {
            filter: doc! { "x": 1 },
            update: doc! { "$set": { "x": 2 } },
            multi: false,
            upsert: None,
            collation: None,
            hint: None,
            array_filters: None,
        }
    }

    #[test]
    fn build_command_embeds_each_model_as_an_update_entry() {
        let update = Update::new(Namespace::new("store", "widgets"), vec![model()], 0, true, None);
        let command = update.build_command(None).unwrap();
        let updates = command.get_array("updates").unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].as_document().unwrap().get_document("q").unwrap(),
            &doc! { "x": 1 }
        );
    }

    #[test]
    fn write_concern_is_sent_on_the_wire() {
        use crate::concern::{Acknowledgment, WriteConcern};
        let options = UpdateOptions::builder()
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        let update = Update::new(Namespace::new("store", "widgets"), vec![model()], 0, true, Some(options));
        let command = update.build_command(None).unwrap();
        assert_eq!(
            command.get_document("writeConcern").unwrap().get_str("w").unwrap(),
            "majority"
        );
    }

    #[test]
    fn upsert_flag_is_only_present_when_set() {
        let mut m = model();
        m.upsert = Some(true);
        let update = Update::new(Namespace::new("store", "widgets"), vec![m], 0, true, None);
        let command = update.build_command(None).unwrap();
        let updates = command.get_array("updates").unwrap();
        assert_eq!(updates[0].as_document().unwrap().get_bool("upsert").unwrap(), true);

        let update = Update::new(Namespace::new("store", "widgets"), vec![model()], 0, true, None);
        let command = update.build_command(None).unwrap();
        let updates = command.get_array("updates").unwrap();
        assert!(!updates[0].as_document().unwrap().contains_key("upsert"));
    }
}
