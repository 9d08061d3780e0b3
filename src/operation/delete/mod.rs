//! The `delete` batch command builder (C5) and its retryable-write attempt (C6).

use bson::{doc, Document};
use futures_core::future::BoxFuture;

use crate::{
    client::{binding::RetryableWriteContext, executor::RetryableWrite},
    coll::Namespace,
    collation::Collation,
    concern::WriteConcern,
    error::Result,
    operation::{append_options, command_error_from_reply, WriteResponseBody},
    options::DeleteOptions,
    results::BulkWriteResult,
};

/// One `deleteOne`/`deleteMany` write model within a batch. `limit` is `0` for `deleteMany`, `1`
/// for `deleteOne`, per the `delete` command's wire shape.
#[derive(Debug, Clone)]
pub(crate) struct DeleteModel {
    pub(crate) filter: Document,
    pub(crate) limit: u32,
    pub(crate) collation: Option<Collation>,
    pub(crate) hint: Option<Document>,
}

impl DeleteModel {
    fn to_document(&self) -> Result<Document> {
        let mut entry = doc! {
            "q": self.filter.clone(),
            "limit": self.limit,
        };
        if let Some(collation) = &self.collation {
            entry.insert("collation", bson::to_bson(collation)?);
        }
        if let Some(hint) = &self.hint {
            entry.insert("hint", hint.clone());
        }
        Ok(entry)
    }
}

/// One batch of a `delete` bulk-write request.
#[derive(Debug)]
pub(crate) struct Delete {
    ns: Namespace,
    models: Vec<DeleteModel>,
    start_index: usize,
    ordered: bool,
    options: Option<DeleteOptions>,
}

impl Delete {
    pub(crate) fn new(
        ns: Namespace,
        models: Vec<DeleteModel>,
        start_index: usize,
        ordered: bool,
        options: Option<DeleteOptions>,
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
        let deletes = self
            .models
            .iter()
            .map(DeleteModel::to_document)
            .collect::<Result<Vec<_>>>()?;
        let mut command = doc! {
            "delete": self.ns.coll.clone(),
            "deletes": deletes,
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

impl RetryableWrite for Delete {
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
                deleted_count: body.n as i64,
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

    #[test]
    fn delete_one_model_sets_limit_to_one() {
        let model = DeleteModel {
            filter: doc! { "x": 1 },
            limit: 1,
            collation: None,
            hint: None,
        };
        let delete = Delete::new(Namespace::new("store", "widgets"), vec![model], 0, true, None);
        let command = delete.build_command(None).unwrap();
        let deletes = command.get_array("deletes").unwrap();
        assert_eq!(deletes[0].as_document().unwrap().get_i32("limit").unwrap(), 1);
    }

    #[test]
    fn write_concern_is_sent_on_the_wire() {
        use crate::concern::{Acknowledgment, WriteConcern};
        let model = DeleteModel {
            filter: doc! { "x": 1 },
            limit: 1,
            collation: None,
            hint: None,
        };
        let options = DeleteOptions::builder()
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .build();
        let delete = Delete::new(Namespace::new("store", "widgets"), vec![model], 0, true, Some(options));
        let command = delete.build_command(None).unwrap();
        assert_eq!(
            command.get_document("writeConcern").unwrap().get_str("w").unwrap(),
            "majority"
        );
    }

    #[test]
    fn delete_many_model_sets_limit_to_zero() {
        let model = DeleteModel {
            filter: doc! { "x": 1 },
            limit: 0,
            collation: None,
            hint: None,
        };
        let delete = Delete::new(Namespace::new("store", "widgets"), vec![model], 0, true, None);
        let command = delete.build_command(None).unwrap();
        let deletes = command.get_array("deletes").unwrap();
        assert_eq!(deletes[0].as_document().unwrap().get_i32("limit").unwrap(), 0);
    }
}
