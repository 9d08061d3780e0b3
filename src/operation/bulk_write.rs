//! Batch orchestration for bulk writes (SPEC §4.7): runs a sequence of per-batch retryable-write
//! operations, honoring ordered/unordered semantics. Ordered execution stops at the first batch
//! that reports any failure, yielding a partial result; unordered execution runs every batch and
//! aggregates all results and errors.

use futures_core::future::BoxFuture;

use crate::{
    client::{
        binding::{ReadWriteBinding, RetryableWriteContext},
        executor::{Executor, RetryableWrite},
    },
    error::Result,
    results::BulkWriteResult,
};

/// Supplies a fresh [`ReadWriteBinding`] for each batch. Each batch acquires its own
/// [`RetryableWriteContext`] (and therefore its own channel) rather than sharing one across
/// batches, matching the per-attempt acquisition the executor (C6) already assumes.
pub(crate) trait BindingSource: Send {
    fn acquire(&mut self) -> BoxFuture<'_, Result<Box<dyn ReadWriteBinding>>>;
}

/// Runs `batches` in sequence, merging their [`BulkWriteResult`]s.
///
/// Ordered: stops at the first batch whose attempt errors out-of-band (a non-retryable command or
/// transport failure) or whose result carries per-item write errors, returning everything merged
/// so far. Unordered: every batch runs regardless of prior failures, and every result is merged.
pub(crate) async fn execute_batches<Op>(
    batches: Vec<Op>,
    ordered: bool,
    retry_requested: bool,
    source: &mut dyn BindingSource,
) -> Result<BulkWriteResult>
where
    Op: RetryableWrite<Output = BulkWriteResult>,
{
    let mut aggregate = BulkWriteResult {
        acknowledged: true,
        ..Default::default()
    };
    let mut first_error = None;

    for batch in batches {
        let binding = match source.acquire().await {
            Ok(binding) => binding,
            Err(e) => {
                if ordered {
                    return Err(e);
                }
                first_error.get_or_insert(e);
                continue;
            }
        };
        let context = match RetryableWriteContext::new(binding, retry_requested).await {
            Ok(context) => context,
            Err(e) => {
                if ordered {
                    return Err(e);
                }
                first_error.get_or_insert(e);
                continue;
            }
        };

        match Executor::execute_retryable_write(context, batch).await {
            Ok(result) => {
                let batch_failed = !result.write_errors.is_empty() || result.write_concern_error.is_some();
                aggregate.merge(result);
                if ordered && batch_failed {
                    break;
                }
            }
            Err(e) => {
                if ordered {
                    return Err(e);
                }
                first_error.get_or_insert(e);
            }
        }
    }

    if aggregate.inserted_count == 0
        && aggregate.matched_count == 0
        && aggregate.deleted_count == 0
        && aggregate.write_errors.is_empty()
    {
        if let Some(e) = first_error {
            return Err(e);
        }
    }

    Ok(aggregate)
}

#[cfg(test)]
mod test {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        client::binding::{Binding, Channel, ChannelSource},
        concern::WriteConcern,
        error::{BulkWriteError, ErrorKind},
        handshake::{ConnectionDescription, ConnectionId, HelloResult, RawConnection},
        selection_criteria::SelectionCriteria,
        server_type::ServerType,
        ClientSession,
    };
    use std::time::Duration;

    struct FakeConn;
    impl RawConnection for FakeConn {
        fn send_command<'a>(&'a mut self, _db: &'a str, _command: bson::Document) -> BoxFuture<'a, Result<bson::Document>> {
            Box::pin(async { Ok(doc! { "ok": 1.0 }) })
        }
    }

    fn description() -> ConnectionDescription {
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

    struct FakeChannelSource;
    impl ChannelSource for FakeChannelSource {
        fn acquire_channel(&mut self) -> BoxFuture<'_, Result<Channel>> {
            Box::pin(async move { Ok(Channel::new("localhost:27017", description(), Box::new(FakeConn))) })
        }
        fn address(&self) -> &str {
            "localhost:27017"
        }
    }

    struct FakeBinding(ClientSession);
    impl Binding for FakeBinding {
        fn session(&mut self) -> &mut ClientSession {
            &mut self.0
        }
    }
    impl ReadWriteBinding for FakeBinding {
        fn read_channel_source<'a>(
            &'a mut self,
            _criteria: Option<&'a SelectionCriteria>,
        ) -> BoxFuture<'a, Result<Box<dyn ChannelSource>>> {
            unreachable!("bulk writes never read")
        }
        fn write_channel_source(&mut self) -> BoxFuture<'_, Result<Box<dyn ChannelSource>>> {
            Box::pin(async move { Ok(Box::new(FakeChannelSource) as Box<dyn ChannelSource>) })
        }
    }

    struct FakeSource;
    impl BindingSource for FakeSource {
        fn acquire(&mut self) -> BoxFuture<'_, Result<Box<dyn ReadWriteBinding>>> {
            Box::pin(async move { Ok(Box::new(FakeBinding(ClientSession::new(false))) as Box<dyn ReadWriteBinding>) })
        }
    }

    /// A scripted batch whose single attempt returns a fixed, pre-built result.
    struct ScriptedBatch(BulkWriteResult);
    impl RetryableWrite for ScriptedBatch {
        type Output = BulkWriteResult;
        fn write_concern(&self) -> Option<&WriteConcern> {
            None
        }
        fn execute_attempt<'a>(
            &'a mut self,
            _context: &'a mut RetryableWriteContext,
            _attempt: u8,
            _txn_number: Option<i64>,
        ) -> BoxFuture<'a, Result<Self::Output>> {
            let result = self.0.clone();
            Box::pin(async move { Ok(result) })
        }
    }

    fn ok_batch(inserted: i64) -> ScriptedBatch {
        ScriptedBatch(BulkWriteResult {
            acknowledged: true,
            inserted_count: inserted,
            ..Default::default()
        })
    }

    fn failing_batch(index: usize) -> ScriptedBatch {
        ScriptedBatch(BulkWriteResult {
            acknowledged: true,
            write_errors: vec![BulkWriteError {
                index,
                code: 11000,
                code_name: Some("DuplicateKey".to_string()),
                message: "E11000".to_string(),
                details: None,
            }],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn ordered_run_merges_every_batch_on_full_success() {
        let mut source = FakeSource;
        let result = execute_batches(vec![ok_batch(1), ok_batch(2)], true, true, &mut source)
            .await
            .unwrap();
        assert_eq!(result.inserted_count, 3);
    }

    #[tokio::test]
    async fn ordered_run_stops_after_first_batch_with_write_errors() {
        let mut source = FakeSource;
        let result = execute_batches(vec![ok_batch(1), failing_batch(0), ok_batch(5)], true, true, &mut source)
            .await
            .unwrap();
        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.write_errors.len(), 1);
    }

    #[tokio::test]
    async fn unordered_run_continues_past_a_failing_batch() {
        let mut source = FakeSource;
        let result = execute_batches(vec![failing_batch(0), ok_batch(3)], false, true, &mut source)
            .await
            .unwrap();
        assert_eq!(result.inserted_count, 3);
        assert_eq!(result.write_errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_list_yields_an_acknowledged_empty_result() {
        let mut source = FakeSource;
        let result = execute_batches(Vec::<ScriptedBatch>::new(), true, true, &mut source)
            .await
            .unwrap();
        assert!(result.acknowledged);
        assert_eq!(result.inserted_count, 0);
    }

    #[tokio::test]
    async fn ordered_transport_error_on_first_batch_surfaces_directly() {
        struct FailingBatch;
        impl RetryableWrite for FailingBatch {
            type Output = BulkWriteResult;
            fn write_concern(&self) -> Option<&WriteConcern> {
                None
            }
            fn execute_attempt<'a>(
                &'a mut self,
                _context: &'a mut RetryableWriteContext,
                _attempt: u8,
                _txn_number: Option<i64>,
            ) -> BoxFuture<'a, Result<Self::Output>> {
                Box::pin(async move {
                    Err(ErrorKind::Internal {
                        message: "boom".to_string(),
                    }
                    .into())
                })
            }
        }

        let mut source = FakeSource;
        let err = execute_batches(vec![FailingBatch], true, true, &mut source).await.unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::Internal { .. }));
    }
}
