//! Retryable-Write Executor (C6): the two-attempt state machine that couples a write attempt with
//! a transaction number, channel re-selection on failure, and a server-capability recheck before
//! committing to a second attempt.
//!
//! Source material for this subsystem pairs every state transition with exception filters
//! (`catch` clauses that inspect the thrown error to decide whether to retry). This is
//! reimplemented as explicit result tagging instead: the classification in [`Error`] drives plain
//! `match` arms rather than a caught-and-rethrown exception.

use futures_core::future::BoxFuture;
#[cfg(feature = "tracing-unstable")]
use tracing::{debug, warn};

use crate::{
    client::binding::{RetryableReadContext, RetryableWriteContext},
    concern::WriteConcern,
    cursor::{Cursor, CursorSpecification, PinningPolicy},
    error::{ErrorKind, Result},
    operation::{CursorBody, Operation},
    Error,
};

/// The contract a write operation implements to run through [`Executor::execute_retryable_write`].
pub trait RetryableWrite: Send {
    /// The operation's successful result type.
    type Output;

    /// This operation's write concern, if any. `None` is treated as the server default, which is
    /// acknowledged.
    fn write_concern(&self) -> Option<&WriteConcern>;

    /// Executes one attempt against `context`. `attempt` is `1` or `2`; `txn_number` is `Some`
    /// whenever this operation entered the two-attempt retry path, and is identical across both
    /// calls for a given operation.
    fn execute_attempt<'a>(
        &'a mut self,
        context: &'a mut RetryableWriteContext,
        attempt: u8,
        txn_number: Option<i64>,
    ) -> BoxFuture<'a, Result<Self::Output>>;
}

/// Drives the two-attempt retryable-write state machine (`Attempt1 → Classify1 → Reselect →
/// CheckCap → Attempt2 → Classify2 → Done`).
pub struct Executor;

impl Executor {
    /// Runs `op` to completion against `context`, retrying once if every precondition holds for
    /// the state the context was constructed with.
    pub async fn execute_retryable_write<Op: RetryableWrite>(
        mut context: RetryableWriteContext,
        mut op: Op,
    ) -> Result<Op::Output> {
        if !Self::eligible_for_retry(&mut context, &op) {
            return op.execute_attempt(&mut context, 1, None).await;
        }

        // A session's id is always present in this crate's session model (`ServerSession::new`
        // assigns one unconditionally), so the only remaining precondition gating entry to this
        // path beyond `eligible_for_retry` is the caller's own request to retry.
        let txn_number = context.session().advance_txn_number();

        #[cfg(feature = "tracing-unstable")]
        debug!(attempt = 1, txn_number, "dispatching retryable write attempt");

        let original_error = match op.execute_attempt(&mut context, 1, Some(txn_number)).await {
            Ok(output) => return Ok(output),
            Err(e) if !e.is_retryable_write_error() => return Err(e),
            Err(e) => e,
        };

        #[cfg(feature = "tracing-unstable")]
        warn!(
            error = %original_error,
            "attempt 1 failed with a retryable error, reselecting channel for attempt 2"
        );

        if context.replace_channel_source().await.is_err() {
            return Err(original_error);
        }

        let retry_supported = context
            .channel()
            .map(|channel| channel.description().supports_retryable_writes())
            .unwrap_or(false);
        if !retry_supported {
            return Err(original_error);
        }

        #[cfg(feature = "tracing-unstable")]
        debug!(attempt = 2, txn_number, "dispatching retryable write attempt");

        match op.execute_attempt(&mut context, 2, Some(txn_number)).await {
            Ok(output) => Ok(output),
            Err(e2) if e2.should_surface_original_error() => Err(original_error),
            Err(e2) => Err(e2),
        }
    }

    /// Preconditions 1-3 and 5 of the two-attempt retry path; precondition 4 (a non-null session
    /// id) is structurally guaranteed, see the comment in
    /// [`Executor::execute_retryable_write`].
    fn eligible_for_retry<Op: RetryableWrite>(context: &mut RetryableWriteContext, op: &Op) -> bool {
        if !context.retry_requested() {
            return false;
        }
        if let Some(wc) = op.write_concern() {
            if !wc.is_acknowledged() {
                return false;
            }
        }
        let channel_supports_retry = context
            .channel()
            .map(|channel| channel.description().supports_retryable_writes())
            .unwrap_or(false);
        if !channel_supports_retry {
            return false;
        }
        !context.session().transaction_state().is_active()
    }

    /// Drives a cursor-bearing read operation (`find`/`aggregate`) to completion against `db`:
    /// builds the command, sends it over `context`'s bound channel, and materializes the reply
    /// into a [`Cursor`] that keeps that channel for subsequent `getMore`s. Non-retryable: a read
    /// that fails is simply reported to the caller, since a retry needs the same fresh-channel
    /// reselection dance as a write but this crate's SPEC scope only requires the write side of
    /// that (C6).
    pub async fn execute_read<Op>(mut context: RetryableReadContext, op: Op, db: &str) -> Result<Cursor>
    where
        Op: Operation<O = CursorBody>,
    {
        let description = context.channel()?.description().clone();
        let command = op.build(&description)?;
        let reply = context
            .channel()?
            .connection_mut()
            .send_command(db, command)
            .await?;
        let body = op.handle_response(reply, &description)?;

        if let Some(at_cluster_time) = body.cursor.at_cluster_time {
            context.session().set_at_cluster_time(at_cluster_time);
        }

        let load_balanced = context
            .channel()
            .map(|channel| channel.description().service_id().is_some())
            .unwrap_or(false);
        let pinning = PinningPolicy::for_result(load_balanced, body.cursor.id);

        let spec = CursorSpecification::from_cursor_info(
            body.cursor,
            op.cursor_limit(),
            op.cursor_batch_size(),
            op.cursor_max_await_time(),
        )?;

        let channel_source = context.take_channel_source().ok_or_else(|| {
            Error::from(ErrorKind::Internal {
                message: "read context has no acquired channel source to hand off to the cursor".to_string(),
            })
        })?;

        Ok(Cursor::new(spec, pinning, channel_source))
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use crate::{
        client::binding::{Binding, Channel, ChannelSource, ReadWriteBinding},
        error::{CommandError, ErrorKind},
        handshake::{ConnectionDescription, ConnectionId, HelloResult, RawConnection},
        selection_criteria::SelectionCriteria,
        server_type::ServerType,
        ClientSession,
    };

    use super::*;

    struct FakeConn;
    impl RawConnection for FakeConn {
        fn send_command<'a>(
            &'a mut self,
            _db: &'a str,
            _command: bson::Document,
        ) -> BoxFuture<'a, Result<bson::Document>> {
            Box::pin(async { Ok(bson::doc! { "ok": 1.0 }) })
        }
    }

    fn fake_description(server_type: ServerType) -> ConnectionDescription {
        ConnectionDescription {
            connection_id: ConnectionId {
                local: 1,
                server_value: Some(1),
            },
            hello_result: HelloResult {
                server_type,
                max_wire_version: Some(17),
                min_wire_version: Some(0),
                logical_session_timeout: Some(std::time::Duration::from_secs(1800)),
                service_id: None,
                connection_id: Some(1),
                sasl_supported_mechs: None,
                max_write_batch_size: None,
                max_bson_object_size: None,
            },
        }
    }

    struct FakeChannelSource {
        server_type: ServerType,
    }

    impl ChannelSource for FakeChannelSource {
        fn acquire_channel(&mut self) -> BoxFuture<'_, Result<Channel>> {
            let server_type = self.server_type;
            Box::pin(async move {
                Ok(Channel::new(
                    "localhost:27017",
                    fake_description(server_type),
                    Box::new(FakeConn),
                ))
            })
        }

        fn address(&self) -> &str {
            "localhost:27017"
        }
    }

    struct FakeBinding {
        session: ClientSession,
        server_type: ServerType,
    }

    impl Binding for FakeBinding {
        fn session(&mut self) -> &mut ClientSession {
            &mut self.session
        }
    }

    impl ReadWriteBinding for FakeBinding {
        fn read_channel_source<'a>(
            &'a mut self,
            _criteria: Option<&'a SelectionCriteria>,
        ) -> BoxFuture<'a, Result<Box<dyn ChannelSource>>> {
            let server_type = self.server_type;
            Box::pin(async move { Ok(Box::new(FakeChannelSource { server_type }) as Box<dyn ChannelSource>) })
        }

        fn write_channel_source(&mut self) -> BoxFuture<'_, Result<Box<dyn ChannelSource>>> {
            let server_type = self.server_type;
            Box::pin(async move { Ok(Box::new(FakeChannelSource { server_type }) as Box<dyn ChannelSource>) })
        }
    }

    async fn context(retry_requested: bool, server_type: ServerType) -> RetryableWriteContext {
        let binding = Box::new(FakeBinding {
            session: ClientSession::new(false),
            server_type,
        });
        RetryableWriteContext::new(binding, retry_requested).await.unwrap()
    }

    /// A scripted operation whose attempts are driven by a queue of results, recording the
    /// attempt/transaction-number pairs it was invoked with.
    struct ScriptedWrite {
        results: Vec<Result<()>>,
        calls: Arc<Mutex<Vec<(u8, Option<i64>)>>>,
    }

    impl RetryableWrite for ScriptedWrite {
        type Output = ();

        fn write_concern(&self) -> Option<&WriteConcern> {
            None
        }

        fn execute_attempt<'a>(
            &'a mut self,
            _context: &'a mut RetryableWriteContext,
            attempt: u8,
            txn_number: Option<i64>,
        ) -> BoxFuture<'a, Result<()>> {
            self.calls.lock().unwrap().push((attempt, txn_number));
            let result = if self.results.is_empty() {
                Ok(())
            } else {
                self.results.remove(0)
            };
            Box::pin(async move { result })
        }
    }

    fn connection_error() -> Error {
        ErrorKind::Io(Arc::new(std::io::ErrorKind::ConnectionReset.into())).into()
    }

    fn duplicate_key_error() -> Error {
        ErrorKind::Command(CommandError {
            code: 11000,
            code_name: "DuplicateKey".to_string(),
            message: "E11000".to_string(),
        })
        .into()
    }

    #[tokio::test]
    async fn single_successful_attempt_uses_one_transaction_number() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let op = ScriptedWrite {
            results: vec![],
            calls: calls.clone(),
        };
        let ctx = context(true, ServerType::RsPrimary).await;
        Executor::execute_retryable_write(ctx, op).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 1);
        assert!(calls[0].1.is_some());
    }

    #[tokio::test]
    async fn retried_write_reuses_transaction_number_across_attempts() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let op = ScriptedWrite {
            results: vec![Err(connection_error())],
            calls: calls.clone(),
        };
        let ctx = context(true, ServerType::RsPrimary).await;
        Executor::execute_retryable_write(ctx, op).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, 1);
        assert_eq!(calls[1].0, 2);
        assert_eq!(calls[0].1, calls[1].1);
    }

    #[tokio::test]
    async fn retry_surfaces_original_error_when_retry_fails_with_server_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let op = ScriptedWrite {
            results: vec![Err(connection_error()), Err(duplicate_key_error())],
            calls: calls.clone(),
        };
        let ctx = context(true, ServerType::RsPrimary).await;
        let err = Executor::execute_retryable_write(ctx, op).await.unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::Io(_)));
    }

    #[tokio::test]
    async fn retry_surfaces_retry_error_when_retry_fails_with_connection_error() {
        let op = ScriptedWrite {
            results: vec![Err(connection_error()), Err(connection_error())],
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let ctx = context(true, ServerType::RsPrimary).await;
        let err = Executor::execute_retryable_write(ctx, op).await.unwrap_err();
        assert!(matches!(*err.kind, ErrorKind::Io(_)));
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_without_a_second_attempt() {
        let attempt_count = Arc::new(AtomicUsize::new(0));

        struct CountingWrite {
            counter: Arc<AtomicUsize>,
        }
        impl RetryableWrite for CountingWrite {
            type Output = ();
            fn write_concern(&self) -> Option<&WriteConcern> {
                None
            }
            fn execute_attempt<'a>(
                &'a mut self,
                _context: &'a mut RetryableWriteContext,
                _attempt: u8,
                _txn_number: Option<i64>,
            ) -> BoxFuture<'a, Result<()>> {
                self.counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(duplicate_key_error()) })
            }
        }

        let op = CountingWrite {
            counter: attempt_count.clone(),
        };
        let ctx = context(true, ServerType::RsPrimary).await;
        assert!(Executor::execute_retryable_write(ctx, op).await.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn standalone_server_does_not_enter_retry_path() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let op = ScriptedWrite {
            results: vec![Err(connection_error())],
            calls: calls.clone(),
        };
        let ctx = context(true, ServerType::Standalone).await;
        assert!(Executor::execute_retryable_write(ctx, op).await.is_err());

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.is_none());
    }

    /// A connection that always replies with a fixed, pre-scripted document, for exercising
    /// [`Executor::execute_read`] against a cursor-bearing reply.
    struct ScriptedReadConn {
        reply: bson::Document,
    }

    impl RawConnection for ScriptedReadConn {
        fn send_command<'a>(
            &'a mut self,
            _db: &'a str,
            _command: bson::Document,
        ) -> BoxFuture<'a, Result<bson::Document>> {
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    struct ScriptedReadChannelSource {
        reply: bson::Document,
    }

    impl ChannelSource for ScriptedReadChannelSource {
        fn acquire_channel(&mut self) -> BoxFuture<'_, Result<Channel>> {
            let reply = self.reply.clone();
            Box::pin(async move {
                Ok(Channel::new(
                    "localhost:27017",
                    fake_description(ServerType::RsPrimary),
                    Box::new(ScriptedReadConn { reply }),
                ))
            })
        }

        fn address(&self) -> &str {
            "localhost:27017"
        }
    }

    struct ScriptedReadBinding {
        session: ClientSession,
        reply: bson::Document,
    }

    impl Binding for ScriptedReadBinding {
        fn session(&mut self) -> &mut ClientSession {
            &mut self.session
        }
    }

    impl ReadWriteBinding for ScriptedReadBinding {
        fn read_channel_source<'a>(
            &'a mut self,
            _criteria: Option<&'a SelectionCriteria>,
        ) -> BoxFuture<'a, Result<Box<dyn ChannelSource>>> {
            let reply = self.reply.clone();
            Box::pin(async move { Ok(Box::new(ScriptedReadChannelSource { reply }) as Box<dyn ChannelSource>) })
        }

        fn write_channel_source(&mut self) -> BoxFuture<'_, Result<Box<dyn ChannelSource>>> {
            unimplemented!("execute_read never acquires a write channel source")
        }
    }

    #[tokio::test]
    async fn execute_read_drives_find_into_a_cursor() {
        let reply = bson::doc! {
            "ok": 1.0,
            "cursor": {
                "id": 123i64,
                "ns": "store.widgets",
                "firstBatch": [ bson::doc! { "x": 1 } ],
                "atClusterTime": bson::Timestamp { time: 10, increment: 1 },
            },
        };
        let binding = Box::new(ScriptedReadBinding {
            session: ClientSession::new(false),
            reply,
        });
        let context = RetryableReadContext::new(binding, None, false).await.unwrap();

        let find = crate::operation::Find::new(
            crate::coll::Namespace::new("store", "widgets"),
            bson::doc! {},
            None,
            None,
        );

        let cursor = Executor::execute_read(context, find, "store").await.unwrap();
        assert_eq!(cursor.id(), 123);
        assert_eq!(cursor.namespace().coll, "widgets");
        assert!(!cursor.is_exhausted());
    }

    #[tokio::test]
    async fn execute_read_drives_aggregate_into_a_cursor() {
        let reply = bson::doc! {
            "ok": 1.0,
            "cursor": {
                "id": 0i64,
                "ns": "store.widgets",
                "firstBatch": [ bson::doc! { "x": 1 } ],
            },
        };
        let binding = Box::new(ScriptedReadBinding {
            session: ClientSession::new(false),
            reply,
        });
        let context = RetryableReadContext::new(binding, None, false).await.unwrap();

        let aggregate = crate::operation::Aggregate::to_database(
            "admin",
            vec![bson::doc! { "$currentOp": {} }],
            None,
        );

        let cursor = Executor::execute_read(context, aggregate, "admin").await.unwrap();
        assert_eq!(cursor.id(), 0);
        assert!(cursor.is_exhausted());
    }
}
