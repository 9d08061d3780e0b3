//! Blocking facade (§5 Concurrency & Resource Model): thin synchronous wrappers over this crate's
//! async API, run to completion on a process-wide multi-threaded `tokio` runtime. Only available
//! when the `sync` feature is enabled.
//!
//! Every wrapper here suspends at exactly the points the async variant does (channel-source
//! acquisition, channel acquisition, wire I/O) and nowhere else; the blocking call simply parks
//! the calling thread across those suspensions instead of yielding it back to an executor.

mod cursor;

use std::future::Future;

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

pub use cursor::Cursor;

use crate::{
    client::{
        binding::{RetryableReadContext, RetryableWriteContext},
        executor::{Executor, RetryableWrite},
    },
    error::Result,
    operation::{CursorBody, Operation},
};

static RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    Runtime::new().expect("failed to start the driver's background tokio runtime")
});

/// Blocks the calling thread until `future` resolves, running it on the process-wide runtime.
pub(crate) fn block_on<F: Future>(future: F) -> F::Output {
    RUNTIME.block_on(future)
}

/// Blocking counterpart to [`Executor::execute_retryable_write`].
pub fn execute_retryable_write<Op>(context: RetryableWriteContext, op: Op) -> Result<Op::Output>
where
    Op: RetryableWrite,
{
    block_on(Executor::execute_retryable_write(context, op))
}

/// Blocking counterpart to [`Executor::execute_read`], wrapping the resulting async
/// [`crate::cursor::Cursor`] in the blocking [`Cursor`] iterator. `T` is the document type the
/// returned cursor deserializes its batches into.
pub fn execute_read<Op, T>(context: RetryableReadContext, op: Op, db: &str) -> Result<Cursor<T>>
where
    Op: Operation<O = CursorBody>,
    T: serde::de::DeserializeOwned,
{
    let inner = block_on(Executor::execute_read(context, op, db))?;
    Ok(Cursor::new(inner))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_on_runs_a_future_to_completion() {
        let value = block_on(async { 1 + 1 });
        assert_eq!(value, 2);
    }

    #[test]
    fn execute_read_blocks_until_a_cursor_is_materialized() {
        use bson::{doc, Document};
        use futures_core::future::BoxFuture;

        use crate::{
            client::binding::{Binding, Channel, ChannelSource, ReadWriteBinding},
            coll::Namespace,
            error::Result,
            handshake::{ConnectionDescription, ConnectionId, HelloResult, RawConnection},
            operation::Find,
            selection_criteria::SelectionCriteria,
            server_type::ServerType,
            ClientSession,
        };

        struct FakeConn(Document);
        impl RawConnection for FakeConn {
            fn send_command<'a>(
                &'a mut self,
                _db: &'a str,
                _command: Document,
            ) -> BoxFuture<'a, Result<Document>> {
                let reply = self.0.clone();
                Box::pin(async move { Ok(reply) })
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
                    logical_session_timeout: Some(std::time::Duration::from_secs(1800)),
                    service_id: None,
                    connection_id: Some(1),
                    sasl_supported_mechs: None,
                    max_write_batch_size: None,
                    max_bson_object_size: None,
                },
            }
        }

        struct FakeSource(Document);
        impl ChannelSource for FakeSource {
            fn acquire_channel(&mut self) -> BoxFuture<'_, Result<Channel>> {
                let reply = self.0.clone();
                Box::pin(async move { Ok(Channel::new("localhost:27017", description(), Box::new(FakeConn(reply)))) })
            }
            fn address(&self) -> &str {
                "localhost:27017"
            }
        }

        struct FakeBinding(ClientSession, Document);
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
                let reply = self.1.clone();
                Box::pin(async move { Ok(Box::new(FakeSource(reply)) as Box<dyn ChannelSource>) })
            }
            fn write_channel_source(&mut self) -> BoxFuture<'_, Result<Box<dyn ChannelSource>>> {
                unreachable!("this test never writes")
            }
        }

        let reply = doc! {
            "ok": 1.0,
            "cursor": {
                "id": 0i64,
                "ns": "store.widgets",
                "firstBatch": [doc! { "x": 1 }],
            },
        };
        let binding = Box::new(FakeBinding(ClientSession::new(false), reply));
        let context = block_on(RetryableReadContext::new(binding, None, false)).unwrap();

        let find = Find::new(Namespace::new("store", "widgets"), doc! {}, None, None);
        let mut cursor: Cursor<Document> = execute_read(context, find, "store").unwrap();

        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.get_i32("x").unwrap(), 1);
        assert!(cursor.next().is_none());
    }
}
