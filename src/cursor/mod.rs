//! Cursor Materializer (C7): turns a command reply's `cursor` sub-document into a handle that
//! lazily fetches subsequent batches via `getMore`, honoring the channel-pinning policy dictated
//! by the server topology the command ran against.

use std::collections::VecDeque;

use bson::{doc, from_slice, Bson, Document, RawDocumentBuf};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::{
    client::binding::ChannelSource,
    coll::Namespace,
    error::{Error, Result},
    operation::CursorInfo,
};

fn normalize_limit(limit: Option<i64>) -> (Option<i64>, bool) {
    match limit {
        Some(l) if l < 0 => (Some(-l), true),
        other => (other, false),
    }
}

/// Whether the `getMore` channel source must resolve to the exact channel that served the
/// original command (SPEC §4.6: required on load-balanced topologies, or whenever the server
/// handed back a nonzero cursor id that it considers pinned).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PinningPolicy {
    /// `getMore` may acquire any channel from the pool.
    Unpinned,
    /// `getMore` must reuse the channel that issued the originating command.
    Pinned,
}

impl PinningPolicy {
    pub(crate) fn for_result(load_balanced: bool, cursor_id: i64) -> Self {
        if load_balanced || cursor_id != 0 {
            PinningPolicy::Pinned
        } else {
            PinningPolicy::Unpinned
        }
    }
}

/// The parsed shape of a command reply's `cursor` sub-document, before any batch has been
/// consumed.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) ns: Namespace,
    pub(crate) id: i64,
    pub(crate) batch: VecDeque<RawDocumentBuf>,
    pub(crate) batch_size: Option<u32>,
    /// Remaining documents permitted by the operation's `limit`, already normalized: a negative
    /// user-supplied limit is folded into `single_batch = true` with this holding its magnitude.
    pub(crate) limit: Option<i64>,
    pub(crate) single_batch: bool,
    pub(crate) max_await_time: Option<Duration>,
}

impl CursorSpecification {
    /// Parses a command reply's `cursor: { id, ns, firstBatch }` into a specification. `limit < 0`
    /// is folded into `single_batch = true` with `limit` set to its absolute value, per SPEC §4.6.
    pub(crate) fn parse(
        reply: &Document,
        limit: Option<i64>,
        batch_size: Option<u32>,
        max_await_time: Option<Duration>,
    ) -> Result<Self> {
        let cursor = reply
            .get_document("cursor")
            .map_err(|_| Error::invalid_response("missing cursor field in command reply"))?;
        let id = cursor
            .get_i64("id")
            .map_err(|_| Error::invalid_response("missing cursor.id in command reply"))?;
        let ns: Namespace = cursor
            .get_str("ns")
            .map_err(|_| Error::invalid_response("missing cursor.ns in command reply"))?
            .parse()
            .map_err(|_| Error::invalid_response("malformed cursor.ns in command reply"))?;
        let batch = cursor
            .get_array("firstBatch")
            .or_else(|_| cursor.get_array("nextBatch"))
            .map_err(|_| Error::invalid_response("missing cursor batch in command reply"))?
            .iter()
            .map(|doc| match doc {
                Bson::Document(d) => RawDocumentBuf::from_document(d)
                    .map_err(|e| Error::invalid_response(format!("malformed batch entry: {e}"))),
                _ => Err(Error::invalid_response("batch entry was not a document")),
            })
            .collect::<Result<VecDeque<_>>>()?;

        let (limit, single_batch) = normalize_limit(limit);

        Ok(Self {
            ns,
            id,
            batch,
            batch_size,
            limit,
            single_batch,
            max_await_time,
        })
    }

    /// Builds a specification directly from an already-parsed [`CursorInfo`] (the `cursor`
    /// sub-document of a `find`/`aggregate` reply), avoiding a second pass over the raw reply.
    pub(crate) fn from_cursor_info(
        info: CursorInfo,
        limit: Option<i64>,
        batch_size: Option<u32>,
        max_await_time: Option<Duration>,
    ) -> Result<Self> {
        let batch = info
            .batch
            .into_iter()
            .map(|doc| {
                RawDocumentBuf::from_document(&doc)
                    .map_err(|e| Error::invalid_response(format!("malformed batch entry: {e}")))
            })
            .collect::<Result<VecDeque<_>>>()?;

        let (limit, single_batch) = normalize_limit(limit);

        Ok(Self {
            ns: info.ns,
            id: info.id,
            batch,
            batch_size,
            limit,
            single_batch,
            max_await_time,
        })
    }
}

/// A materialized cursor: an in-memory batch plus everything needed to fetch the next one.
///
/// `T` is deserialized lazily, document by document, out of the raw batch bytes — a malformed
/// document elsewhere in the batch never blocks access to documents that parse cleanly ahead of
/// it.
pub struct Cursor {
    ns: Namespace,
    id: i64,
    batch: VecDeque<RawDocumentBuf>,
    batch_size: Option<u32>,
    remaining_limit: Option<i64>,
    single_batch: bool,
    max_await_time: Option<Duration>,
    pinning: PinningPolicy,
    channel_source: Option<Box<dyn ChannelSource>>,
}

impl Cursor {
    pub(crate) fn new(
        spec: CursorSpecification,
        pinning: PinningPolicy,
        channel_source: Box<dyn ChannelSource>,
    ) -> Self {
        let exhausted = spec.id == 0 || spec.single_batch;
        Self {
            ns: spec.ns,
            id: spec.id,
            batch: spec.batch,
            batch_size: spec.batch_size,
            remaining_limit: spec.limit,
            single_batch: spec.single_batch,
            max_await_time: spec.max_await_time,
            pinning,
            channel_source: if exhausted { None } else { channel_source.into() },
        }
    }

    /// The namespace this cursor iterates.
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// The server-side cursor id. `0` once exhausted.
    pub(crate) fn id(&self) -> i64 {
        self.id
    }

    /// Whether this cursor has no more documents to yield, locally or from the server.
    pub fn is_exhausted(&self) -> bool {
        self.batch.is_empty() && self.channel_source.is_none()
    }

    /// Returns the next document, issuing a `getMore` if the current batch is empty and the
    /// server cursor is still open.
    pub async fn try_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        if self.batch.is_empty() && !self.is_exhausted() {
            self.get_more().await?;
        }

        let Some(raw) = self.batch.pop_front() else {
            return Ok(None);
        };

        if let Some(remaining) = self.remaining_limit.as_mut() {
            *remaining -= 1;
            if *remaining <= 0 {
                self.close();
            }
        }

        let doc: T = from_slice(raw.as_bytes())
            .map_err(|e| Error::invalid_response(format!("malformed cursor document: {e}")))?;
        Ok(Some(doc))
    }

    async fn get_more(&mut self) -> Result<()> {
        if self.single_batch {
            self.close();
            return Ok(());
        }

        let Some(source) = self.channel_source.as_mut() else {
            return Ok(());
        };

        let mut channel = source.acquire_channel().await?;
        let mut command = doc! {
            "getMore": self.id,
            "collection": self.ns.coll.clone(),
        };
        if let Some(batch_size) = self.batch_size {
            command.insert("batchSize", i64::from(batch_size));
        }
        if let Some(max_await_time) = self.max_await_time {
            command.insert("maxTimeMS", max_await_time.as_millis() as i64);
        }

        let reply = channel.connection_mut().send_command(&self.ns.db, command).await?;
        let spec = CursorSpecification::parse(&reply, self.remaining_limit, self.batch_size, self.max_await_time)?;

        self.id = spec.id;
        self.batch = spec.batch;
        if self.id == 0 {
            self.close();
        }

        Ok(())
    }

    /// Releases the pinned channel source, if any. Idempotent. A truly exhausted server cursor
    /// (`id == 0`) needs no `killCursors`; closing early with documents still outstanding on the
    /// server is a best-effort leak the pool/topology collaborator is responsible for reclaiming.
    pub fn close(&mut self) {
        self.channel_source = None;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reply_with_batch(id: i64, docs: &[Document]) -> Document {
        doc! {
            "ok": 1.0,
            "cursor": {
                "id": id,
                "ns": "store.widgets",
                "firstBatch": docs.iter().cloned().map(Bson::Document).collect::<Vec<_>>(),
            },
        }
    }

    #[test]
    fn parse_normalizes_negative_limit_to_single_batch() {
        let reply = reply_with_batch(42, &[doc! { "x": 1 }]);
        let spec = CursorSpecification::parse(&reply, Some(-5), None, None).unwrap();
        assert!(spec.single_batch);
        assert_eq!(spec.limit, Some(5));
    }

    #[test]
    fn parse_reads_namespace_and_id() {
        let reply = reply_with_batch(7, &[]);
        let spec = CursorSpecification::parse(&reply, None, None, None).unwrap();
        assert_eq!(spec.id, 7);
        assert_eq!(spec.ns.db, "store");
        assert_eq!(spec.ns.coll, "widgets");
    }

    #[test]
    fn pinning_policy_pins_on_load_balanced_or_nonzero_cursor_id() {
        assert_eq!(PinningPolicy::for_result(true, 0), PinningPolicy::Pinned);
        assert_eq!(PinningPolicy::for_result(false, 99), PinningPolicy::Pinned);
        assert_eq!(PinningPolicy::for_result(false, 0), PinningPolicy::Unpinned);
    }

    #[test]
    fn cursor_with_zero_id_is_immediately_exhausted() {
        let reply = reply_with_batch(0, &[doc! { "x": 1 }]);
        let spec = CursorSpecification::parse(&reply, None, None, None).unwrap();
        struct NoSource;
        impl ChannelSource for NoSource {
            fn acquire_channel(&mut self) -> futures_core::future::BoxFuture<'_, Result<crate::client::binding::Channel>> {
                unreachable!("should never be called on an exhausted cursor")
            }
            fn address(&self) -> &str {
                "unused"
            }
        }
        let cursor = Cursor::new(spec, PinningPolicy::Unpinned, Box::new(NoSource));
        assert!(cursor.channel_source.is_none());
    }
}
