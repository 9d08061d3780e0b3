//! Session and transaction-number state. A session orders a sequence of operations against a
//! cluster and, for retryable writes, supplies the monotonically increasing transaction number
//! that lets the server de-duplicate a retried attempt from the one that preceded it.

use std::time::{Duration, Instant};

use bson::{doc, oid::ObjectId, spec::BinarySubtype, Binary, Bson, Document, Timestamp};
use uuid::Uuid;

/// Whether a session is currently inside an explicit, user-started transaction. Retryable writes
/// are not retried for operations issued within an explicit transaction — the transaction as a
/// whole is what gets retried by the caller, per [`TRANSIENT_TRANSACTION_ERROR`].
///
/// [`TRANSIENT_TRANSACTION_ERROR`]: crate::error::TRANSIENT_TRANSACTION_ERROR
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started, or the last one finished.
    #[default]
    None,
    /// A transaction has been started but no operation has used it yet.
    Starting,
    /// At least one operation has used the current transaction.
    InProgress,
    /// The transaction was committed.
    Committed,
    /// The transaction was aborted.
    Aborted,
}

impl TransactionState {
    /// Whether an operation run right now would be considered part of an in-flight transaction.
    pub fn is_active(self) -> bool {
        matches!(self, TransactionState::Starting | TransactionState::InProgress)
    }
}

/// A logical session used to order a sequence of operations against a cluster.
///
/// `ClientSession` is not thread-safe: it can only be used by one execution at a time, matching
/// the exclusive `&mut ClientSession` borrow operations take.
#[derive(Debug)]
pub struct ClientSession {
    server_session: ServerSession,
    is_implicit: bool,
    causal_consistency: bool,
    transaction_state: TransactionState,
    at_cluster_time: Option<Timestamp>,
}

impl ClientSession {
    /// Creates a new, explicit client session.
    pub fn new(causal_consistency: bool) -> Self {
        Self {
            server_session: ServerSession::new(),
            is_implicit: false,
            causal_consistency,
            transaction_state: TransactionState::None,
            at_cluster_time: None,
        }
    }

    /// Creates an implicit session for a single operation that was not given one explicitly.
    /// Implicit sessions default to causal consistency off, matching how a one-shot operation
    /// has no later reads to causally order against.
    pub fn new_implicit() -> Self {
        Self {
            server_session: ServerSession::new(),
            is_implicit: true,
            causal_consistency: false,
            transaction_state: TransactionState::None,
            at_cluster_time: None,
        }
    }

    /// The server session id, as sent in the `lsid` field of every command this session is used
    /// for.
    pub fn id(&self) -> &Document {
        &self.server_session.id
    }

    /// Whether this session was created implicitly by an operation that was not given one.
    pub fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    pub(crate) fn causal_consistency(&self) -> bool {
        self.causal_consistency
    }

    /// Whether this session is currently inside an explicit transaction.
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    pub(crate) fn set_transaction_state(&mut self, state: TransactionState) {
        self.transaction_state = state;
    }

    /// The current transaction number, without incrementing it.
    pub(crate) fn txn_number(&self) -> i64 {
        self.server_session.txn_number
    }

    /// Increments the transaction number and returns the new value. Called exactly once per
    /// logical write operation (not per retry attempt — a retry reuses the number from the
    /// original attempt).
    pub(crate) fn advance_txn_number(&mut self) -> i64 {
        self.server_session.txn_number += 1;
        self.server_session.txn_number
    }

    /// Marks the underlying server session dirty after a network error, so it will not be
    /// returned to a session pool for reuse.
    pub(crate) fn mark_dirty(&mut self) {
        self.server_session.dirty = true;
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.server_session.dirty
    }

    pub(crate) fn update_last_use(&mut self) {
        self.server_session.last_use = Instant::now();
    }

    /// The highest `atClusterTime` observed on a cursor-bearing reply for this session, if any.
    /// Snapshot/causally-consistent reads issued later in the session should read no earlier than
    /// this point.
    pub fn at_cluster_time(&self) -> Option<Timestamp> {
        self.at_cluster_time
    }

    /// Records `atClusterTime` from a cursor-bearing reply, for snapshot bookkeeping.
    pub(crate) fn set_at_cluster_time(&mut self, at_cluster_time: Timestamp) {
        self.at_cluster_time = Some(at_cluster_time);
    }
}

/// Client-side representation of a server session. In a full driver these are pooled and reused
/// across `ClientSession`s; this crate models the id/dirty/txn_number fields a pool would manage
/// without implementing the pool itself (an external collaborator).
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    id: Document,
    last_use: Instant,
    dirty: bool,
    txn_number: i64,
}

impl ServerSession {
    fn new() -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
            txn_number: 0,
        }
    }

    /// Whether this session is within `margin` of its logical session timeout, and so should not
    /// be reused even though it hasn't formally expired yet.
    pub(crate) fn is_about_to_expire(&self, logical_session_timeout: Duration, margin: Duration) -> bool {
        let expiration = self.last_use + logical_session_timeout;
        expiration < Instant::now() + margin
    }
}

/// A placeholder `_id` generator used when an inserted document doesn't supply its own, grounded
/// on the identical helper in [`crate::bson_util::add_id`] but exposed here because session
/// construction and id generation share the same `uuid`/`oid` dependency footprint.
#[allow(dead_code)]
pub(crate) fn new_object_id() -> ObjectId {
    ObjectId::new()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn txn_number_is_monotonic_across_advances() {
        let mut session = ClientSession::new(false);
        assert_eq!(session.advance_txn_number(), 1);
        assert_eq!(session.advance_txn_number(), 2);
        assert_eq!(session.txn_number(), 2);
    }

    #[test]
    fn implicit_session_defaults_causal_consistency_off() {
        let session = ClientSession::new_implicit();
        assert!(session.is_implicit());
        assert!(!session.causal_consistency());
    }

    #[test]
    fn transaction_state_starting_and_in_progress_are_active() {
        assert!(TransactionState::Starting.is_active());
        assert!(TransactionState::InProgress.is_active());
        assert!(!TransactionState::None.is_active());
        assert!(!TransactionState::Committed.is_active());
    }

    #[test]
    fn server_session_about_to_expire_within_margin() {
        let session = ServerSession::new();
        assert!(!session.is_about_to_expire(Duration::from_secs(1800), Duration::from_secs(60)));
    }

    #[test]
    fn at_cluster_time_is_absent_until_set() {
        let mut session = ClientSession::new(true);
        assert!(session.at_cluster_time().is_none());
        let ts = Timestamp { time: 1, increment: 1 };
        session.set_at_cluster_time(ts);
        assert_eq!(session.at_cluster_time(), Some(ts));
    }
}
