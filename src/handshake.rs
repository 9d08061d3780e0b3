//! Connection handshake (C2/C3): builds the greeting command sent immediately after transport
//! establishment, parses the reply into a negotiated [`HelloResult`], runs the caller-supplied
//! authenticators, and reconciles the server-assigned connection id into the final
//! [`ConnectionDescription`].
//!
//! The transport itself (socket, TLS) and the wire-format encode/decode of a command document are
//! external collaborators (see SPEC §1); this module only needs something that can complete one
//! command round trip, modeled by [`RawConnection`].

use std::time::Duration;

use bson::{doc, oid::ObjectId, Document};
use futures_core::future::BoxFuture;
use serde::Deserialize;
#[cfg(feature = "tracing-unstable")]
use tracing::trace;

use crate::{
    error::{Error, Result},
    server_type::ServerType,
};

/// One command round trip against an established transport. Wire encoding and socket I/O are
/// external collaborators; an implementation of this trait is expected to serialize `command` to
/// the wire and deserialize the reply back into a [`Document`].
pub trait RawConnection: Send {
    /// Sends `command` against `db` and returns the raw reply document.
    fn send_command<'a>(&'a mut self, db: &'a str, command: Document) -> BoxFuture<'a, Result<Document>>;
}

/// A single authentication mechanism's exchange against a freshly greeted connection. Concrete
/// mechanisms (SCRAM-SHA-1/256, X.509, …) are external collaborators (SPEC §1); this crate only
/// depends on the trait object seam the initializer drives them through.
pub trait Authenticator: Send + Sync {
    /// A human-readable name for this mechanism, used in error messages.
    fn name(&self) -> &str;

    /// Performs this authenticator's exchange, given the negotiated [`HelloResult`] for mechanism
    /// selection (e.g. `saslSupportedMechs`).
    fn authenticate<'a>(
        &'a self,
        conn: &'a mut dyn RawConnection,
        hello: &'a HelloResult,
    ) -> BoxFuture<'a, Result<()>>;
}

/// The negotiated capability snapshot parsed out of a server's greeting reply.
#[derive(Clone, Debug, Default)]
pub struct HelloResult {
    /// The kind of server that answered the greeting.
    pub server_type: ServerType,
    /// The highest wire protocol version the server understands.
    pub max_wire_version: Option<i32>,
    /// The lowest wire protocol version the server understands.
    pub min_wire_version: Option<i32>,
    /// The window within which a session id remains valid; its presence is a proxy for server
    /// support of sessions.
    pub logical_session_timeout: Option<Duration>,
    /// Identifies the back-end instance behind a load balancer, present only when the greeting
    /// was answered by one.
    pub service_id: Option<ObjectId>,
    /// The server-assigned connection id, when present directly in the greeting reply.
    pub connection_id: Option<i64>,
    /// Mechanisms the server is willing to negotiate for the requested user, when requested via
    /// `saslSupportedMechs`.
    pub sasl_supported_mechs: Option<Vec<String>>,
    /// The maximum number of write models the server accepts in a single batched write command.
    pub max_write_batch_size: Option<i64>,
    /// The maximum size, in bytes, of a single command document the server accepts.
    pub max_bson_object_size: Option<i64>,
}

/// Conservative defaults used when a server's greeting omits its batching limits.
pub(crate) const DEFAULT_MAX_WRITE_BATCH_SIZE: i64 = 100_000;
/// Conservative defaults used when a server's greeting omits its batching limits.
pub(crate) const DEFAULT_MAX_BSON_OBJECT_SIZE: i64 = 16 * 1024 * 1024;

#[derive(Deserialize)]
struct HelloReply {
    #[serde(rename = "ok")]
    _ok: f64,
    #[serde(rename = "maxWireVersion")]
    max_wire_version: Option<i32>,
    #[serde(rename = "minWireVersion")]
    min_wire_version: Option<i32>,
    #[serde(rename = "logicalSessionTimeoutMinutes")]
    logical_session_timeout_minutes: Option<u64>,
    #[serde(rename = "serviceId")]
    service_id: Option<ObjectId>,
    #[serde(rename = "connectionId")]
    connection_id: Option<i64>,
    #[serde(rename = "saslSupportedMechs")]
    sasl_supported_mechs: Option<Vec<String>>,
    #[serde(rename = "maxWriteBatchSize")]
    max_write_batch_size: Option<i64>,
    #[serde(rename = "maxBsonObjectSize")]
    max_bson_object_size: Option<i64>,
    #[serde(rename = "msg")]
    msg: Option<String>,
    #[serde(rename = "ismaster", alias = "isWritablePrimary")]
    is_writable_primary: Option<bool>,
    secondary: Option<bool>,
    #[serde(rename = "arbiterOnly")]
    arbiter_only: Option<bool>,
    #[serde(rename = "isreplicaset")]
    is_replica_set: Option<bool>,
    #[serde(rename = "setName")]
    set_name: Option<String>,
}

impl HelloReply {
    fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            return ServerType::Mongos;
        }
        if self.is_replica_set == Some(true) {
            return ServerType::RsGhost;
        }
        if self.set_name.is_some() {
            return match (self.is_writable_primary, self.secondary, self.arbiter_only) {
                (Some(true), _, _) => ServerType::RsPrimary,
                (_, Some(true), _) => ServerType::RsSecondary,
                (_, _, Some(true)) => ServerType::RsArbiter,
                _ => ServerType::RsOther,
            };
        }
        ServerType::Standalone
    }
}

/// A local id plus the server's own view of the same connection, reconciled at the end of the
/// handshake (SPEC §4.2 step 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionId {
    /// The id this process assigned to the connection before the handshake ran.
    pub local: u32,
    /// The id the server reports for the same connection, when known.
    pub server_value: Option<i64>,
}

/// Immutable snapshot of a negotiated connection. Updates to a live connection (e.g. after
/// reauthentication) produce a new value rather than mutating this one.
#[derive(Clone, Debug)]
pub struct ConnectionDescription {
    /// The reconciled connection id.
    pub connection_id: ConnectionId,
    /// The negotiated hello result.
    pub hello_result: HelloResult,
}

impl ConnectionDescription {
    /// The server type observed at handshake time.
    pub fn initial_server_type(&self) -> ServerType {
        self.hello_result.server_type
    }

    /// The highest wire version the server understands, if known.
    pub fn max_wire_version(&self) -> Option<i32> {
        self.hello_result.max_wire_version
    }

    /// The logical session timeout, if the server supports sessions.
    pub fn logical_session_timeout(&self) -> Option<Duration> {
        self.hello_result.logical_session_timeout
    }

    /// The load-balancer service id, if this connection goes through one.
    pub fn service_id(&self) -> Option<ObjectId> {
        self.hello_result.service_id
    }

    /// Whether a session on this connection can participate in a retryable write: the server is
    /// a load balancer, or it advertises a logical session timeout and isn't standalone
    /// (SPEC §4.5 precondition 3).
    pub fn supports_retryable_writes(&self) -> bool {
        self.hello_result.server_type == ServerType::LoadBalancer
            || (self.hello_result.logical_session_timeout.is_some()
                && self.hello_result.server_type != ServerType::Standalone)
    }

    /// The maximum number of write models the server accepts in one batched write command,
    /// falling back to the documented server default when the greeting didn't report one.
    pub fn max_write_batch_size(&self) -> i64 {
        self.hello_result
            .max_write_batch_size
            .unwrap_or(DEFAULT_MAX_WRITE_BATCH_SIZE)
    }

    /// The maximum size, in bytes, of a single command document the server accepts, falling back
    /// to the documented server default when the greeting didn't report one.
    pub fn max_bson_object_size(&self) -> i64 {
        self.hello_result
            .max_bson_object_size
            .unwrap_or(DEFAULT_MAX_BSON_OBJECT_SIZE)
    }
}

/// Application metadata sent in the greeting's `client` sub-document.
#[derive(Clone, Debug, Default)]
pub struct HandshakeOptions {
    /// The application name reported to the server for diagnostics (`client.application.name`).
    pub app_name: Option<String>,
    /// Declared wire-protocol compressors this connection is willing to use. Actual compression
    /// is an external collaborator (SPEC §1); this list is advisory only.
    pub compressors: Vec<String>,
    /// Whether this connection is being established against a load balancer. If set and the
    /// reply lacks a `serviceId`, the handshake fails with a configuration error.
    pub load_balanced: bool,
    /// The declared server API version, if the caller pinned one.
    pub server_api_version: Option<String>,
    /// Whether mechanism negotiation hints (`saslSupportedMechs`) should be requested for `user`.
    pub negotiate_mechanisms_for: Option<String>,
}

fn client_metadata_doc(options: &HandshakeOptions) -> Document {
    let mut metadata = Document::new();
    if let Some(app_name) = &options.app_name {
        metadata.insert("application", doc! { "name": app_name.clone() });
    }
    metadata.insert(
        "driver",
        doc! {
            "name": "docustore-driver",
            "version": env!("CARGO_PKG_VERSION"),
        },
    );
    metadata.insert(
        "os",
        doc! {
            "type": std::env::consts::OS,
            "architecture": std::env::consts::ARCH,
        },
    );
    metadata
}

fn build_greeting(db: &str, options: &HandshakeOptions) -> Document {
    let mut body = doc! {
        "hello": 1,
        "client": client_metadata_doc(options),
        "compression": options.compressors.clone(),
    };
    if let Some(user) = &options.negotiate_mechanisms_for {
        body.insert(
            "saslSupportedMechs",
            format!("{}.{}", db, user),
        );
    }
    if options.load_balanced {
        body.insert("loadBalanced", true);
    }
    if let Some(ref version) = options.server_api_version {
        body.insert("apiVersion", version.clone());
    }
    body
}

/// Runs the handshake state machine (SPEC §4.2) against a connection, returning the final
/// [`ConnectionDescription`].
pub async fn handshake(
    conn: &mut dyn RawConnection,
    db: &str,
    local_connection_id: u32,
    options: &HandshakeOptions,
    authenticators: &[Box<dyn Authenticator>],
) -> Result<ConnectionDescription> {
    #[cfg(feature = "tracing-unstable")]
    trace!(db, local_connection_id, "sending greeting");

    let greeting = build_greeting(db, options);
    let reply_doc = conn.send_command(db, greeting).await?;
    let reply: HelloReply = bson::from_document(reply_doc)
        .map_err(|e| Error::invalid_response(format!("malformed hello reply: {e}")))?;

    #[cfg(feature = "tracing-unstable")]
    trace!(server_type = ?reply.server_type(), "greeting answered");

    if options.load_balanced && reply.service_id.is_none() {
        return Err(Error::configuration_error(
            "driver attempted to initialize in load balancing mode, but the server does not \
             support this mode"
                .to_string(),
        ));
    }

    let hello_result = HelloResult {
        server_type: reply.server_type(),
        max_wire_version: reply.max_wire_version,
        min_wire_version: reply.min_wire_version,
        logical_session_timeout: reply
            .logical_session_timeout_minutes
            .map(|m| Duration::from_secs(m * 60)),
        service_id: reply.service_id,
        connection_id: reply.connection_id,
        sasl_supported_mechs: reply.sasl_supported_mechs,
        max_write_batch_size: reply.max_write_batch_size,
        max_bson_object_size: reply.max_bson_object_size,
    };

    for authenticator in authenticators {
        #[cfg(feature = "tracing-unstable")]
        trace!(mechanism = authenticator.name(), "running authenticator");
        authenticator.authenticate(conn, &hello_result).await?;
    }

    let server_value = match hello_result.connection_id {
        Some(id) => Some(id),
        None => {
            #[cfg(feature = "tracing-unstable")]
            trace!("reconciling connection id via legacy fallback");
            reconcile_connection_id(conn, db).await
        }
    };

    #[cfg(feature = "tracing-unstable")]
    trace!(?server_value, "handshake complete");

    Ok(ConnectionDescription {
        connection_id: ConnectionId {
            local: local_connection_id,
            server_value,
        },
        hello_result,
    })
}

/// Best-effort legacy fallback to learn the server-assigned connection id when the greeting reply
/// didn't carry one. Failure here is swallowed (SPEC §4.2 step 4: non-fatal).
async fn reconcile_connection_id(conn: &mut dyn RawConnection, db: &str) -> Option<i64> {
    let reply = conn
        .send_command(db, doc! { "getLastError": 1 })
        .await
        .ok()?;
    reply.get_i64("connectionId").ok()
}
