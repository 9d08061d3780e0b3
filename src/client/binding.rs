//! Binding & Context (C4): scoped acquisition of a channel-source and channel for the duration of
//! an operation attempt, tied to a session.
//!
//! Transport, pooling, and topology monitoring are external collaborators (SPEC §1); this module
//! only models the capability-set abstraction the executor (C6) and command builder (C5) are
//! written against: a [`Binding`] hands out [`ChannelSource`]s, a `ChannelSource` leases
//! [`Channel`]s, and a [`RetryableReadContext`]/[`RetryableWriteContext`] scopes one of each for
//! the lifetime of an attempt.

use futures_core::future::BoxFuture;

use crate::{
    error::{Error, ErrorKind, Result},
    handshake::{ConnectionDescription, RawConnection},
    selection_criteria::SelectionCriteria,
    ClientSession,
};

/// A leased connection. Carries the negotiated [`ConnectionDescription`] for the server it is
/// connected to. Dropping a `Channel` is how it is released back to its pool; the pool itself is
/// an external collaborator this crate does not implement.
pub struct Channel {
    address: String,
    description: ConnectionDescription,
    conn: Box<dyn RawConnection>,
}

impl Channel {
    /// Constructs a channel from an already-established, already-handshaken connection.
    pub fn new(address: impl Into<String>, description: ConnectionDescription, conn: Box<dyn RawConnection>) -> Self {
        Self {
            address: address.into(),
            description,
            conn,
        }
    }

    /// The address of the server this channel is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The negotiated connection description for this channel.
    pub fn description(&self) -> &ConnectionDescription {
        &self.description
    }

    /// The underlying command round trip, for the command builder (C5) to drive.
    pub fn connection_mut(&mut self) -> &mut dyn RawConnection {
        &mut *self.conn
    }
}

/// A handle to a specific server plus a strategy for leasing [`Channel`]s from that server's pool.
/// Scoped to one operation or sub-operation; released on scope exit (i.e. when dropped).
pub trait ChannelSource: Send {
    /// Leases a channel from this source.
    fn acquire_channel(&mut self) -> BoxFuture<'_, Result<Channel>>;

    /// The address of the server this source leases channels from.
    fn address(&self) -> &str;
}

/// Capability-set abstraction over a cluster. A binding owns a session handle and, depending on
/// which of [`ReadWriteBinding`]'s methods it supports, can supply a read channel source, a write
/// channel source, or both.
pub trait Binding: Send {
    /// The session this binding operates under.
    fn session(&mut self) -> &mut ClientSession;
}

/// A [`Binding`] that can supply channel sources for both reads and writes.
pub trait ReadWriteBinding: Binding {
    /// Acquires a channel source appropriate for a read governed by `criteria`.
    fn read_channel_source<'a>(
        &'a mut self,
        criteria: Option<&'a SelectionCriteria>,
    ) -> BoxFuture<'a, Result<Box<dyn ChannelSource>>>;

    /// Acquires a channel source appropriate for a write.
    fn write_channel_source(&mut self) -> BoxFuture<'_, Result<Box<dyn ChannelSource>>>;
}

fn no_channel_error() -> Error {
    ErrorKind::Internal {
        message: "context has no acquired channel".to_string(),
    }
    .into()
}

/// Pairs a [`ReadWriteBinding`] with the currently-bound channel source and channel for a
/// retryable read attempt, plus the caller's retry-requested flag.
pub struct RetryableReadContext {
    binding: Box<dyn ReadWriteBinding>,
    channel_source: Option<Box<dyn ChannelSource>>,
    channel: Option<Channel>,
    retry_requested: bool,
}

impl RetryableReadContext {
    /// Acquires a read channel source, then a channel from it, binding both to a new context.
    /// Any already-acquired resource is released (by being dropped) if a later acquisition step
    /// fails.
    pub async fn new(
        mut binding: Box<dyn ReadWriteBinding>,
        criteria: Option<&SelectionCriteria>,
        retry_requested: bool,
    ) -> Result<Self> {
        let mut channel_source = binding.read_channel_source(criteria).await?;
        let channel = channel_source.acquire_channel().await?;
        Ok(Self {
            binding,
            channel_source: Some(channel_source),
            channel: Some(channel),
            retry_requested,
        })
    }

    /// The session this context's binding operates under.
    pub fn session(&mut self) -> &mut ClientSession {
        self.binding.session()
    }

    /// The currently-bound channel.
    pub fn channel(&mut self) -> Result<&mut Channel> {
        self.channel.as_mut().ok_or_else(no_channel_error)
    }

    /// Whether the caller asked for retry behavior on this context.
    pub fn retry_requested(&self) -> bool {
        self.retry_requested
    }

    /// Releases the current channel source (and, through it, the channel it leased) and installs
    /// `new` in its place.
    pub async fn replace_channel_source(&mut self) -> Result<()> {
        let mut new = self.binding.read_channel_source(None).await?;
        let channel = new.acquire_channel().await?;
        self.channel_source = Some(new);
        self.channel = Some(channel);
        Ok(())
    }

    /// Releases the prior channel and installs `new`.
    pub fn replace_channel(&mut self, new: Channel) {
        self.channel = Some(new);
    }

    /// Releases the channel then the channel source. Idempotent.
    pub fn dispose(&mut self) {
        self.channel = None;
        self.channel_source = None;
    }

    /// Takes ownership of this context's channel source, for handoff to a long-lived cursor that
    /// needs to keep issuing `getMore` against the same server after the originating command's
    /// attempt has finished.
    pub(crate) fn take_channel_source(&mut self) -> Option<Box<dyn ChannelSource>> {
        self.channel_source.take()
    }
}

/// Pairs a [`ReadWriteBinding`] with the currently-bound channel source and channel for a
/// retryable write attempt, plus the caller's retry-requested flag.
pub struct RetryableWriteContext {
    binding: Box<dyn ReadWriteBinding>,
    channel_source: Option<Box<dyn ChannelSource>>,
    channel: Option<Channel>,
    retry_requested: bool,
}

impl RetryableWriteContext {
    /// Acquires a write channel source, then a channel from it, binding both to a new context.
    pub async fn new(mut binding: Box<dyn ReadWriteBinding>, retry_requested: bool) -> Result<Self> {
        let mut channel_source = binding.write_channel_source().await?;
        let channel = channel_source.acquire_channel().await?;
        Ok(Self {
            binding,
            channel_source: Some(channel_source),
            channel: Some(channel),
            retry_requested,
        })
    }

    /// The session this context's binding operates under.
    pub fn session(&mut self) -> &mut ClientSession {
        self.binding.session()
    }

    /// The currently-bound channel.
    pub fn channel(&mut self) -> Result<&mut Channel> {
        self.channel.as_mut().ok_or_else(no_channel_error)
    }

    /// Whether the caller asked for retry behavior on this context.
    pub fn retry_requested(&self) -> bool {
        self.retry_requested
    }

    /// Re-acquires a write channel source (and a channel from it), replacing whatever this
    /// context currently holds. Used by the executor (C6) between attempt 1 and attempt 2.
    pub async fn replace_channel_source(&mut self) -> Result<()> {
        let mut new = self.binding.write_channel_source().await?;
        let channel = new.acquire_channel().await?;
        self.channel_source = Some(new);
        self.channel = Some(channel);
        Ok(())
    }

    /// Releases the prior channel and installs `new`.
    pub fn replace_channel(&mut self, new: Channel) {
        self.channel = Some(new);
    }

    /// Releases the channel then the channel source. Idempotent.
    pub fn dispose(&mut self) {
        self.channel = None;
        self.channel_source = None;
    }
}
