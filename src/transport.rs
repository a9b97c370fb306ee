//! Transport abstraction consumed by the connection manager.

use futures::Future;
use std::io::Result;
use strum::{Display, EnumString};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::Peer;

/// Link security of a listening endpoint or an outgoing connection.
///
/// The manager keeps one listener per security kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Security {
    /// Authenticated and encrypted link.
    #[strum(serialize = "secure")]
    Secure,
    /// Link without authentication.
    #[strum(serialize = "insecure")]
    Insecure,
}

impl Default for Security {
    fn default() -> Self {
        Self::Secure
    }
}

/// A connection-oriented transport.
///
/// Dropping a listener or a stream closes it.
/// Closing must unblock any pending accept or read on it.
pub trait Transport: Send + Sync + 'static {
    /// Established duplex byte stream.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    /// Listening endpoint producing [Self::Stream]s.
    type Listener: Listener<Stream = Self::Stream>;

    /// Creates a listening endpoint for the specified security kind.
    ///
    /// This is called while the manager state is locked and thus must not block.
    fn listen(&self, security: Security) -> Result<Self::Listener>;

    /// Establishes a stream connection with the specified peer.
    ///
    /// No timeout is imposed by the manager.
    fn connect(&self, peer: &Peer, security: Security) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// A listening endpoint of a [Transport].
pub trait Listener: Send + Sync + 'static {
    /// Stream type of accepted connections.
    type Stream;

    /// Waits for and accepts one incoming connection.
    ///
    /// Returns the stream together with the identity of the remote peer.
    fn accept(&self) -> impl Future<Output = Result<(Self::Stream, Peer)>> + Send;
}
