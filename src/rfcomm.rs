//! Bluetooth RFCOMM transport.
//!
//! Uses the RFCOMM sockets provided by [BlueR](bluer) to listen on and
//! connect to fixed channel numbers.
//! No SDP service record is registered; the remote peer must know the
//! channel numbers.

use futures::Future;
use std::io::Result;

use bluer::rfcomm::{
    Listener as SocketListener, Security as SocketSecurity, SecurityLevel, Socket, SocketAddr, Stream,
};

use crate::{Address, Listener, Peer, Security, Transport};

/// RFCOMM transport configuration.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RfcommConfig {
    /// Local adapter address.
    ///
    /// Specify [Address::any] to use any local adapter.
    pub local: Address,
    /// Channel used for secure links, both locally and on the remote peer.
    pub secure_channel: u8,
    /// Channel used for insecure links, both locally and on the remote peer.
    pub insecure_channel: u8,
    /// Maximum number of pending incoming connections queued by the operating system.
    pub backlog: u32,
    #[doc(hidden)]
    #[cfg_attr(feature = "serde", serde(skip))]
    pub _non_exhaustive: (),
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self { local: Address::any(), secure_channel: 1, insecure_channel: 2, backlog: 1, _non_exhaustive: () }
    }
}

impl RfcommConfig {
    fn channel(&self, security: Security) -> u8 {
        match security {
            Security::Secure => self.secure_channel,
            Security::Insecure => self.insecure_channel,
        }
    }
}

fn socket_security(security: Security) -> SocketSecurity {
    let level = match security {
        Security::Secure => SecurityLevel::Medium,
        Security::Insecure => SecurityLevel::Low,
    };
    SocketSecurity { level, key_size: 0 }
}

fn socket(security: Security) -> Result<Socket> {
    let socket = Socket::new()?;
    socket.set_security(socket_security(security))?;
    Ok(socket)
}

/// Bluetooth RFCOMM transport.
///
/// Must be used from within a Tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct RfcommTransport {
    config: RfcommConfig,
}

impl RfcommTransport {
    /// Creates a new RFCOMM transport.
    pub fn new(config: RfcommConfig) -> Self {
        Self { config }
    }

    /// Transport configuration.
    pub fn config(&self) -> &RfcommConfig {
        &self.config
    }
}

impl Transport for RfcommTransport {
    type Stream = Stream;
    type Listener = RfcommListener;

    fn listen(&self, security: Security) -> Result<RfcommListener> {
        let sa = SocketAddr::new(self.config.local.into(), self.config.channel(security));
        let socket = socket(security)?;
        socket.bind(sa)?;
        let listener = socket.listen(self.config.backlog)?;
        log::debug!("Listening on {} ({})", &sa, security);
        Ok(RfcommListener { listener })
    }

    fn connect(&self, peer: &Peer, security: Security) -> impl Future<Output = Result<Stream>> + Send {
        let local = SocketAddr::new(self.config.local.into(), 0);
        let sa = SocketAddr::new(peer.address.into(), self.config.channel(security));
        async move {
            let socket = socket(security)?;
            socket.bind(local)?;
            log::debug!("Connecting to {} ({})", &sa, security);
            socket.connect(sa).await
        }
    }
}

/// Listening RFCOMM socket.
#[derive(Debug)]
pub struct RfcommListener {
    listener: SocketListener,
}

impl Listener for RfcommListener {
    type Stream = Stream;

    fn accept(&self) -> impl Future<Output = Result<(Stream, Peer)>> + Send {
        async move {
            let (stream, sa) = self.listener.accept().await?;
            Ok((stream, Peer::new(sa.addr.into())))
        }
    }
}
