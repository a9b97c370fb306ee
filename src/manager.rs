//! Connection manager.

use futures::Stream;
use std::{
    fmt,
    sync::{Arc, Weak},
};
use tokio::sync::Mutex;

use crate::{
    event::Dispatcher,
    role::{self, PumpHandle, RoleHandle, RoleId},
    Config, ConnectionEvent, ConnectionState, Error, ErrorKind, Peer, Security, Transport,
};

/// Result of handing an accepted connection to the manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Accept {
    /// The connection has been promoted; the listener is done.
    Promoted,
    /// The connection was closed; the listener should keep accepting.
    Rejected,
    /// The connection was closed; the listener has been superseded.
    Retired,
}

/// Connection state and slot table.
///
/// Every transition happens while this is locked.
struct Shared<S> {
    state: ConnectionState,
    peer: Option<Peer>,
    listen_secure: Option<RoleHandle>,
    listen_insecure: Option<RoleHandle>,
    connect: Option<RoleHandle>,
    pump: Option<PumpHandle<S>>,
    next_id: u64,
    events: Dispatcher,
}

impl<S> Shared<S> {
    fn next_id(&mut self) -> RoleId {
        self.next_id += 1;
        RoleId(self.next_id)
    }

    fn listen_slot(&mut self, security: Security) -> &mut Option<RoleHandle> {
        match security {
            Security::Secure => &mut self.listen_secure,
            Security::Insecure => &mut self.listen_insecure,
        }
    }

    fn is_listening(&self) -> bool {
        self.listen_secure.is_some() || self.listen_insecure.is_some()
    }

    fn set_state(&mut self, state: ConnectionState) {
        log::debug!("State {} -> {}", self.state, state);
        self.state = state;
        self.events.send(ConnectionEvent::StateChanged(state));
    }

    fn cancel_listeners(&mut self) {
        for security in [Security::Secure, Security::Insecure] {
            if let Some(listener) = self.listen_slot(security).take() {
                log::trace!("Cancelling listener {} ({})", listener.id(), security);
            }
        }
    }

    fn cancel_connector(&mut self) {
        if let Some(connector) = self.connect.take() {
            log::trace!("Cancelling connector {}", connector.id());
        }
    }

    fn cancel_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            log::trace!("Cancelling pump {}", pump.id());
        }
        self.peer = None;
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            peer: self.peer.clone(),
            listen_secure: self.listen_secure.is_some(),
            listen_insecure: self.listen_insecure.is_some(),
            connecting: self.connect.is_some(),
            pumping: self.pump.is_some(),
        }
    }
}

/// Manager state shared with the role runners.
pub(crate) struct Inner<T: Transport> {
    me: Weak<Self>,
    transport: Arc<T>,
    config: Config,
    shared: Mutex<Shared<T::Stream>>,
}

impl<T: Transport> Inner<T> {
    /// Cancels connector and pump and makes sure the configured listeners are running.
    fn start_locked(&self, shared: &mut Shared<T::Stream>) {
        shared.cancel_connector();
        shared.cancel_pump();

        for security in [Security::Secure, Security::Insecure] {
            if !self.config.listens(security) || shared.listen_slot(security).is_some() {
                continue;
            }

            match self.transport.listen(security) {
                Ok(listener) => {
                    let id = shared.next_id();
                    let handle = role::spawn_listener(self.me.clone(), id, security, listener);
                    *shared.listen_slot(security) = Some(handle);
                }
                Err(err) => {
                    log::error!("Cannot listen on {} link: {}", security, Error::with_io(ErrorKind::ListenFailed, &err))
                }
            }
        }

        if shared.is_listening() {
            shared.set_state(ConnectionState::Listening);
        } else {
            log::warn!("No listener is running");
            shared.set_state(ConnectionState::None);
        }
    }

    /// Installs a pump for the established stream, superseding all other roles.
    fn promote_locked(&self, shared: &mut Shared<T::Stream>, stream: T::Stream, peer: Peer) {
        shared.cancel_listeners();
        shared.cancel_connector();
        shared.cancel_pump();

        let id = shared.next_id();
        shared.pump = Some(role::spawn_pump(self.me.clone(), id, stream, self.config.read_buffer_size));
        shared.peer = Some(peer.clone());
        log::debug!("Connected to {} using pump {}", &peer, id);

        shared.events.send(ConnectionEvent::DeviceIdentified(peer));
        shared.set_state(ConnectionState::Connected);
    }

    /// An incoming connection was accepted by a listener.
    pub(crate) async fn accepted(&self, security: Security, id: RoleId, stream: T::Stream, peer: Peer) -> Accept {
        let mut shared = self.shared.lock().await;

        if shared.listen_slot(security).as_ref().map(|l| l.id()) != Some(id) {
            log::debug!("Closing connection from {} accepted by superseded listener {}", &peer, id);
            return Accept::Retired;
        }

        match shared.state {
            ConnectionState::Listening | ConnectionState::Connecting => {
                self.promote_locked(&mut shared, stream, peer);
                Accept::Promoted
            }
            ConnectionState::None => {
                log::debug!("Closing unwanted connection from {} while not ready", &peer);
                Accept::Rejected
            }
            ConnectionState::Connected => {
                log::debug!("Closing unwanted connection from {} while already connected", &peer);
                Accept::Retired
            }
        }
    }

    /// A listener stopped accepting because of an error.
    ///
    /// The listener is not restarted until [Manager::start] is called.
    pub(crate) async fn listen_ended(&self, security: Security, id: RoleId, err: std::io::Error) {
        let mut shared = self.shared.lock().await;

        let slot = shared.listen_slot(security);
        if slot.as_ref().map(|l| l.id()) != Some(id) {
            return;
        }
        *slot = None;
        log::warn!("Listener {} ({}) stopped: {}", id, security, Error::with_io(ErrorKind::AcceptFailed, &err));

        if !shared.is_listening() && shared.state == ConnectionState::Listening {
            log::warn!("No listener left, call start to resume listening");
        }
    }

    /// An outgoing connection attempt succeeded.
    ///
    /// Returns false and closes the stream if the connector has been superseded.
    pub(crate) async fn connected(&self, id: RoleId, stream: T::Stream, peer: Peer) -> bool {
        let mut shared = self.shared.lock().await;

        if shared.connect.as_ref().map(|c| c.id()) != Some(id) {
            return false;
        }

        self.promote_locked(&mut shared, stream, peer);
        true
    }

    /// An outgoing connection attempt failed.
    pub(crate) async fn connection_failed(&self, id: RoleId, err: std::io::Error) {
        let mut shared = self.shared.lock().await;

        if shared.connect.as_ref().map(|c| c.id()) != Some(id) {
            log::trace!("Ignoring failure of superseded connector {}: {}", id, &err);
            return;
        }
        shared.connect = None;

        let err = Error::with_io(ErrorKind::ConnectFailed, &err);
        log::warn!("Connector {} failed: {}", id, &err);
        shared.events.send(ConnectionEvent::ConnectionFailed(err));
        shared.set_state(ConnectionState::None);

        self.start_locked(&mut shared);
    }

    /// Data was read by a pump.
    ///
    /// Returns false if the pump has been superseded.
    pub(crate) async fn data_received(&self, id: RoleId, data: Vec<u8>) -> bool {
        let mut shared = self.shared.lock().await;

        if shared.pump.as_ref().map(|p| p.id()) != Some(id) {
            return false;
        }

        shared.events.send(ConnectionEvent::DataReceived(data));
        true
    }

    /// The established connection failed or was closed by the peer.
    pub(crate) async fn connection_lost(&self, id: RoleId, reason: Error) {
        let mut shared = self.shared.lock().await;

        if shared.pump.as_ref().map(|p| p.id()) != Some(id) {
            log::trace!("Ignoring loss of superseded pump {}", id);
            return;
        }
        shared.cancel_pump();

        log::warn!("Connection lost: {}", &reason);
        shared.events.send(ConnectionEvent::Disconnected(reason));
        shared.set_state(ConnectionState::None);

        self.start_locked(&mut shared);
    }
}

/// Read-only view of the manager's state and running roles.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Connected peer.
    pub peer: Option<Peer>,
    /// Whether the listener on the secure link is running.
    pub listen_secure: bool,
    /// Whether the listener on the insecure link is running.
    pub listen_insecure: bool,
    /// Whether an outgoing connection attempt is in progress.
    pub connecting: bool,
    /// Whether an established connection is being served.
    pub pumping: bool,
}

/// Manages the single connection to a remote peer.
///
/// Cloning yields another handle to the same manager.
/// When the last handle is dropped, all listeners, connection attempts
/// and the established connection are closed.
pub struct Manager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for Manager<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Transport> fmt::Debug for Manager<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Manager").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl<T: Transport> Manager<T> {
    /// Creates an idle connection manager using the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, Config::default())
    }

    /// Creates an idle connection manager.
    pub fn with_config(transport: T, config: Config) -> Self {
        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            transport: Arc::new(transport),
            config,
            shared: Mutex::new(Shared {
                state: ConnectionState::None,
                peer: None,
                listen_secure: None,
                listen_insecure: None,
                connect: None,
                pump: None,
                next_id: 0,
                events: Dispatcher::default(),
            }),
        });
        Self { inner }
    }

    /// Streams connection events.
    ///
    /// Only events occurring after this call are delivered.
    /// Events from the same connection arrive in order.
    pub async fn events(&self) -> impl Stream<Item = ConnectionEvent> + Unpin + Send {
        self.inner.shared.lock().await.events.subscribe()
    }

    /// Starts listening for incoming connections.
    ///
    /// Any outgoing connection attempt and any established connection are closed.
    /// Listeners that are already running are kept.
    pub async fn start(&self) {
        log::debug!("Start");
        let mut shared = self.inner.shared.lock().await;
        self.inner.start_locked(&mut shared);
    }

    /// Connects to the specified peer using a secure link.
    ///
    /// See [connect_with](Self::connect_with).
    pub async fn connect(&self, peer: impl Into<Peer>) {
        self.connect_with(peer, Security::Secure).await
    }

    /// Connects to the specified peer.
    ///
    /// Any outgoing connection attempt and any established connection are
    /// closed first. Listeners keep running, so that an incoming connection
    /// may still win over this attempt.
    ///
    /// A peer that cannot be connected to is ignored.
    pub async fn connect_with(&self, peer: impl Into<Peer>, security: Security) {
        let peer = peer.into();
        if !peer.is_connectable() {
            log::warn!("Not connecting to {}: {}", &peer, Error::new(ErrorKind::InvalidAddress(peer.address.to_string())));
            return;
        }

        log::debug!("Connect to {} ({})", &peer, security);
        let mut shared = self.inner.shared.lock().await;
        shared.cancel_connector();
        shared.cancel_pump();

        let id = shared.next_id();
        let handle = role::spawn_connector(self.inner.me.clone(), self.inner.transport.clone(), id, peer, security);
        shared.connect = Some(handle);
        shared.set_state(ConnectionState::Connecting);
    }

    /// Stops all listeners, connection attempts and the established connection.
    ///
    /// Listening is not resumed until [start](Self::start) is called.
    pub async fn stop(&self) {
        log::debug!("Stop");
        let mut shared = self.inner.shared.lock().await;
        shared.cancel_listeners();
        shared.cancel_connector();
        shared.cancel_pump();
        shared.set_state(ConnectionState::None);
    }

    /// Writes data to the connected peer.
    ///
    /// This does nothing unless connected.
    /// Data is not buffered across connections; a write racing a state change
    /// may be lost. The outcome is reported as a [DataSent](ConnectionEvent::DataSent)
    /// or [WriteFailed](ConnectionEvent::WriteFailed) event.
    ///
    /// If the connection is closed by [stop](Self::stop) or superseded while
    /// the write is in progress, the write is aborted and nothing is reported.
    pub async fn write(&self, data: impl Into<Vec<u8>>) {
        let writer = {
            let shared = self.inner.shared.lock().await;
            match (&shared.state, &shared.pump) {
                (ConnectionState::Connected, Some(pump)) => pump.writer(),
                _ => return,
            }
        };

        let id = writer.id();
        let data = data.into();
        let res = match writer.write_all(&data).await {
            Some(res) => res,
            None => {
                log::debug!("Write of {} bytes aborted, pump {} was cancelled", data.len(), id);
                return;
            }
        };

        let mut shared = self.inner.shared.lock().await;
        if shared.pump.as_ref().map(|p| p.id()) != Some(id) {
            log::debug!("Discarding write outcome of superseded pump {}", id);
            return;
        }

        let evt = match res {
            Ok(()) => ConnectionEvent::DataSent(data),
            Err(err) => {
                let err = Error::with_io(ErrorKind::WriteFailed, &err);
                log::warn!("{}", &err);
                ConnectionEvent::WriteFailed(err)
            }
        };
        shared.events.send(evt);
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.shared.lock().await.state
    }

    /// The connected peer.
    ///
    /// This is `None` unless connected.
    pub async fn peer(&self) -> Option<Peer> {
        self.inner.shared.lock().await.peer.clone()
    }

    /// Read-only view of the state and running roles.
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.shared.lock().await.snapshot()
    }
}
