//! Connection state and events.

use futures::channel::mpsc;
use strum::{Display, EnumString};

use crate::{Error, Peer};

/// State of the connection manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, Display, EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Doing nothing.
    #[strum(serialize = "none")]
    None,
    /// Listening for incoming connections.
    #[strum(serialize = "listening")]
    Listening,
    /// Initiating an outgoing connection.
    #[strum(serialize = "connecting")]
    Connecting,
    /// Connected to a remote peer.
    #[strum(serialize = "connected")]
    Connected,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::None
    }
}

/// Connection event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// The remote peer of a newly established connection.
    ///
    /// Delivered right before [ConnectionState::Connected].
    DeviceIdentified(Peer),
    /// Data was received from the connected peer.
    DataReceived(Vec<u8>),
    /// Data was written to the connected peer.
    ///
    /// Only reported while the connection the data was written to is still established.
    DataSent(Vec<u8>),
    /// The established connection was lost.
    Disconnected(Error),
    /// The outgoing connection attempt failed.
    ConnectionFailed(Error),
    /// Writing to the connected peer failed.
    ///
    /// This does not change the connection state.
    WriteFailed(Error),
}

/// Event subscribers.
#[derive(Default)]
pub(crate) struct Dispatcher {
    subs: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl Dispatcher {
    /// Adds a subscriber receiving all subsequently sent events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.push(tx);
        rx
    }

    /// Sends the event to all subscribers, dropping those that went away.
    pub fn send(&mut self, evt: ConnectionEvent) {
        log::trace!("Event: {:?}", &evt);
        self.subs.retain(|tx| tx.unbounded_send(evt.clone()).is_ok());
    }
}
