//! Role runners.
//!
//! Each role runs in its own task and owns exactly one transport handle:
//! a listener, a pending outgoing connection or an established stream.
//! The manager keeps a [RoleHandle] per running role in its slot table.
//! Dropping the handle cancels the runner, which then drops and thereby
//! closes its transport handle.

use std::{
    fmt,
    sync::{Arc, Weak},
};
use tokio::{
    io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf},
    select,
    sync::{oneshot, watch, Mutex},
};

use crate::{
    manager::{Accept, Inner},
    Error, ErrorKind, Listener, Peer, Security, Transport,
};

/// Identifies one runner over the lifetime of a manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot entry of a running role.
///
/// Drop to cancel the runner.
pub(crate) struct RoleHandle {
    id: RoleId,
    _cancel_tx: oneshot::Sender<()>,
}

impl RoleHandle {
    pub fn id(&self) -> RoleId {
        self.id
    }
}

impl fmt::Debug for RoleHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RoleHandle {{ {} }}", self.id)
    }
}

/// Shared write half of an established stream.
pub(crate) type Writer<S> = Arc<Mutex<WriteHalf<S>>>;

/// Slot entry of a running pump.
///
/// Drop to cancel the pump and abort all writes in progress.
/// The stream is closed once the pump has stopped and all aborted writes
/// have released it.
pub(crate) struct PumpHandle<S> {
    role: RoleHandle,
    writer: Writer<S>,
    closed_tx: watch::Sender<()>,
}

impl<S> PumpHandle<S> {
    pub fn id(&self) -> RoleId {
        self.role.id()
    }

    /// Write access to the stream for as long as the pump occupies its slot.
    pub fn writer(&self) -> PumpWriter<S> {
        PumpWriter { id: self.id(), writer: self.writer.clone(), closed_rx: self.closed_tx.subscribe() }
    }
}

/// Write access to the stream of a pump.
pub(crate) struct PumpWriter<S> {
    id: RoleId,
    writer: Writer<S>,
    closed_rx: watch::Receiver<()>,
}

impl<S: AsyncWrite> PumpWriter<S> {
    pub fn id(&self) -> RoleId {
        self.id
    }

    /// Writes and flushes all data.
    ///
    /// Returns `None` without waiting for the write if the pump is cancelled
    /// meanwhile.
    pub async fn write_all(self, data: &[u8]) -> Option<std::io::Result<()>> {
        let Self { writer, mut closed_rx, .. } = self;
        let write = async {
            let mut writer = writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await
        };

        select! {
            res = write => Some(res),
            _ = closed_rx.changed() => None,
        }
    }
}

/// Spawns a runner accepting connections on the listener until one is promoted.
pub(crate) fn spawn_listener<T: Transport>(
    inner: Weak<Inner<T>>, id: RoleId, security: Security, listener: T::Listener,
) -> RoleHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel();

    tokio::spawn(async move {
        log::trace!("Listener {} ({}) started", id, security);

        loop {
            let res = select! {
                res = listener.accept() => res,
                _ = &mut cancel_rx => {
                    log::trace!("Listener {} ({}) cancelled", id, security);
                    break;
                }
            };

            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => break,
            };

            match res {
                Ok((stream, peer)) => {
                    log::debug!("Listener {} ({}) accepted connection from {}", id, security, &peer);
                    match inner.accepted(security, id, stream, peer).await {
                        Accept::Promoted | Accept::Retired => break,
                        Accept::Rejected => continue,
                    }
                }
                Err(err) => {
                    inner.listen_ended(security, id, err).await;
                    break;
                }
            }
        }

        log::trace!("Listener {} ({}) terminated", id, security);
    });

    RoleHandle { id, _cancel_tx: cancel_tx }
}

/// Spawns a runner performing exactly one connection attempt.
pub(crate) fn spawn_connector<T: Transport>(
    inner: Weak<Inner<T>>, transport: Arc<T>, id: RoleId, peer: Peer, security: Security,
) -> RoleHandle {
    let (cancel_tx, mut cancel_rx) = oneshot::channel();

    tokio::spawn(async move {
        log::trace!("Connector {} to {} ({}) started", id, &peer, security);

        let res = select! {
            res = transport.connect(&peer, security) => res,
            _ = &mut cancel_rx => {
                log::trace!("Connector {} to {} cancelled", id, &peer);
                return;
            }
        };

        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => return,
        };

        match res {
            Ok(stream) => {
                if !inner.connected(id, stream, peer).await {
                    log::debug!("Connector {} was superseded, closed its connection", id);
                }
            }
            Err(err) => inner.connection_failed(id, err).await,
        }
    });

    RoleHandle { id, _cancel_tx: cancel_tx }
}

/// Spawns a runner reading from the established stream until it fails or ends.
pub(crate) fn spawn_pump<T: Transport>(
    inner: Weak<Inner<T>>, id: RoleId, stream: T::Stream, buffer_size: usize,
) -> PumpHandle<T::Stream> {
    let (mut reader, writer) = tokio::io::split(stream);
    let (cancel_tx, mut cancel_rx) = oneshot::channel();

    tokio::spawn(async move {
        log::trace!("Pump {} started", id);
        let mut buf = vec![0; buffer_size.max(1)];

        let reason = loop {
            let res = select! {
                res = reader.read(&mut buf) => res,
                _ = &mut cancel_rx => {
                    log::trace!("Pump {} cancelled", id);
                    return;
                }
            };

            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => return,
            };

            match res {
                Ok(0) => break Error::new(ErrorKind::ConnectionLost),
                Ok(n) => {
                    if !inner.data_received(id, buf[..n].to_vec()).await {
                        log::trace!("Pump {} was superseded", id);
                        return;
                    }
                }
                Err(err) => break Error::with_io(ErrorKind::ConnectionLost, &err),
            }
        };

        drop(reader);
        log::debug!("Pump {} stopped: {}", id, &reason);
        if let Some(inner) = inner.upgrade() {
            inner.connection_lost(id, reason).await;
        }
    });

    PumpHandle {
        role: RoleHandle { id, _cancel_tx: cancel_tx },
        writer: Arc::new(Mutex::new(writer)),
        closed_tx: watch::channel(()).0,
    }
}
