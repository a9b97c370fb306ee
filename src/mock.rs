//! In-memory transport for tests.

use futures::{Future, Stream, StreamExt};
use std::{
    collections::{HashMap, HashSet},
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf},
    sync::{mpsc, oneshot, Mutex},
    time::{sleep, timeout},
};

use crate::{ConnectionEvent, ConnectionState, Listener, Peer, Security, Transport};

const BUFFER: usize = 64 * 1024;

/// Local end of an in-memory connection.
pub(crate) struct MockStream {
    inner: DuplexStream,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl AsyncRead for MockStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context, buf: &mut ReadBuf) -> Poll<io::Result<()>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "injected read failure")));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[derive(Default)]
struct MockState {
    incoming: HashMap<Security, mpsc::UnboundedSender<(MockStream, Peer)>>,
    fail_listen: HashSet<Security>,
    listen_calls: usize,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MockState {
    fn pair(&self) -> (MockStream, DuplexStream) {
        let (local, remote) = duplex(BUFFER);
        let stream =
            MockStream { inner: local, fail_reads: self.fail_reads.clone(), fail_writes: self.fail_writes.clone() };
        (stream, remote)
    }
}

/// Transport side handed to the manager.
pub(crate) struct MockTransport {
    state: Arc<StdMutex<MockState>>,
    connect_tx: mpsc::UnboundedSender<PendingConnect>,
}

/// Test side controlling the transport and acting as remote peers.
pub(crate) struct MockRemote {
    state: Arc<StdMutex<MockState>>,
    connect_rx: mpsc::UnboundedReceiver<PendingConnect>,
}

pub(crate) fn transport() -> (MockTransport, MockRemote) {
    let state = Arc::new(StdMutex::new(MockState::default()));
    let (connect_tx, connect_rx) = mpsc::unbounded_channel();
    (MockTransport { state: state.clone(), connect_tx }, MockRemote { state, connect_rx })
}

pub(crate) struct MockListener {
    rx: Mutex<mpsc::UnboundedReceiver<(MockStream, Peer)>>,
}

impl Listener for MockListener {
    type Stream = MockStream;

    fn accept(&self) -> impl Future<Output = io::Result<(MockStream, Peer)>> + Send {
        async move {
            self.rx
                .lock()
                .await
                .recv()
                .await
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "injected accept failure"))
        }
    }
}

impl Transport for MockTransport {
    type Stream = MockStream;
    type Listener = MockListener;

    fn listen(&self, security: Security) -> io::Result<MockListener> {
        let mut state = self.state.lock().unwrap();
        state.listen_calls += 1;
        if state.fail_listen.contains(&security) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "injected listen failure"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.incoming.insert(security, tx);
        Ok(MockListener { rx: Mutex::new(rx) })
    }

    fn connect(&self, peer: &Peer, security: Security) -> impl Future<Output = io::Result<MockStream>> + Send {
        let (tx, rx) = oneshot::channel();
        let pending = PendingConnect { peer: peer.clone(), security, tx, state: self.state.clone() };
        let sent = self.connect_tx.send(pending).is_ok();
        async move {
            if !sent {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "remote is gone"));
            }
            match rx.await {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(io::ErrorKind::ConnectionAborted, "connect abandoned")),
            }
        }
    }
}

/// Outgoing connection attempt waiting for the test to decide its outcome.
pub(crate) struct PendingConnect {
    pub peer: Peer,
    pub security: Security,
    tx: oneshot::Sender<io::Result<MockStream>>,
    state: Arc<StdMutex<MockState>>,
}

impl PendingConnect {
    /// Completes the attempt, returning the remote end if the connector still waits.
    pub fn succeed(self) -> Option<DuplexStream> {
        let (local, remote) = self.state.lock().unwrap().pair();
        self.tx.send(Ok(local)).ok().map(|_| remote)
    }

    /// Fails the attempt, returning whether the connector still waited.
    pub fn fail(self) -> bool {
        self.tx.send(Err(io::Error::new(io::ErrorKind::ConnectionRefused, "injected connect failure"))).is_ok()
    }

    /// Resolves once the connector gave up waiting.
    pub async fn cancelled(&mut self) {
        timeout(Duration::from_secs(5), self.tx.closed()).await.expect("connect attempt was not cancelled");
    }
}

impl MockRemote {
    /// Connects to the listener of the specified security kind.
    ///
    /// Returns the remote end, or `None` if nobody listens.
    pub fn incoming(&self, security: Security, peer: Peer) -> Option<DuplexStream> {
        let state = self.state.lock().unwrap();
        let tx = state.incoming.get(&security)?;
        let (local, remote) = state.pair();
        tx.send((local, peer)).ok().map(|_| remote)
    }

    pub fn is_listening(&self, security: Security) -> bool {
        let state = self.state.lock().unwrap();
        state.incoming.get(&security).map(|tx| !tx.is_closed()).unwrap_or_default()
    }

    pub fn listen_calls(&self) -> usize {
        self.state.lock().unwrap().listen_calls
    }

    pub fn fail_listen(&self, security: Security, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_listen.insert(security);
        } else {
            state.fail_listen.remove(&security);
        }
    }

    /// Makes the pending accept of the listener fail.
    pub fn fail_accept(&self, security: Security) {
        self.state.lock().unwrap().incoming.remove(&security);
    }

    /// Makes reads fail once the pending read is woken up.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn pair(&self) -> (MockStream, DuplexStream) {
        self.state.lock().unwrap().pair()
    }

    pub async fn next_connect(&mut self) -> PendingConnect {
        timeout(Duration::from_secs(5), self.connect_rx.recv())
            .await
            .expect("timed out waiting for connect attempt")
            .expect("transport dropped")
    }
}

pub(crate) fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn peer(name: &str, last: u8) -> Peer {
    Peer::new([0x00, 0x1a, 0x7d, 0xda, 0x71, last].into()).with_name(name)
}

pub(crate) async fn next_event(events: &mut (impl Stream<Item = ConnectionEvent> + Unpin)) -> ConnectionEvent {
    timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

pub(crate) async fn expect_state(events: &mut (impl Stream<Item = ConnectionEvent> + Unpin), state: ConnectionState) {
    assert_eq!(next_event(events).await, ConnectionEvent::StateChanged(state));
}

pub(crate) async fn assert_no_event(events: &mut (impl Stream<Item = ConnectionEvent> + Unpin)) {
    if let Ok(evt) = timeout(Duration::from_millis(200), events.next()).await {
        panic!("unexpected event {:?}", evt);
    }
}

/// Polls the condition until it holds.
pub(crate) async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not hold in time");
}
