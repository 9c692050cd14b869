//! In-memory connector for deterministic testing of the TCI client.
//!
//! [`MockConnector`] implements the [`Connector`] trait without any
//! network. Each `connect()` creates a fresh pair of frame channels; the
//! test drives the server side through the matching [`MockPeer`]: pushing
//! notifications and stream packets to the client, reading what the client
//! sent, closing the connection or making writes fail.
//!
//! # Example
//!
//! ```
//! use tci_core::{Connector, Frame};
//! use tci_test_harness::MockConnector;
//!
//! # async fn example() -> tci_core::Result<()> {
//! let (connector, peer) = MockConnector::pair();
//! // Frames pushed before connecting are delivered on connect.
//! peer.push_text("READY;");
//!
//! let mut connection = connector.connect().await?;
//! assert_eq!(connection.reader.recv().await?, Some(Frame::from("READY;")));
//!
//! connection.writer.send(Frame::from("VOLUME;")).await?;
//! assert_eq!(peer.next_sent().await, Some(Frame::from("VOLUME;")));
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use tci_core::error::{Error, Result};
use tci_core::transport::{Connection, Connector, Frame, FrameReader, FrameWriter};

/// How long [`MockPeer`] waits for client activity before giving up.
const PEER_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Accept,
    /// `connect()` never completes.
    Pending,
    /// `connect()` fails immediately.
    Refuse,
}

#[derive(Default)]
struct Link {
    /// Server-to-client sender of the current connection.
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    /// Client-to-server receiver of the current connection.
    from_client: Option<Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>>>,
    /// Frames pushed while no connection was open.
    backlog: Vec<Frame>,
}

#[derive(Default)]
struct PeerState {
    link: Mutex<Link>,
    connections: AtomicUsize,
    fail_writes: AtomicBool,
}

impl PeerState {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A mock [`Connector`] backed by in-memory channels.
pub struct MockConnector {
    mode: Mode,
    state: Arc<PeerState>,
}

impl MockConnector {
    /// A connector that accepts every `connect()`, plus the peer that
    /// plays the server side.
    pub fn pair() -> (MockConnector, MockPeer) {
        let state = Arc::new(PeerState::default());
        (
            MockConnector {
                mode: Mode::Accept,
                state: Arc::clone(&state),
            },
            MockPeer { state },
        )
    }

    /// A connector whose `connect()` never completes (an unreachable host).
    pub fn pending() -> MockConnector {
        MockConnector {
            mode: Mode::Pending,
            state: Arc::default(),
        }
    }

    /// A connector whose `connect()` is refused.
    pub fn refusing() -> MockConnector {
        MockConnector {
            mode: Mode::Refuse,
            state: Arc::default(),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection> {
        match self.mode {
            Mode::Pending => return std::future::pending().await,
            Mode::Refuse => return Err(Error::Transport("connection refused: mock".into())),
            Mode::Accept => {}
        }

        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        {
            let mut link = self.state.link();
            for frame in link.backlog.drain(..) {
                let _ = to_client_tx.send(frame);
            }
            link.to_client = Some(to_client_tx);
            link.from_client = Some(Arc::new(tokio::sync::Mutex::new(from_client_rx)));
        }
        self.state.connections.fetch_add(1, Ordering::SeqCst);

        Ok(Connection {
            reader: Box::new(MockReader { rx: to_client_rx }),
            writer: Box::new(MockWriter {
                tx: Some(from_client_tx),
                state: Arc::clone(&self.state),
            }),
        })
    }

    fn endpoint(&self) -> String {
        "mock://tci".to_string()
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl FrameReader for MockReader {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        Ok(self.rx.recv().await)
    }
}

struct MockWriter {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    state: Arc<PeerState>,
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock write failure".into()));
        }
        let tx = self.tx.as_ref().ok_or(Error::NotConnected)?;
        tx.send(frame).map_err(|_| Error::ConnectionLost)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Server side of a [`MockConnector`].
pub struct MockPeer {
    state: Arc<PeerState>,
}

impl MockPeer {
    /// Send a frame to the client. Before the first connection (or after
    /// [`close`](Self::close)) frames are held until the next connect.
    pub fn push(&self, frame: Frame) {
        let mut link = self.state.link();
        match &link.to_client {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => link.backlog.push(frame),
        }
    }

    pub fn push_text(&self, text: &str) {
        self.push(Frame::from(text));
    }

    pub fn push_binary(&self, data: Vec<u8>) {
        self.push(Frame::Binary(data));
    }

    /// Next frame the client sent, or `None` if nothing arrives in time
    /// or the client closed the connection.
    pub async fn next_sent(&self) -> Option<Frame> {
        let rx = self.state.link().from_client.clone()?;
        let mut rx = rx.lock().await;
        tokio::time::timeout(PEER_TIMEOUT, rx.recv()).await.ok().flatten()
    }

    /// Wait for the client to close the current connection, discarding
    /// any frames it still sends. Returns `false` on timeout.
    pub async fn closed(&self) -> bool {
        let Some(rx) = self.state.link().from_client.clone() else {
            return false;
        };
        let mut rx = rx.lock().await;
        tokio::time::timeout(PEER_TIMEOUT, async { while rx.recv().await.is_some() {} })
            .await
            .is_ok()
    }

    /// Close the connection from the server side. The client's reader
    /// reports end of stream.
    pub fn close(&self) {
        self.state.link().to_client = None;
    }

    /// Make every subsequent client write fail.
    pub fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Number of successful `connect()` calls so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backlog_delivered_on_connect() {
        let (connector, peer) = MockConnector::pair();
        peer.push_text("PROTOCOL:ExpertSDR3,2.0;");
        peer.push_text("READY;");

        let mut conn = connector.connect().await.unwrap();
        assert_eq!(
            conn.reader.recv().await.unwrap(),
            Some(Frame::from("PROTOCOL:ExpertSDR3,2.0;"))
        );
        assert_eq!(conn.reader.recv().await.unwrap(), Some(Frame::from("READY;")));
        assert_eq!(peer.connections(), 1);
    }

    #[tokio::test]
    async fn client_frames_reach_peer() {
        let (connector, peer) = MockConnector::pair();
        let mut conn = connector.connect().await.unwrap();
        conn.writer.send(Frame::from("VOLUME;")).await.unwrap();
        conn.writer.send(Frame::Binary(vec![7; 64])).await.unwrap();
        assert_eq!(peer.next_sent().await, Some(Frame::from("VOLUME;")));
        assert_eq!(peer.next_sent().await, Some(Frame::Binary(vec![7; 64])));
    }

    #[tokio::test]
    async fn peer_close_ends_reader() {
        let (connector, peer) = MockConnector::pair();
        let mut conn = connector.connect().await.unwrap();
        peer.push_text("MUTE:false;");
        peer.close();
        assert_eq!(conn.reader.recv().await.unwrap(), Some(Frame::from("MUTE:false;")));
        assert_eq!(conn.reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_close_is_observed() {
        let (connector, peer) = MockConnector::pair();
        let mut conn = connector.connect().await.unwrap();
        conn.writer.close().await.unwrap();
        assert!(peer.closed().await);
        assert!(matches!(
            conn.writer.send(Frame::from("X;")).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn failing_writes() {
        let (connector, peer) = MockConnector::pair();
        let mut conn = connector.connect().await.unwrap();
        peer.fail_writes();
        assert!(matches!(
            conn.writer.send(Frame::from("X;")).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn pending_and_refusing() {
        let pending = MockConnector::pending();
        assert!(
            tokio::time::timeout(Duration::from_millis(10), pending.connect())
                .await
                .is_err()
        );
        assert!(matches!(
            MockConnector::refusing().connect().await,
            Err(Error::Transport(_))
        ));
    }
}
