//! WebSocket transport for TCI.
//!
//! TCI servers (ExpertSDR2/3 and compatible) accept plain `ws://`
//! connections, by default on port 40001. [`WsConnector`] implements the
//! [`Connector`] trait over `tokio-tungstenite`: each `connect()` performs the
//! WebSocket handshake and splits the stream into a [`WsReader`] and a
//! [`WsWriter`].
//!
//! # Example
//!
//! ```no_run
//! use tci_core::{Connector, Frame};
//! use tci_transport::WsConnector;
//!
//! # async fn example() -> tci_core::Result<()> {
//! let connector = WsConnector::new("ws://192.168.1.50:40001")?;
//! let mut connection = connector.connect().await?;
//!
//! connection.writer.send(Frame::from("DEVICE;")).await?;
//! while let Some(frame) = connection.reader.recv().await? {
//!     println!("{frame:?}");
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use tci_core::error::{Error, Result};
use tci_core::transport::{Connection, Connector, Frame, FrameReader, FrameWriter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a TCI server over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// Create a connector for a `ws://` URL.
    ///
    /// `wss://` is rejected: the transport is built without TLS support.
    ///
    /// No connection is made until [`Connector::connect`] is called.
    pub fn new(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| Error::InvalidParameter(format!("invalid TCI URI {uri:?}: {e}")))?;
        match url.scheme() {
            "ws" => {}
            "wss" => {
                return Err(Error::InvalidParameter(format!(
                    "TCI URI {uri:?} uses wss, but TLS is not supported; use ws"
                )));
            }
            other => {
                return Err(Error::InvalidParameter(format!(
                    "unsupported TCI URI scheme {other:?}, expected ws"
                )));
            }
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidParameter(format!("TCI URI {uri:?} has no host")));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection> {
        let addr = self.url.as_str();
        tracing::debug!(addr = %addr, "Connecting to TCI WebSocket endpoint");

        let (stream, response) = tokio_tungstenite::connect_async(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "WebSocket connection failed");
            map_connect_error(e, addr)
        })?;

        tracing::info!(addr = %addr, status = %response.status(), "WebSocket connection established");

        let (sink, stream) = stream.split();
        Ok(Connection {
            reader: Box::new(WsReader {
                stream,
                addr: addr.to_string(),
            }),
            writer: Box::new(WsWriter {
                sink: Some(sink),
                addr: addr.to_string(),
            }),
        })
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

/// Read half of a WebSocket connection.
pub struct WsReader {
    stream: SplitStream<WsStream>,
    addr: String,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn recv(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Frame::Text(text.to_string()))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::Binary(data.to_vec()))),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(addr = %self.addr, close = ?frame, "Peer sent WebSocket close");
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed))
                | None => return Ok(None),
                Some(Err(e)) => {
                    tracing::error!(addr = %self.addr, error = %e, "Failed to receive WebSocket frame");
                    return Err(map_ws_error(e));
                }
            }
        }
    }
}

/// Write half of a WebSocket connection.
pub struct WsWriter {
    /// `None` after `close()` is called.
    sink: Option<SplitSink<WsStream, Message>>,
    addr: String,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let sink = self.sink.as_mut().ok_or(Error::NotConnected)?;
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
        };
        sink.send(message).await.map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Failed to send WebSocket frame");
            map_ws_error(e)
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut sink) = self.sink.take() {
            tracing::debug!(addr = %self.addr, "Closing WebSocket connection");
            if let Err(e) = sink.close().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to close WebSocket cleanly (continuing anyway)"
                );
            }
        }
        Ok(())
    }
}

/// Map a handshake error to the appropriate [`Error`] variant.
fn map_connect_error(e: tungstenite::Error, addr: &str) -> Error {
    match e {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        tungstenite::Error::Io(io) => Error::Io(io),
        other => Error::Transport(format!("WebSocket handshake with {addr} failed: {other}")),
    }
}

/// Map a data-path error to the appropriate [`Error`] variant.
fn map_ws_error(e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => Error::ConnectionLost,
        tungstenite::Error::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
            _ => Error::Io(io),
        },
        tungstenite::Error::Protocol(p) => Error::Protocol(format!("WebSocket: {p}")),
        other => Error::Transport(other.to_string()),
    }
}
