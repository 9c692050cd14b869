//! Frame transport traits for TCI communication.
//!
//! TCI runs over a single persistent message-oriented duplex connection
//! (a WebSocket in practice). Each message is either a text frame carrying
//! one `;`-terminated command or a binary frame carrying one sample-stream
//! packet. These traits abstract that connection so the client's receive
//! and send loops can run against a real socket or against the in-memory
//! mock from the `tci-test-harness` crate.
//!
//! A [`Connector`] performs the transport handshake and hands back a
//! [`Connection`] already split into a reader half and a writer half, so
//! the receive loop and the send loop can each own one.

use async_trait::async_trait;

use crate::error::Result;

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text control frame, e.g. `VFO:0,0,14200000;`.
    Text(String),
    /// A binary sample-stream frame (64-byte header plus payload).
    Binary(Vec<u8>),
}

impl Frame {
    /// Whether this is a text frame.
    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }

    /// Size of the frame body in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    /// Whether the frame body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::Text(s)
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(b: Vec<u8>) -> Self {
        Frame::Binary(b)
    }
}

/// Read half of an established connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    /// Control traffic of the underlying transport (pings, pongs) is
    /// handled internally and never surfaces here.
    async fn recv(&mut self) -> Result<Option<Frame>>;
}

/// Write half of an established connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame. Returns once the transport has accepted it.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Close the connection. Later `send()` calls should fail with
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;
}

/// An established connection, split into independently owned halves.
pub struct Connection {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
}

/// Establishes connections to a TCI endpoint.
///
/// Implementations perform the complete transport handshake in
/// [`connect`](Connector::connect); the returned connection is ready for
/// frame traffic.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Connection>;

    /// Human-readable endpoint description for logging.
    fn endpoint(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_conversions() {
        assert_eq!(Frame::from("READY;"), Frame::Text("READY;".into()));
        assert_eq!(Frame::from(vec![1u8, 2]), Frame::Binary(vec![1, 2]));
        assert!(Frame::from(String::from("x")).is_text());
    }

    #[test]
    fn frame_len() {
        assert_eq!(Frame::Text("VOLUME;".into()).len(), 7);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }
}
