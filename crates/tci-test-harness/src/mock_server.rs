//! Mock TCI WebSocket server for end-to-end testing.
//!
//! [`MockTciServer`] listens on a random localhost port, accepts a single
//! WebSocket client and plays a script: frames to send, frames the client
//! must send, and an optional close. This exercises the real
//! `tokio-tungstenite` transport without an SDR application.
//!
//! # Example
//!
//! ```
//! use tci_test_harness::MockTciServer;
//!
//! # async fn example() -> tci_core::Result<()> {
//! let mut server = MockTciServer::new().await?;
//! server.send_text("DEVICE:SunSDR2PRO;");
//! server.send_text("READY;");
//! // When the client sends "VOLUME:-20;", echo the new value back.
//! server.respond("VOLUME:-20;", &["VOLUME:-20;"]);
//! server.start();
//!
//! let uri = server.uri();
//! // ... connect a Listener to `uri` and test ...
//! # Ok(())
//! # }
//! ```

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use tci_core::error::{Error, Result};
use tci_core::transport::Frame;

/// One scripted server action.
#[derive(Debug, Clone)]
enum Step {
    /// Send a frame to the client.
    Send(Frame),
    /// Read the next data frame from the client and require it to match.
    Expect(Frame),
    /// Close the WebSocket.
    Close,
}

/// A scripted TCI server on `127.0.0.1`.
///
/// Steps run in order once [`start`](MockTciServer::start) is called.
/// After the script, the server keeps reading until the client closes and
/// records any further frames it receives; [`wait`](MockTciServer::wait)
/// returns them.
pub struct MockTciServer {
    listener: Option<TcpListener>,
    uri: String,
    script: Vec<Step>,
    handle: Option<JoinHandle<std::result::Result<Vec<Frame>, String>>>,
}

impl MockTciServer {
    /// Bind a new server on a random port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCI server: {}", e)))?;
        let uri = format!("ws://{}", listener.local_addr().map_err(Error::Io)?);
        Ok(Self {
            listener: Some(listener),
            uri,
            script: Vec::new(),
            handle: None,
        })
    }

    /// The `ws://` URI clients should connect to.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn send_text(&mut self, text: &str) {
        self.script.push(Step::Send(Frame::from(text)));
    }

    pub fn send_binary(&mut self, data: Vec<u8>) {
        self.script.push(Step::Send(Frame::Binary(data)));
    }

    /// Require the client's next frame to be `text`.
    pub fn expect_text(&mut self, text: &str) {
        self.script.push(Step::Expect(Frame::from(text)));
    }

    /// Require `request` from the client, then send each of `responses`.
    pub fn respond(&mut self, request: &str, responses: &[&str]) {
        self.expect_text(request);
        for response in responses {
            self.send_text(response);
        }
    }

    /// Close the connection at this point of the script.
    pub fn close(&mut self) {
        self.script.push(Step::Close);
    }

    /// Start accepting. The script runs against the first client.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let script = std::mem::take(&mut self.script);
        self.handle = Some(tokio::spawn(run_script(listener, script)));
    }

    /// Wait for the session to end. Returns the frames the client sent
    /// after the script finished, or a description of the first mismatch.
    pub async fn wait(self) -> std::result::Result<Vec<Frame>, String> {
        match self.handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?,
            None => Ok(Vec::new()),
        }
    }
}

async fn run_script(listener: TcpListener, script: Vec<Step>) -> std::result::Result<Vec<Frame>, String> {
    let (stream, peer) = listener
        .accept()
        .await
        .map_err(|e| format!("failed to accept connection: {}", e))?;
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("WebSocket handshake with {} failed: {}", peer, e))?;
    tracing::debug!(peer = %peer, "Mock TCI server accepted client");

    for (i, step) in script.into_iter().enumerate() {
        match step {
            Step::Send(frame) => {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text.into()),
                    Frame::Binary(data) => Message::Binary(data.into()),
                };
                ws.send(message)
                    .await
                    .map_err(|e| format!("step {}: send error: {}", i, e))?;
            }
            Step::Expect(expected) => {
                let got = next_frame(&mut ws)
                    .await
                    .map_err(|e| format!("step {}: {}", i, e))?
                    .ok_or_else(|| format!("step {}: client closed, expected {:?}", i, expected))?;
                if got != expected {
                    return Err(format!(
                        "step {}: request mismatch: expected {:?}, got {:?}",
                        i, expected, got
                    ));
                }
            }
            Step::Close => {
                ws.close(None)
                    .await
                    .map_err(|e| format!("step {}: close error: {}", i, e))?;
                // Drain until the client acknowledges.
                while next_frame(&mut ws).await.ok().flatten().is_some() {}
                return Ok(Vec::new());
            }
        }
    }

    let mut rest = Vec::new();
    while let Some(frame) = next_frame(&mut ws).await? {
        rest.push(frame);
    }
    Ok(rest)
}

type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Next text or binary frame; `None` once the client has closed.
async fn next_frame(ws: &mut ServerStream) -> std::result::Result<Option<Frame>, String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(Frame::Text(text.to_string()))),
            Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::Binary(data.to_vec()))),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                use tokio_tungstenite::tungstenite::Error as WsError;
                return match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => Ok(None),
                    WsError::Io(io) if io.kind() != std::io::ErrorKind::Other => Ok(None),
                    other => Err(format!("read error: {}", other)),
                };
            }
        }
    }
}
