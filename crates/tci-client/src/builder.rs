//! ListenerBuilder -- fluent builder for constructing [`Listener`] instances.
//!
//! Separates configuration from construction so callers can pick the
//! endpoint, timeouts and callback-error policy before connecting.
//!
//! # Example
//!
//! ```no_run
//! use tci_client::Listener;
//!
//! # async fn example() -> tci_core::Result<()> {
//! let listener = Listener::builder()
//!     .uri("ws://192.168.1.50:40001")
//!     .connect()
//!     .await?;
//! println!("{:?}", listener.get("DEVICE", None, None).await?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tci_core::{Connector, Result};
use tci_transport::WsConnector;

use crate::listener::Listener;

/// Default TCI server address (ExpertSDR listens on port 40001).
pub const DEFAULT_URI: &str = "ws://localhost:40001";

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for the `READY` notification.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default broadcast capacity for [`TciEvent`](crate::events::TciEvent) subscribers.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Behavior settings of a [`Listener`].
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Used by [`ListenerBuilder::connect`] for `start()`.
    pub connect_timeout: Duration,
    /// Used by [`ListenerBuilder::connect`] for `ready()`.
    pub ready_timeout: Duration,
    pub event_channel_capacity: usize,
    /// Tear the connection down when a callback fails, making `wait()`
    /// return [`Error::Callback`](tci_core::Error::Callback).
    pub abort_on_callback_error: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            abort_on_callback_error: false,
        }
    }
}

/// Fluent builder for [`Listener`].
pub struct ListenerBuilder {
    uri: String,
    connector: Option<Arc<dyn Connector>>,
    options: ListenerOptions,
}

impl ListenerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        ListenerBuilder {
            uri: DEFAULT_URI.to_string(),
            connector: None,
            options: ListenerOptions::default(),
        }
    }

    /// Set the server address (default: `ws://localhost:40001`).
    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = uri.to_string();
        self
    }

    /// Use a custom connector instead of a WebSocket to [`uri`](Self::uri).
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the handshake timeout used by [`connect`](Self::connect) (default: 3s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Set the `READY` timeout used by [`connect`](Self::connect) (default: 3s).
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.options.ready_timeout = timeout;
        self
    }

    /// Set the event broadcast capacity (default: 256).
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.event_channel_capacity = capacity;
        self
    }

    /// Abort the connection when a callback fails (default: false).
    pub fn abort_on_callback_error(mut self, enable: bool) -> Self {
        self.options.abort_on_callback_error = enable;
        self
    }

    /// Build an idle [`Listener`].
    ///
    /// Fails with `InvalidParameter` if no connector was given and the URI
    /// is not a `ws://` URL.
    pub fn build(self) -> Result<Listener> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new(&self.uri)?),
        };
        Ok(Listener::with_connector(connector, self.options))
    }

    /// Build, start and wait for `READY` using the configured timeouts.
    pub async fn connect(self) -> Result<Listener> {
        let listener = self.build()?;
        let options = listener.options().clone();
        listener.start(options.connect_timeout).await?;
        listener.ready(options.ready_timeout).await?;
        Ok(listener)
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
