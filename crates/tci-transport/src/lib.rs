//! Transport implementations for the TCI client.
//!
//! This crate provides the concrete [`Connector`](tci_core::Connector) for
//! real TCI servers:
//!
//! - [`WsConnector`]: WebSocket (`ws://`) connections via
//!   `tokio-tungstenite`, split into [`WsReader`] and [`WsWriter`] halves
//!
//! # Example
//!
//! ```no_run
//! use tci_core::Connector;
//! use tci_transport::WsConnector;
//!
//! # async fn example() -> tci_core::Result<()> {
//! let connector = WsConnector::new("ws://localhost:40001")?;
//! let connection = connector.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod websocket;

pub use websocket::{WsConnector, WsReader, WsWriter};
