//! tci-test-harness: test utilities and mock servers for the TCI client.
//!
//! This crate provides [`MockConnector`] for deterministic unit testing of
//! the listener without any network, and [`MockTciServer`] for end-to-end
//! tests over a real WebSocket on localhost.

pub mod mock_connector;
pub mod mock_server;

pub use mock_connector::{MockConnector, MockPeer};
pub use mock_server::MockTciServer;
