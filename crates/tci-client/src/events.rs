//! Connection state and event types.
//!
//! Every processed frame is delivered to registered callbacks (see
//! [`dispatch`](crate::dispatch)). The same traffic, plus lifecycle changes,
//! is also published as [`TciEvent`]s on a [`tokio::sync::broadcast`]
//! channel for consumers that prefer a stream. The broadcast is
//! best-effort: slow subscribers may lag and miss events, while callbacks
//! see every frame.

use std::fmt;

use serde::Serialize;

use tci_core::ParamValue;

use crate::packet::StreamType;

/// Lifecycle of a [`Listener`](crate::listener::Listener) connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    /// Constructed, `start()` not called yet.
    Idle,
    /// Transport handshake in progress.
    Connecting,
    /// Connected, waiting for `READY`.
    AwaitingReady,
    /// Initial state received.
    Ready,
    /// Shut down or failed. `start()` may be called again.
    Closed,
}

impl ConnectionState {
    /// Whether the receive and send loops are running.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::AwaitingReady | ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingReady => "awaiting ready",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A parameter notification as delivered to parameter listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamEvent {
    /// Canonical command name.
    pub name: &'static str,
    pub rx: Option<u32>,
    pub sub_rx: Option<u32>,
    /// Absent for zero-value commands, a scalar for one value, a list
    /// otherwise.
    pub value: Option<ParamValue>,
}

impl fmt::Display for ParamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        if let Some(rx) = self.rx {
            write!(f, " rx={rx}")?;
        }
        if let Some(sub_rx) = self.sub_rx {
            write!(f, " ch={sub_rx}")?;
        }
        if let Some(value) = &self.value {
            write!(f, " = {value}")?;
        }
        Ok(())
    }
}

/// An event published on the listener's broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TciEvent {
    /// Transport handshake completed.
    Connected,
    /// `READY` observed; the cache holds the server's initial state.
    Ready,
    /// A parameter notification was processed.
    Param(ParamEvent),
    /// A binary stream packet was received.
    Data {
        rx: u32,
        stream_type: StreamType,
        sample_rate: u32,
        /// Declared sample count.
        length: u32,
    },
    /// A listener callback returned an error or panicked.
    CallbackFailed {
        /// Key the callback was registered under.
        listener: String,
        message: String,
    },
    /// The connection terminated. `error` is the rendered terminal error,
    /// absent after a local `shutdown()`.
    Disconnected { error: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tci_core::Value;

    #[test]
    fn connected_states() {
        assert!(!ConnectionState::Idle.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::AwaitingReady.is_connected());
        assert!(ConnectionState::Ready.is_connected());
        assert!(!ConnectionState::Closed.is_connected());
        assert_eq!(ConnectionState::AwaitingReady.to_string(), "awaiting ready");
    }

    #[test]
    fn param_event_display() {
        let event = ParamEvent {
            name: "VFO",
            rx: Some(0),
            sub_rx: Some(1),
            value: Some(ParamValue::Scalar(Value::Int(7_074_000))),
        };
        assert_eq!(event.to_string(), "VFO rx=0 ch=1 = 7074000");

        let ready = ParamEvent {
            name: "READY",
            rx: None,
            sub_rx: None,
            value: None,
        };
        assert_eq!(ready.to_string(), "READY");
    }

    #[test]
    fn param_event_serializes() {
        let event = ParamEvent {
            name: "VFO_LIMITS",
            rx: None,
            sub_rx: None,
            value: Some(ParamValue::List(vec![Value::Int(10_000), Value::Int(30_000_000)])),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "VFO_LIMITS");
        assert_eq!(json["rx"], serde_json::Value::Null);
        assert_eq!(json["value"], serde_json::json!([10000, 30000000]));
    }
}
