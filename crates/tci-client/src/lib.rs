//! Async client for the TCI transceiver-control protocol.
//!
//! TCI is spoken by ExpertSDR-based software-defined radios over a single
//! WebSocket: text frames carry `;`-terminated commands and notifications,
//! binary frames carry IQ and audio sample streams. This crate provides:
//!
//! - **Command registry** ([`commands`]) -- static metadata for every TCI
//!   command and the outbound `NAME:rx,channel,values;` builder.
//! - **Text codec** ([`codec`]) -- parsing of inbound notifications.
//! - **Packet codec** ([`packet`]) -- the 64-byte stream header plus
//!   sample payload.
//! - **Parameter store** ([`store`]) -- cached system, receiver and channel
//!   parameters.
//! - **Dispatch** ([`dispatch`]) -- parameter and data callbacks with
//!   wildcard registration.
//! - **Listener** ([`listener`]) -- the connection core: lifecycle,
//!   receive and send loops, cache queries.
//! - **ListenerBuilder** ([`builder`]) -- fluent construction and options.
//!
//! # Architecture
//!
//! The receive loop is the single writer of the [`ParameterStore`]. Every
//! notification updates the cache first and is then fanned out to
//! callbacks, each in its own task, and to [`TciEvent`] subscribers. Stream
//! packets bypass the cache. Outbound frames go through an unbounded FIFO
//! queue drained by the send loop. The two loops are cancelled together.
//!
//! # Example
//!
//! ```no_run
//! use tci_client::{Action, Listener, StreamType, data_fn};
//!
//! # async fn example() -> tci_core::Result<()> {
//! let listener = Listener::builder().uri("ws://localhost:40001").connect().await?;
//! listener.add_data_listener(
//!     StreamType::RxAudio,
//!     data_fn(|packet| async move {
//!         println!("{} samples", packet.length);
//!         Ok(())
//!     }),
//! );
//! listener
//!     .send_command("AUDIO_START", Action::Write, Some(0), None, &[])
//!     .await?;
//! listener.wait().await
//! # }
//! ```

pub mod builder;
pub mod codec;
pub mod commands;
pub mod dispatch;
pub mod events;
pub mod listener;
pub mod packet;
pub mod store;

pub use builder::{ListenerBuilder, ListenerOptions};
pub use commands::{Action, COMMANDS, CommandSpec, ParamCount, lookup};
pub use dispatch::{
    BoxError, CallbackResult, DataCallback, DataKey, DataListener, ParamCallback, ParamListener,
    data_fn, param_fn,
};
pub use events::{ConnectionState, ParamEvent, TciEvent};
pub use listener::Listener;
pub use packet::{DataPacket, SampleFormat, StreamType};
pub use store::ParameterStore;

pub use tci_core::{Error, ParamValue, Result, Value};
