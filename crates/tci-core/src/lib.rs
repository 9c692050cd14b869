//! tci-core: Core types, errors and transport traits for the TCI client.
//!
//! This crate defines the pieces shared by every other crate in the
//! workspace: the error type, the typed wire [`Value`] with its [`coerce`]
//! rule, and the frame transport abstraction the client's receive and send
//! loops run on.
//!
//! # Key types
//!
//! - [`Value`] / [`ParamValue`] -- coerced wire values
//! - [`Frame`] -- one text or binary message
//! - [`Connector`], [`FrameReader`], [`FrameWriter`] -- transport seams
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;
pub mod value;

pub use error::{Error, Result};
pub use transport::{Connection, Connector, Frame, FrameReader, FrameWriter};
pub use value::{ParamValue, Value, coerce};
