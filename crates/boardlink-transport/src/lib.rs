//! Duplex byte transport abstraction for boardlink.
//!
//! The USB link to the board is an ordered, full-duplex byte pipe with no
//! message boundaries. This crate hides where that pipe comes from:
//! - a Unix domain socket exposed by a USB bridge (Linux/macOS)
//! - an in-memory pipe pair (tests and simulators)
//!
//! Everything above this layer only sees [`TransportStream`] and the
//! [`TransportEvent`]s produced by [`pump`].

pub mod error;
pub mod memory;
pub mod pump;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{memory_pair, MemoryStream};
pub use pump::{pump, TransportEvent};
pub use traits::TransportStream;
