//! Drive processes on an embedded board over a multiplexed USB link.
//!
//! One ordered byte pipe to the board carries any number of remote
//! processes, each with control, stdin, stdout and stderr channels.
//!
//! # Crate Structure
//!
//! - [`transport`]: the duplex byte pipe (USB bridge socket, in-memory pair)
//! - [`frame`]: 4-byte-header framing, command vocabulary, parser state machine
//! - [`mux`]: process ids, channel routing, flow control, threaded connection

/// Re-export transport types.
pub mod transport {
    pub use boardlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use boardlink_frame::*;
}

/// Re-export multiplexing types.
pub mod mux {
    pub use boardlink_mux::*;
}
