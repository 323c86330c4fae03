//! Persistent daemon support: the persistence state machine, the spawning
//! supervisor and the socket protocol between clients and daemons.

#[macro_use]
extern crate log;

mod controller;
mod daemon;
mod framing;
mod signals;
mod state;

// Re-export
pub use controller::*;
pub use daemon::*;
pub use framing::*;
pub use signals::*;
pub use state::*;
