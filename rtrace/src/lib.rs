//! Streaming ray computation pipeline.

#[macro_use]
extern crate log;

mod output;
mod pool;
mod queue;
mod reader;
mod run;
mod session;
mod settings;
mod sink;
mod trace;

// Re-export
pub use output::*;
pub use pool::*;
pub use queue::*;
pub use reader::*;
pub use run::*;
pub use session::*;
pub use settings::*;
pub use sink::*;
pub use trace::*;
