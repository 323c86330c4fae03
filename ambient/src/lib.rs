//! Ambient Cache

#[macro_use]
extern crate log;

mod cache;
mod file;
mod record;

// Re-export
pub use cache::*;
pub use file::*;
pub use record::*;
