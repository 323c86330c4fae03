//! Scene

#[macro_use]
extern crate log;

mod loader;
mod scene;
mod sphere;
mod tracer;

// Re-export
pub use loader::*;
pub use scene::*;
pub use sphere::*;
pub use tracer::*;
