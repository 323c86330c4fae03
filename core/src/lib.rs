//! Core types shared by the ray computation service.

#[macro_use]
extern crate log;

// Re-export.
pub mod app;
pub mod codec;
pub mod color;
pub mod context;
pub mod error;
pub mod fileutil;
pub mod geometry;
pub mod ray;
pub mod rng;
pub mod sampling;
