//! gitwatch core - pure domain logic with no external dependencies
//!
//! This crate contains the domain types, commit formatting rules and the
//! ports (interfaces) the monitor talks to. It has no dependencies on Git
//! libraries, the filesystem or the async runtime - those are handled by
//! adapters and services in the `gitwatch` crate.

pub mod domain;
pub mod ports;
pub mod app;
pub mod error;
pub mod format;

// Re-exports for ergonomics
pub use domain::*;
pub use error::*;
