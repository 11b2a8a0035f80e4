//! gitwatch application library
//!
//! Adapters binding the core ports to git2, TOML files and stdout, the
//! services that poll repositories and announce new commits, and the
//! command line front end.

pub mod adapters;
pub mod cli;
pub mod services;
