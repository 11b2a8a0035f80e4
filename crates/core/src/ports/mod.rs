pub mod vcs;
pub mod persistence;
pub mod sink;

// Re-exports
pub use vcs::*;
pub use persistence::*;
pub use sink::*;
