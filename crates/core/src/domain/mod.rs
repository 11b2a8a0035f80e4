pub mod repo;
pub mod commit;
pub mod branches;

// Re-exports for convenience
pub use repo::*;
pub use commit::*;
pub use branches::*;
