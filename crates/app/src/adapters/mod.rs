pub mod git;
pub mod persistence;
pub mod sink;

pub use git::Git2Vcs;
pub use persistence::{FileConfigStore, MemoryStore};
pub use sink::StdoutSink;
