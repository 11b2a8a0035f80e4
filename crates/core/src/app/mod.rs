pub mod commands;
pub mod display;

pub use commands::*;
pub use display::*;
