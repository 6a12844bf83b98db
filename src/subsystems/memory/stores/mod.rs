//! Memory store implementations.

pub mod tmp;
pub mod transcript;
