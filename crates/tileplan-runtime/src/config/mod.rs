/// Compilation config module.
pub mod compilation;
/// Plan construction config module.
pub mod plan;
/// Profiling config module.
pub mod profiling;

mod base;
mod logger;

pub use base::*;
pub use logger::*;
