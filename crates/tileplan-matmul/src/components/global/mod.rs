//! Block-level movement between global memory and the block.

mod epilogue;
mod stager;

pub use epilogue::*;
pub use stager::*;
