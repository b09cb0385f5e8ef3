//! Split of the output into blocks, one per grid cell.

mod partition;

pub use partition::*;
