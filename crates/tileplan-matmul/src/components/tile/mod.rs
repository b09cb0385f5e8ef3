//! Tensor-core tiles: register fragments and the layouts they follow.

mod fragment;

pub use fragment::*;
