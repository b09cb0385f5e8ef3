//! Plans of tiled tensor-core matrix multiplications.
//!
//! A [TilingParams](components::TilingParams) is validated into an immutable
//! [TilingConfig](components::TilingConfig), then a [plan](components::build_plan) is emitted as
//! an operation graph: blocks stage their K-slices of both inputs into shared memory, warps
//! gather tensor-core fragments from it, accumulate in registers and write the result back.

#[macro_use]
extern crate derive_new;

/// Components of the plan.
pub mod components;

mod base;

pub use base::*;
