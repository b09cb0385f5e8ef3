#![cfg_attr(not(feature = "std"), no_std)]

//! Operation graph of tiled tensor-core kernels.
//!
//! A graph is built append-only: buffers in one of three address spaces, ranges opened and
//! closed around their bodies, loads and stores with symbolic indices, tensor-core
//! instructions, barriers and explicit ordering edges. [verify] checks that every read observes
//! the writes it depends on before the graph is handed to a runtime.

extern crate alloc;

#[macro_use]
extern crate derive_new;

mod display;
mod elem;
mod error;
mod expr;
mod graph;
mod kernel;
mod mma;
mod operation;
mod range;
mod verify;

/// Register layouts of the tensor-core instructions.
pub mod layouts;

pub use elem::*;
pub use error::*;
pub use expr::*;
pub use graph::*;
pub use kernel::*;
pub use mma::*;
pub use operation::*;
pub use range::*;
pub use verify::*;
