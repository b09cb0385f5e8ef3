//! Reference runtime interpreting tileplan kernels on the host.
//!
//! Every block is executed in SIMT lockstep, tensor-core instructions are emulated through the
//! register layout the device declares, and every value is rounded to its element type, so a plan
//! that runs correctly here follows the ordering and layout contracts a real device relies on.

#[macro_use]
extern crate derive_new;

mod compiler;
mod compute;
mod reference;
mod runtime;

pub use compiler::CpuKernel;
pub use reference::*;
pub use runtime::*;
