//! Boundary between kernel plans and the devices executing them.
//!
//! A [Runtime] advertises its [DeviceProperties], compiles [kernel
//! definitions](tileplan_ir::KernelDefinition) and executes them on [TensorData] bindings.
//! Global settings and debug logging live in [config].

extern crate alloc;

#[macro_use]
extern crate derive_new;

/// Global configuration and logging.
pub mod config;

mod correctness;
mod error;
mod properties;
mod runtime;
mod tensor;

pub use correctness::*;
pub use error::*;
pub use properties::*;
pub use runtime::*;
pub use tensor::*;
