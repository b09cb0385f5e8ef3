use alloc::string::String;
use thiserror::Error;

/// Kernel launch errors.
#[derive(Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The given kernel can't be compiled.
    #[error("A compilation error happened during launch\nCaused by:\n  {reason}")]
    CompilationError {
        /// The cause of the compilation error.
        reason: String,
    },

    /// The kernel needs more resources than the device has.
    #[error("Too many resources were requested during launch\n{0}")]
    TooManyResources(#[from] ResourceLimitError),
}

/// Resource limit errors.
#[derive(Error, Clone, PartialEq, Eq)]
pub enum ResourceLimitError {
    /// Shared memory exceeds maximum.
    #[error(
        "Too much shared memory requested.\nRequested {requested} bytes, maximum {max} bytes available."
    )]
    SharedMemory {
        /// Value requested.
        requested: usize,
        /// Maximum value.
        max: usize,
    },

    /// Block size exceeds maximum.
    #[error("Block size too large.\nRequested {requested} threads, maximum {max} available.")]
    CubeDim {
        /// Value requested.
        requested: u32,
        /// Maximum value.
        max: u32,
    },
}

impl core::fmt::Debug for LaunchError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}

impl core::fmt::Debug for ResourceLimitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self}"))
    }
}

/// Error that can happen while executing a compiled kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The number of bound buffers doesn't match the kernel.
    #[error("Expected {expected} bindings, got {got}")]
    BindingCount {
        /// Bindings declared by the kernel.
        expected: usize,
        /// Bindings provided.
        got: usize,
    },

    /// A bound buffer doesn't match its declaration.
    #[error("Binding {slot} doesn't match its declaration\nCaused by:\n  {reason}")]
    BindingMismatch {
        /// Slot of the binding.
        slot: u32,
        /// What doesn't match.
        reason: String,
    },

    /// An index fell outside of its buffer.
    #[error("Index {index} is out of bounds for a buffer of {len} elements")]
    OutOfBounds {
        /// Flat element index.
        index: usize,
        /// Buffer length.
        len: usize,
    },

    /// A generic runtime error.
    #[error("An error happened during execution\nCaused by:\n  {reason}")]
    Generic {
        /// The details of the generic error.
        reason: String,
    },
}
