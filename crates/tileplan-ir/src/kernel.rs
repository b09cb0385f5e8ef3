use core::fmt::Display;

use alloc::string::String;
use alloc::vec::Vec;

use crate::{AddressSpace, BufferDesc, OpGraph};

/// Visibility of a global binding.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[allow(missing_docs)]
pub enum Visibility {
    Read,
    ReadWrite,
}

/// A global buffer the kernel expects at launch, in slot order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub desc: BufferDesc,
    pub visibility: Visibility,
}

/// Number of blocks launched along each grid axis.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CubeCount {
    pub x: u32,
    pub y: u32,
}

impl CubeCount {
    pub fn num_cubes(&self) -> u32 {
        self.x * self.y
    }
}

/// A verified graph ready to be compiled by a runtime.
#[derive(Debug, Clone)]
pub struct KernelDefinition {
    pub name: String,
    pub graph: OpGraph,
    /// Threads per block.
    pub cube_dim: u32,
    pub cube_count: CubeCount,
    pub bindings: Vec<Binding>,
}

impl KernelDefinition {
    /// Shared memory allocated by one block.
    pub fn shared_mem_bytes(&self) -> usize {
        self.graph
            .buffers(AddressSpace::Shared)
            .map(|(_, desc)| desc.size_bytes())
            .sum()
    }
}

impl Display for KernelDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "kernel {}", self.name)?;
        writeln!(
            f,
            "cube_dim: {}, cube_count: ({}, {}), shared_memory: {} bytes",
            self.cube_dim,
            self.cube_count.x,
            self.cube_count.y,
            self.shared_mem_bytes()
        )?;
        for binding in &self.bindings {
            writeln!(
                f,
                "binding({}) {}: {}{:?} {:?}",
                binding.desc.slot,
                binding.desc.name,
                binding.desc.elem,
                binding.desc.shape,
                binding.visibility
            )?;
        }
        write!(f, "{}", self.graph)
    }
}
