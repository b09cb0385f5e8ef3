use core::fmt::Display;

use alloc::string::String;
use alloc::vec::Vec;
use smallvec::SmallVec;

use crate::{Elem, Expr, MmaDefinition, RangeId};

pub use petgraph::graph::NodeIndex as NodeId;

/// Memory tier a buffer or value lives in.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Device memory visible to every block.
    Global,
    /// Scratch memory private to a block, shared by its threads.
    Shared,
    /// Registers private to one thread.
    Register,
}

impl Display for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AddressSpace::Global => f.write_str("global"),
            AddressSpace::Shared => f.write_str("shared"),
            AddressSpace::Register => f.write_str("reg"),
        }
    }
}

/// A statically sized, row-major buffer.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub name: String,
    /// Binding position for global buffers, allocation slot otherwise.
    pub slot: u32,
    pub space: AddressSpace,
    pub shape: Vec<u32>,
    pub elem: Elem,
}

impl BufferDesc {
    pub fn len(&self) -> usize {
        self.shape.iter().map(|dim| *dim as usize).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.elem.size()
    }
}

/// Everything a node can do.
///
/// Data operands are stored in [`Node::inputs`] in the order documented on each variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Declares a buffer. No inputs.
    Buffer(BufferDesc),
    /// Opens a range. No inputs.
    Range(RangeId),
    /// Closes a range. Ordered after the tail of its body.
    End(RangeId),
    /// A literal value.
    Const(f64),
    /// Reads `buffer[index]`. Inputs: `[buffer]`.
    Load { index: Expr },
    /// Writes `buffer[index] = value`. Inputs: `[buffer, value]`.
    Store { index: Expr },
    /// Converts a value to the node element type. Inputs: `[value]`.
    Cast,
    /// Tensor-core multiply-accumulate over one plane.
    /// Inputs: the A fragment, then the B fragment, then the accumulator fragment.
    Mma(MmaDefinition),
    /// Takes one element out of a vector value. Inputs: `[vector]`.
    Extract { index: u32 },
    /// Block-wide synchronization. Ordered after every producer it publishes.
    Barrier,
    /// Re-binds a buffer: the same memory, observed after the ordering dependencies completed.
    /// Inputs: `[buffer]`.
    After,
    /// Bundles independent nodes. Ordered after its members.
    Group,
    /// Final node of a kernel.
    Sink,
}

impl Operation {
    pub fn is_store(&self) -> bool {
        matches!(self, Operation::Store { .. })
    }

    pub fn is_load(&self) -> bool {
        matches!(self, Operation::Load { .. })
    }
}

/// One node of an [operation graph](crate::OpGraph).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub op: Operation,
    /// Data producers, ordered.
    pub inputs: SmallVec<[NodeId; 4]>,
    /// Happens-after dependencies that carry no data.
    pub after: SmallVec<[NodeId; 4]>,
    /// Where the produced value lives.
    pub space: AddressSpace,
    pub elem: Elem,
    /// `[]` for scalars, `[len]` for fragments, the buffer shape for buffers.
    pub shape: Vec<u32>,
    /// Ranges open when the node was emitted, outermost first.
    pub scope: Vec<RangeId>,
}

impl Node {
    /// The buffer a load, store or re-binding refers to.
    pub fn buffer(&self) -> Option<NodeId> {
        match self.op {
            Operation::Load { .. } | Operation::Store { .. } | Operation::After => {
                self.inputs.first().copied()
            }
            _ => None,
        }
    }

    pub fn index(&self) -> Option<&Expr> {
        match &self.op {
            Operation::Load { index } | Operation::Store { index } => Some(index),
            _ => None,
        }
    }
}
