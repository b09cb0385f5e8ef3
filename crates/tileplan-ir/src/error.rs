use alloc::vec::Vec;
use thiserror::Error;

use crate::{Elem, NodeId, RangeId};

/// Errors raised while building or verifying an [operation graph](crate::OpGraph).
///
/// All of them are internal invariant violations of the code building the graph, never
/// conditions a caller can recover from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An index expression uses a range that is not open at this point.
    #[error("Range {range} is used by {node_kind} while it is not open")]
    RangeNotOpen {
        range: RangeId,
        node_kind: &'static str,
    },

    /// A range was closed while an inner range was still open, or closed twice.
    #[error("Range {found} closed out of order, innermost open range is {expected:?}")]
    UnbalancedRange {
        expected: Option<RangeId>,
        found: RangeId,
    },

    /// The kernel was finalized with ranges still open.
    #[error("Ranges {0:?} were never closed")]
    OpenRanges(Vec<RangeId>),

    /// A load, store or re-binding points at something that is not a buffer.
    #[error("Node {0:?} is not a buffer")]
    NotABuffer(NodeId),

    /// A store writes a value of another element type than its buffer.
    #[error("Store of {value} into a buffer of {buffer} without a cast")]
    ElemMismatch { buffer: Elem, value: Elem },

    /// A load observes a store it is not ordered after.
    #[error("Load {load:?} of buffer {buffer:?} is not ordered after store {store:?}")]
    MissingOrdering {
        load: NodeId,
        store: NodeId,
        buffer: NodeId,
    },

    /// A shared memory load is ordered after a store, but no barrier separates them.
    #[error("Load {load:?} of shared buffer {buffer:?} observes store {store:?} without a barrier")]
    MissingBarrier {
        load: NodeId,
        store: NodeId,
        buffer: NodeId,
    },

    /// A loop body writes and reads a shared buffer without a barrier closing the iteration, so
    /// the next iteration could overwrite data still being read.
    #[error(
        "Range {range} rewrites shared buffer {buffer:?} without a barrier after read {load:?}"
    )]
    UnsyncedRestage {
        range: RangeId,
        buffer: NodeId,
        load: NodeId,
    },
}
