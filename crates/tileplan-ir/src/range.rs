use core::fmt::Display;

use alloc::string::String;

/// Identifier of an iteration axis inside one [graph](crate::OpGraph).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeId(pub u32);

impl Display for RangeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Axis of the launch grid a block-parallel range is bound to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum GridAxis {
    X,
    Y,
}

/// How an iteration axis is executed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// Spatial-parallel over blocks, one value per block instance.
    Grid(GridAxis),
    /// Spatial-parallel over the threads of a block.
    Thread,
    /// Sequential, carries accumulator state from one iteration to the next.
    Reduce,
    /// Resolved to literal indices while the graph is built. Never referenced by an index
    /// expression.
    Unroll,
}

impl RangeKind {
    pub fn is_parallel(&self) -> bool {
        matches!(self, RangeKind::Grid(_) | RangeKind::Thread)
    }
}

/// A named iteration axis `0..size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub id: RangeId,
    pub name: String,
    pub size: u32,
    pub kind: RangeKind,
}

impl Display for Range {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self.kind {
            RangeKind::Grid(GridAxis::X) => "grid.x",
            RangeKind::Grid(GridAxis::Y) => "grid.y",
            RangeKind::Thread => "thread",
            RangeKind::Reduce => "reduce",
            RangeKind::Unroll => "unroll",
        };
        write!(f, "{} = {}(0..{}) `{}`", self.id, kind, self.size, self.name)
    }
}
