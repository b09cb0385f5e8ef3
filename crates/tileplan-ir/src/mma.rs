use core::fmt::{Debug, Display};

use alloc::sync::Arc;

use crate::{Elem, Expr, layouts};

/// Which operand of `D = A * B + C` a fragment belongs to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MatrixIdent {
    A,
    B,
    Accumulator,
}

impl Display for MatrixIdent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MatrixIdent::A => f.write_str("a"),
            MatrixIdent::B => f.write_str("b"),
            MatrixIdent::Accumulator => f.write_str("acc"),
        }
    }
}

/// Native shape `m x n x k` of one tensor-core instruction.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileSize {
    m: u32,
    n: u32,
    k: u32,
}

impl TileSize {
    pub const fn new(m: u32, n: u32, k: u32) -> Self {
        Self { m, n, k }
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    /// `(rows, cols)` of the operand.
    pub fn shape(&self, ident: MatrixIdent) -> (u32, u32) {
        match ident {
            MatrixIdent::A => (self.m, self.k),
            MatrixIdent::B => (self.k, self.n),
            MatrixIdent::Accumulator => (self.m, self.n),
        }
    }

    pub fn elements(&self, ident: MatrixIdent) -> u32 {
        let (rows, cols) = self.shape(ident);
        rows * cols
    }
}

impl From<(u32, u32, u32)> for TileSize {
    fn from((m, n, k): (u32, u32, u32)) -> Self {
        Self { m, n, k }
    }
}

impl Display for TileSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "m{}n{}k{}", self.m, self.n, self.k)
    }
}

/// Register layout a device uses for its tensor-core operands.
///
/// The layout is defined by the hardware vendor; a plan must reproduce it exactly for the
/// instruction to compute the intended product.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterLayout {
    /// PTX `mma.sync.m16n8k16` with 16-bit inputs.
    #[cfg_attr(feature = "serde", serde(rename = "ptx_m16n8k16"))]
    PtxM16N8K16,
    /// Lane-id bit decomposition for `m16n8k16`.
    #[cfg_attr(feature = "serde", serde(rename = "lane_bits_m16n8k16"))]
    LaneBitsM16N8K16,
    /// Row-major, element `i` of lane `l` at flat position `i * plane_dim + l`.
    LaneStrided,
}

impl RegisterLayout {
    /// Instantiate the layout for a tile size. Returns `None` when the layout is only defined
    /// for another geometry.
    pub fn instantiate(&self, size: TileSize, plane_dim: u32) -> Option<Arc<dyn FragmentLayout>> {
        match self {
            RegisterLayout::PtxM16N8K16 => (size == layouts::M16N8K16 && plane_dim == 32)
                .then(|| Arc::new(layouts::PtxM16N8K16) as Arc<dyn FragmentLayout>),
            RegisterLayout::LaneBitsM16N8K16 => (size == layouts::M16N8K16 && plane_dim == 32)
                .then(|| Arc::new(layouts::LaneBitsM16N8K16) as Arc<dyn FragmentLayout>),
            RegisterLayout::LaneStrided => layouts::LaneStrided::new(size, plane_dim)
                .map(|layout| Arc::new(layout) as Arc<dyn FragmentLayout>),
        }
    }
}

impl Display for RegisterLayout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegisterLayout::PtxM16N8K16 => f.write_str("ptx_m16n8k16"),
            RegisterLayout::LaneBitsM16N8K16 => f.write_str("lane_bits_m16n8k16"),
            RegisterLayout::LaneStrided => f.write_str("lane_strided"),
        }
    }
}

/// Maps `(lane, element index)` of a fragment to `(row, col)` inside the operand tile.
///
/// Implementations must be bijective for every operand: over all lanes of a plane and all
/// elements of a lane, every position of the tile is produced exactly once.
pub trait FragmentLayout: Debug + Send + Sync {
    /// The register layout this function implements.
    fn kind(&self) -> RegisterLayout;

    fn tile_size(&self) -> TileSize;

    fn plane_dim(&self) -> u32 {
        32
    }

    fn elements_per_lane(&self, ident: MatrixIdent) -> u32 {
        self.tile_size().elements(ident) / self.plane_dim()
    }

    /// Position of the `nth` element held by `lane`. The lane is symbolic so the result can be
    /// emitted as an index expression; `nth` is always a literal since fragments are unrolled.
    fn position_of_nth(&self, lane: &Expr, nth: u32, ident: MatrixIdent) -> (Expr, Expr);

    /// [`position_of_nth`](Self::position_of_nth) on a literal lane.
    fn position(&self, lane: u32, nth: u32, ident: MatrixIdent) -> Option<(u32, u32)> {
        let (row, col) = self.position_of_nth(&Expr::constant(lane), nth, ident);
        Some((row.as_const()?, col.as_const()?))
    }
}

/// A tensor-core instruction supported by a device.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MmaConfig {
    pub a_type: Elem,
    pub b_type: Elem,
    pub cd_type: Elem,
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub layout: RegisterLayout,
}

impl MmaConfig {
    pub fn tile_size(&self) -> TileSize {
        TileSize::new(self.m, self.n, self.k)
    }
}

/// Operand description attached to a tensor-core node.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MmaDefinition {
    pub size: TileSize,
    pub a_type: Elem,
    pub b_type: Elem,
    pub cd_type: Elem,
    pub layout: RegisterLayout,
}

impl MmaDefinition {
    pub fn elements_per_lane(&self, ident: MatrixIdent, plane_dim: u32) -> u32 {
        self.size.elements(ident) / plane_dim
    }
}

impl From<MmaConfig> for MmaDefinition {
    fn from(config: MmaConfig) -> Self {
        Self {
            size: config.tile_size(),
            a_type: config.a_type,
            b_type: config.b_type,
            cd_type: config.cd_type,
            layout: config.layout,
        }
    }
}

impl Display for MmaDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "mma.{}.{}.{}.{}.{}",
            self.size, self.a_type, self.b_type, self.cd_type, self.layout
        )
    }
}
