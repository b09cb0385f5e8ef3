//! Tensor-core register layouts.
//!
//! Each type describes where a vendor's instruction expects the elements of an operand to live
//! inside the registers of a plane. None of them are derived: they encode hardware documentation
//! and must be checked for bijectivity before a plan relies on them.

use crate::{Expr, FragmentLayout, MatrixIdent, RegisterLayout, TileSize};

pub const M16N8K16: TileSize = TileSize::new(16, 8, 16);

/// Derived from PTX shape documentation
/// https://docs.nvidia.com/cuda/parallel-thread-execution/#warp-level-matrix-instructions-for-mma
///
/// Lanes are split in 8 groups of 4. Inputs are packed two 16-bit values per 32-bit register.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtxM16N8K16;

impl PtxM16N8K16 {
    const ELEMS_PER_REG: u32 = 2;
}

impl FragmentLayout for PtxM16N8K16 {
    fn kind(&self) -> RegisterLayout {
        RegisterLayout::PtxM16N8K16
    }

    fn tile_size(&self) -> TileSize {
        M16N8K16
    }

    fn position_of_nth(&self, lane: &Expr, nth: u32, ident: MatrixIdent) -> (Expr, Expr) {
        let per_reg = Self::ELEMS_PER_REG;
        let group_id = lane / 4u32;
        let thread_id_in_group = lane % 4u32;

        match ident {
            MatrixIdent::A => {
                let odd_register = (nth / per_reg) & 1;
                let row = group_id + odd_register * 8;
                let group_2 = (nth / (2 * per_reg)) & 1;
                let col = thread_id_in_group * per_reg + (nth % per_reg + 4 * per_reg * group_2);
                (row, col)
            }
            MatrixIdent::B => {
                let reg = nth / per_reg;
                let row = thread_id_in_group * per_reg + (nth % per_reg + per_reg * 4 * reg);
                (row, group_id)
            }
            MatrixIdent::Accumulator => {
                let row = group_id + ((nth << 2) & 8);
                let col = thread_id_in_group * 2u32 + nth % 2;
                (row, col)
            }
        }
    }
}

/// `m16n8k16` layout written as a decomposition of the lane id into its five bits.
///
/// The A and accumulator rows are selected by the three high bits, the columns by the two low
/// bits; B is the mirror image.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaneBitsM16N8K16;

impl FragmentLayout for LaneBitsM16N8K16 {
    fn kind(&self) -> RegisterLayout {
        RegisterLayout::LaneBitsM16N8K16
    }

    fn tile_size(&self) -> TileSize {
        M16N8K16
    }

    fn position_of_nth(&self, lane: &Expr, nth: u32, ident: MatrixIdent) -> (Expr, Expr) {
        let l0 = lane & 1u32;
        let l1 = (lane >> 1u32) & 1u32;
        let l2 = (lane >> 2u32) & 1u32;
        let l3 = (lane >> 3u32) & 1u32;
        let l4 = lane >> 4u32;

        match ident {
            MatrixIdent::A => {
                let row = l4 * 8u32 + l3 * 4u32 + l2 * 2u32 + nth % 2;
                let col = l1 * 4u32 + l0 * 2u32 + ((nth / 4) * 8 + (nth % 4) / 2);
                (row, col)
            }
            MatrixIdent::B => {
                let row = l1 * 2u32 + l0 + nth * 4;
                let col = l4 * 4u32 + l3 * 2u32 + l2;
                (row, col)
            }
            MatrixIdent::Accumulator => {
                let row = l4 * 8u32 + l3 * 4u32 + l2 * 2u32 + nth / 2;
                let col = l1 * 4u32 + l0 * 2u32 + nth % 2;
                (row, col)
            }
        }
    }
}

/// Row-major layout where consecutive lanes hold consecutive elements.
///
/// Defined for any tile whose operands hold a multiple of `plane_dim` elements.
#[derive(Debug, Clone, Copy)]
pub struct LaneStrided {
    size: TileSize,
    plane_dim: u32,
}

impl LaneStrided {
    pub fn new(size: TileSize, plane_dim: u32) -> Option<Self> {
        let fits = [MatrixIdent::A, MatrixIdent::B, MatrixIdent::Accumulator]
            .iter()
            .all(|ident| {
                let elements = size.elements(*ident);
                plane_dim > 0 && elements > 0 && elements.is_multiple_of(plane_dim)
            });

        fits.then_some(Self { size, plane_dim })
    }
}

impl FragmentLayout for LaneStrided {
    fn kind(&self) -> RegisterLayout {
        RegisterLayout::LaneStrided
    }

    fn tile_size(&self) -> TileSize {
        self.size
    }

    fn plane_dim(&self) -> u32 {
        self.plane_dim
    }

    fn position_of_nth(&self, lane: &Expr, nth: u32, ident: MatrixIdent) -> (Expr, Expr) {
        let (_, cols) = self.size.shape(ident);
        let flat = lane + nth * self.plane_dim;

        (&flat / cols, flat % cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn assert_bijective(layout: &dyn FragmentLayout) {
        let size = layout.tile_size();

        for ident in [MatrixIdent::A, MatrixIdent::B, MatrixIdent::Accumulator] {
            let (rows, cols) = size.shape(ident);
            let mut hits = vec![0u32; (rows * cols) as usize];

            for lane in 0..layout.plane_dim() {
                for nth in 0..layout.elements_per_lane(ident) {
                    let (row, col) = layout.position(lane, nth, ident).unwrap();
                    assert!(row < rows && col < cols, "{ident} ({row}, {col}) out of tile");
                    hits[(row * cols + col) as usize] += 1;
                }
            }

            assert!(hits.iter().all(|count| *count == 1), "{layout:?} {ident}");
        }
    }

    #[test]
    fn ptx_layout_is_bijective() {
        assert_bijective(&PtxM16N8K16);
    }

    #[test]
    fn lane_bits_layout_is_bijective() {
        assert_bijective(&LaneBitsM16N8K16);
    }

    #[test]
    fn lane_strided_layout_is_bijective() {
        assert_bijective(&LaneStrided::new(TileSize::new(16, 16, 16), 32).unwrap());
        assert_bijective(&LaneStrided::new(TileSize::new(16, 8, 8), 32).unwrap());
    }

    #[test]
    fn ptx_layout_matches_documented_positions() {
        let layout = PtxM16N8K16;

        // Lane 5 is group 1, thread 1 in group.
        assert_eq!(layout.position(5, 0, MatrixIdent::A), Some((1, 2)));
        assert_eq!(layout.position(5, 3, MatrixIdent::A), Some((9, 3)));
        assert_eq!(layout.position(5, 6, MatrixIdent::A), Some((9, 10)));
        assert_eq!(layout.position(5, 2, MatrixIdent::B), Some((10, 1)));
        assert_eq!(layout.position(5, 3, MatrixIdent::Accumulator), Some((9, 3)));
    }

    #[test]
    fn lane_strided_rejects_partial_planes() {
        assert!(LaneStrided::new(TileSize::new(4, 4, 4), 32).is_none());
    }

    #[test]
    fn symbolic_lane_stays_symbolic() {
        let lane = Expr::range(crate::RangeId(0)) % 32u32;
        let (row, _) = PtxM16N8K16.position_of_nth(&lane, 2, MatrixIdent::A);

        assert!(row.as_const().is_none());
        assert_eq!(row.eval(&|_| Some(37)), Some(1 + 8));
    }
}
