use std::sync::Arc;

use tileplan_ir::{
    Expr, FragmentLayout, GraphError, MatrixIdent, MmaDefinition, NodeId, OpGraph, RangeId,
};
use tileplan_runtime::DeviceProperties;

use crate::components::{
    EpilogueWriter, GlobalToSharedStager, LayoutMappingError, MatmulAvailabilityError,
    MatmulSetupError, TilingConfig, UnitIds,
};

/// Gathers tensor-core fragments from the staged shared tiles.
///
/// Every element a lane holds is read at the position the register layout assigns to it, so the
/// fragments can be handed to the tensor-core instruction as is.
#[derive(Debug, Clone)]
pub struct FragmentExtractor {
    config: TilingConfig,
    layout: Arc<dyn FragmentLayout>,
    mma: MmaDefinition,
}

impl FragmentExtractor {
    /// Use the register layout the device declares for the configured instruction.
    pub fn from_device(
        config: TilingConfig,
        properties: &DeviceProperties,
    ) -> Result<Self, MatmulSetupError> {
        let elems = config.elems();
        let size = config.tile_size();

        let kind = properties
            .mma_layout(elems.input, elems.input, elems.accumulator, size)
            .ok_or(MatmulAvailabilityError::MmaInstructionUnavailable {
                input: elems.input,
                output: elems.accumulator,
                size,
            })?;
        let layout = kind.instantiate(size, config.warp_size()).ok_or(
            LayoutMappingError::Undefined {
                layout: kind,
                size,
                plane_dim: config.warp_size(),
            },
        )?;

        Ok(Self::new(config, layout)?)
    }

    /// Use the given layout, after checking it is a bijection for every operand and that staged
    /// tiles reach the instruction, and its results the block tile, unchanged.
    pub fn new(
        config: TilingConfig,
        layout: Arc<dyn FragmentLayout>,
    ) -> Result<Self, LayoutMappingError> {
        validate_layout(layout.as_ref(), &config)?;

        let elems = config.elems();
        let mma = MmaDefinition {
            size: config.tile_size(),
            a_type: elems.input,
            b_type: elems.input,
            cd_type: elems.accumulator,
            layout: layout.kind(),
        };
        let extractor = Self {
            config,
            layout,
            mma,
        };
        extractor.check_round_trip()?;
        log::debug!("Fragments use {mma}");

        Ok(extractor)
    }

    pub fn layout(&self) -> &Arc<dyn FragmentLayout> {
        &self.layout
    }

    pub fn mma(&self) -> MmaDefinition {
        self.mma
    }

    /// Index in the shared lhs tile of element `nth` of the A fragment for tile row `m_tile`.
    pub fn lhs_index(&self, unit: &UnitIds, k_chunk: &Expr, m_tile: u32, nth: u32) -> Expr {
        let config = &self.config;
        let (row, col) = self.layout.position_of_nth(&unit.lane, nth, MatrixIdent::A);
        let m = unit.warp_row(config) + m_tile * config.tile_size().m() + row;
        let k = k_chunk * config.tile_size().k() + col;

        k * config.block_m() + m
    }

    /// Index in the shared rhs tile of element `nth` of the B fragment for tile column `n_tile`.
    pub fn rhs_index(&self, unit: &UnitIds, k_chunk: &Expr, n_tile: u32, nth: u32) -> Expr {
        let config = &self.config;
        let (row, col) = self.layout.position_of_nth(&unit.lane, nth, MatrixIdent::B);
        let k = k_chunk * config.tile_size().k() + row;
        let n = unit.warp_col(config) + n_tile * config.tile_size().n() + col;

        k * config.block_n() + n
    }

    /// Stage a block with distinct values through the stager's copies, gather every fragment
    /// through the emitted indices and compare it with the tile the instruction reads. Then send
    /// every instruction result through the epilogue and compare with its place in the block.
    fn check_round_trip(&self) -> Result<(), LayoutMappingError> {
        let config = &self.config;
        let size = config.tile_size();
        let thread = RangeId(0);
        let symbolic = UnitIds::new(config, Expr::range(thread));
        let at = |expr: &Expr, tid: u32| expr.eval(&|id| (id == thread).then_some(tid));

        // Window element (row, col) holds its row-major offset.
        let stager = GlobalToSharedStager::new(*config);
        let mut lhs = vec![None; (config.block_k() * config.block_m()) as usize];
        let mut rhs = vec![None; (config.block_k() * config.block_n()) as usize];
        for tid in 0..config.threads_per_block() {
            for chunk in 0..config.lhs_stage_chunks() {
                let Some(copy) = stager.lhs_assignment(tid, chunk) else {
                    continue;
                };
                if let Some(slot) = lhs.get_mut(copy.shared_index as usize) {
                    *slot = Some(copy.row * config.block_k() + copy.col);
                }
            }
            for chunk in 0..config.rhs_stage_chunks() {
                let Some(copy) = stager.rhs_assignment(tid, chunk) else {
                    continue;
                };
                if let Some(slot) = rhs.get_mut(copy.shared_index as usize) {
                    *slot = Some(copy.row * config.block_n() + copy.col);
                }
            }
        }
        let staged = |tile: &[Option<u32>], index: Option<u32>| {
            index.and_then(|index| tile.get(index as usize).copied().flatten())
        };

        let warps_x = config.warps_in_block_x();
        let epilogue = EpilogueWriter::new(*config, self.layout.clone());

        for tid in 0..config.threads_per_block() {
            let warp = tid / config.warp_size();
            let lane = tid % config.warp_size();
            let warp_row = warp / warps_x * config.warp_tile_m();
            let warp_col = warp % warps_x * config.warp_tile_n();
            let position = |nth: u32, ident: MatrixIdent| {
                self.layout
                    .position(lane, nth, ident)
                    .ok_or(LayoutMappingError::NotConstant { ident, lane, nth })
            };

            for k_chunk in 0..config.k_chunks() {
                let k_chunk_expr = Expr::constant(k_chunk);
                let k_base = k_chunk * size.k();

                for m_tile in 0..config.tc_tiles_m() {
                    for nth in 0..self.layout.elements_per_lane(MatrixIdent::A) {
                        let (row, col) = position(nth, MatrixIdent::A)?;
                        let index = self.lhs_index(&symbolic, &k_chunk_expr, m_tile, nth);
                        let m = warp_row + m_tile * size.m() + row;
                        let expected = m * config.block_k() + k_base + col;

                        if staged(lhs.as_slice(), at(&index, tid)) != Some(expected) {
                            return Err(round_trip_error(MatrixIdent::A, row, col));
                        }
                    }
                }

                for n_tile in 0..config.tc_tiles_n() {
                    for nth in 0..self.layout.elements_per_lane(MatrixIdent::B) {
                        let (row, col) = position(nth, MatrixIdent::B)?;
                        let index = self.rhs_index(&symbolic, &k_chunk_expr, n_tile, nth);
                        let n = warp_col + n_tile * size.n() + col;
                        let expected = (k_base + row) * config.block_n() + n;

                        if staged(rhs.as_slice(), at(&index, tid)) != Some(expected) {
                            return Err(round_trip_error(MatrixIdent::B, row, col));
                        }
                    }
                }
            }

            for m_tile in 0..config.tc_tiles_m() {
                for n_tile in 0..config.tc_tiles_n() {
                    for nth in 0..self.layout.elements_per_lane(MatrixIdent::Accumulator) {
                        let (row, col) = position(nth, MatrixIdent::Accumulator)?;
                        let (out_row, out_col) =
                            epilogue.output_position(&symbolic, m_tile, n_tile, nth);
                        let expected = (
                            warp_row + m_tile * size.m() + row,
                            warp_col + n_tile * size.n() + col,
                        );

                        if (at(&out_row, tid), at(&out_col, tid))
                            != (Some(expected.0), Some(expected.1))
                        {
                            return Err(round_trip_error(MatrixIdent::Accumulator, row, col));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Load the A fragment of tile row `m_tile`, one node per register element.
    pub fn load_lhs(
        &self,
        graph: &mut OpGraph,
        lhs: NodeId,
        unit: &UnitIds,
        k_chunk: &Expr,
        m_tile: u32,
    ) -> Result<Vec<NodeId>, GraphError> {
        let count = self.layout.elements_per_lane(MatrixIdent::A);
        graph
            .unrolled("a_elem", count)
            .map(|nth| graph.load(lhs, self.lhs_index(unit, k_chunk, m_tile, nth)))
            .collect()
    }

    /// Load the B fragment of tile column `n_tile`, one node per register element.
    pub fn load_rhs(
        &self,
        graph: &mut OpGraph,
        rhs: NodeId,
        unit: &UnitIds,
        k_chunk: &Expr,
        n_tile: u32,
    ) -> Result<Vec<NodeId>, GraphError> {
        let count = self.layout.elements_per_lane(MatrixIdent::B);
        graph
            .unrolled("b_elem", count)
            .map(|nth| graph.load(rhs, self.rhs_index(unit, k_chunk, n_tile, nth)))
            .collect()
    }
}

/// Check that a layout maps the configured tensor-core tile one-to-one for every operand.
pub fn validate_layout(
    layout: &dyn FragmentLayout,
    config: &TilingConfig,
) -> Result<(), LayoutMappingError> {
    let expected = config.tile_size();
    let plane_dim = config.warp_size();
    if layout.tile_size() != expected || layout.plane_dim() != plane_dim {
        return Err(LayoutMappingError::TileMismatch {
            expected,
            found: layout.tile_size(),
            plane_dim: layout.plane_dim(),
        });
    }

    for ident in [MatrixIdent::A, MatrixIdent::B, MatrixIdent::Accumulator] {
        let (rows, cols) = expected.shape(ident);
        let per_lane = layout.elements_per_lane(ident);
        let mut owner: Vec<Option<(u32, u32)>> = vec![None; (rows * cols) as usize];

        for lane in 0..plane_dim {
            for nth in 0..per_lane {
                let (row, col) = layout
                    .position(lane, nth, ident)
                    .ok_or(LayoutMappingError::NotConstant { ident, lane, nth })?;
                if row >= rows || col >= cols {
                    return Err(LayoutMappingError::OutOfTile {
                        ident,
                        lane,
                        nth,
                        row,
                        col,
                    });
                }

                let slot = &mut owner[(row * cols + col) as usize];
                if slot.is_some() {
                    return Err(LayoutMappingError::NotInjective { ident, row, col });
                }
                *slot = Some((lane, nth));
            }
        }

        if let Some(missing) = owner.iter().position(Option::is_none) {
            let missing = missing as u32;
            return Err(LayoutMappingError::NotSurjective {
                ident,
                row: missing / cols,
                col: missing % cols,
            });
        }
    }

    Ok(())
}

fn round_trip_error(ident: MatrixIdent, row: u32, col: u32) -> LayoutMappingError {
    LayoutMappingError::RoundTrip { ident, row, col }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::TilingParams;
    use tileplan_ir::{RegisterLayout, TileSize, layouts};

    fn config() -> TilingConfig {
        TilingParams::new(256, 256, 64).validate().unwrap()
    }

    /// Every lane reads the first row of the tile.
    #[derive(Debug)]
    struct Broadcast;

    impl FragmentLayout for Broadcast {
        fn kind(&self) -> RegisterLayout {
            RegisterLayout::PtxM16N8K16
        }

        fn tile_size(&self) -> TileSize {
            layouts::M16N8K16
        }

        fn position_of_nth(&self, _lane: &Expr, nth: u32, _ident: MatrixIdent) -> (Expr, Expr) {
            (Expr::constant(0), Expr::constant(nth))
        }
    }

    /// PTX positions in emitted indices, while literal lanes answer for their neighbour.
    #[derive(Debug)]
    struct SwappedLanes {
        ident: MatrixIdent,
    }

    impl FragmentLayout for SwappedLanes {
        fn kind(&self) -> RegisterLayout {
            RegisterLayout::PtxM16N8K16
        }

        fn tile_size(&self) -> TileSize {
            layouts::M16N8K16
        }

        fn position_of_nth(&self, lane: &Expr, nth: u32, ident: MatrixIdent) -> (Expr, Expr) {
            layouts::PtxM16N8K16.position_of_nth(lane, nth, ident)
        }

        fn position(&self, lane: u32, nth: u32, ident: MatrixIdent) -> Option<(u32, u32)> {
            let lane = match ident == self.ident {
                true => lane ^ 1,
                false => lane,
            };
            layouts::PtxM16N8K16.position(lane, nth, ident)
        }
    }

    #[test]
    fn documented_layouts_are_accepted() {
        validate_layout(&layouts::PtxM16N8K16, &config()).unwrap();
        validate_layout(&layouts::LaneBitsM16N8K16, &config()).unwrap();

        FragmentExtractor::new(config(), Arc::new(layouts::PtxM16N8K16)).unwrap();
        FragmentExtractor::new(config(), Arc::new(layouts::LaneBitsM16N8K16)).unwrap();
    }

    #[test]
    fn indices_disagreeing_with_the_instruction_fail_the_round_trip() {
        for ident in [MatrixIdent::A, MatrixIdent::B, MatrixIdent::Accumulator] {
            let layout = SwappedLanes { ident };
            // Still a bijection, only the emitted indices are off.
            validate_layout(&layout, &config()).unwrap();

            let err = FragmentExtractor::new(config(), Arc::new(layout)).unwrap_err();

            assert!(
                matches!(err, LayoutMappingError::RoundTrip { ident: found, .. } if found == ident),
                "{ident:?}: {err:?}"
            );
        }
    }

    #[test]
    fn overlapping_layout_is_rejected() {
        let err = validate_layout(&Broadcast, &config()).unwrap_err();

        assert_eq!(
            err,
            LayoutMappingError::NotInjective {
                ident: MatrixIdent::A,
                row: 0,
                col: 0
            }
        );
    }

    #[test]
    fn layout_of_another_tile_is_rejected() {
        let layout = layouts::LaneStrided::new(TileSize::new(16, 16, 16), 32).unwrap();
        let err = validate_layout(&layout, &config()).unwrap_err();

        assert!(matches!(err, LayoutMappingError::TileMismatch { .. }));
    }

    #[test]
    fn fragment_indices_follow_the_warp_tile() {
        let config = config();
        let extractor = FragmentExtractor::new(config, Arc::new(layouts::PtxM16N8K16)).unwrap();
        // Thread 165 is warp 5 (x = 1, y = 2), lane 5 (group 1, thread 1 in group).
        let unit = UnitIds::of_thread(&config, 165);
        let k_chunk = Expr::constant(1);

        // A element 3 of lane 5 sits at (9, 3) of the m16k16 tile.
        let m = 2 * 32 + 16 + 9;
        let k = 16 + 3;
        assert_eq!(
            extractor.lhs_index(&unit, &k_chunk, 1, 3).as_const(),
            Some(k * 128 + m)
        );

        // B element 2 of lane 5 sits at (10, 1) of the k16n8 tile.
        let k = 16 + 10;
        let n = 64 + 3 * 8 + 1;
        assert_eq!(
            extractor.rhs_index(&unit, &k_chunk, 3, 2).as_const(),
            Some(k * 128 + n)
        );
    }
}
