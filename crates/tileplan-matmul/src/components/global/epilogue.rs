use std::sync::Arc;

use tileplan_ir::{Expr, FragmentLayout, GraphError, MatrixIdent, NodeId, OpGraph};

use crate::components::{AccumulatorBank, GlobalView, TilingConfig, UnitIds};

/// Writes the final accumulators to the block's output tile.
///
/// Element `nth` of a lane goes where the accumulator layout says the tensor core produced it,
/// which makes the mapping the exact inverse of the fragment gather.
#[derive(new, Debug, Clone)]
pub struct EpilogueWriter {
    config: TilingConfig,
    layout: Arc<dyn FragmentLayout>,
}

impl EpilogueWriter {
    /// `(row, col)` inside the block tile of accumulator element `nth` of tile `(m_tile, n_tile)`.
    pub fn output_position(
        &self,
        unit: &UnitIds,
        m_tile: u32,
        n_tile: u32,
        nth: u32,
    ) -> (Expr, Expr) {
        let config = &self.config;
        let size = config.tile_size();
        let (row, col) = self
            .layout
            .position_of_nth(&unit.lane, nth, MatrixIdent::Accumulator);

        (
            unit.warp_row(config) + m_tile * size.m() + row,
            unit.warp_col(config) + n_tile * size.n() + col,
        )
    }

    /// Store every accumulator element, cast to the output type, and group the stores.
    pub fn write(
        &self,
        graph: &mut OpGraph,
        bank: &AccumulatorBank,
        out: &GlobalView,
        unit: &UnitIds,
    ) -> Result<NodeId, GraphError> {
        let output = self.config.elems().output;
        let mut stores = Vec::new();

        for m_tile in graph.unrolled("out_m_tile", self.config.tc_tiles_m()) {
            for n_tile in graph.unrolled("out_n_tile", self.config.tc_tiles_n()) {
                for nth in 0..bank.elements_per_lane() {
                    let value = bank.read(graph, m_tile, n_tile, nth)?;
                    let value = match graph[value].elem == output {
                        true => value,
                        false => graph.cast(value, output),
                    };
                    let (row, col) = self.output_position(unit, m_tile, n_tile, nth);
                    stores.push(graph.store(out.buffer, out.index(row, col), value)?);
                }
            }
        }

        log::debug!("Epilogue writes {} elements per thread", stores.len());
        Ok(graph.group(&stores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::TilingParams;
    use tileplan_ir::layouts;

    #[test]
    fn block_tile_is_written_exactly_once() {
        let config = TilingParams {
            block_m: 64,
            block_k: 64,
            threads_per_block: 128,
            warp_tile_n: None,
            ..TilingParams::new(128, 128, 128)
        }
        .validate()
        .unwrap();
        let layout: Arc<dyn FragmentLayout> = Arc::new(layouts::LaneBitsM16N8K16);
        let writer = EpilogueWriter::new(config, layout.clone());
        let mut hits = vec![0u32; (config.block_m() * config.block_n()) as usize];

        for thread in 0..config.threads_per_block() {
            let unit = UnitIds::of_thread(&config, thread);
            for m_tile in 0..config.tc_tiles_m() {
                for n_tile in 0..config.tc_tiles_n() {
                    for nth in 0..layout.elements_per_lane(MatrixIdent::Accumulator) {
                        let (row, col) = writer.output_position(&unit, m_tile, n_tile, nth);
                        let (row, col) = (row.as_const().unwrap(), col.as_const().unwrap());
                        hits[(row * config.block_n() + col) as usize] += 1;
                    }
                }
            }
        }

        assert!(hits.iter().all(|count| *count == 1));
    }

    #[test]
    fn positions_invert_the_accumulator_fragment() {
        let config = TilingParams::new(256, 256, 64).validate().unwrap();
        let layout: Arc<dyn FragmentLayout> = Arc::new(layouts::PtxM16N8K16);
        let writer = EpilogueWriter::new(config, layout.clone());
        // Warp 3 is (x = 1, y = 1).
        let unit = UnitIds::of_thread(&config, 3 * 32 + 13);

        for nth in 0..4 {
            let (row, col) = writer.output_position(&unit, 1, 2, nth);
            let (tile_row, tile_col) = layout
                .position(13, nth, MatrixIdent::Accumulator)
                .unwrap();

            assert_eq!(row.as_const(), Some(32 + 16 + tile_row));
            assert_eq!(col.as_const(), Some(64 + 2 * 8 + tile_col));
        }
    }
}
