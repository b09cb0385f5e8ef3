use tileplan_ir::{
    AddressSpace, BufferDesc, Expr, GraphError, GridAxis, NodeId, OpGraph, RangeId, RangeKind,
};

use crate::components::TilingConfig;

/// The three global matrices of a matmul, bound in slot order `lhs`, `rhs`, `out`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalBuffers {
    pub lhs: NodeId,
    pub rhs: NodeId,
    pub out: NodeId,
}

/// A rectangular window over a row-major global matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalView {
    pub buffer: NodeId,
    pub row_offset: Expr,
    pub col_offset: Expr,
    /// Row stride of the underlying matrix.
    pub stride: u32,
    pub rows: u32,
    pub cols: u32,
}

impl GlobalView {
    /// Flat index of `(row, col)` of the window in the underlying matrix.
    pub fn index(&self, row: Expr, col: Expr) -> Expr {
        (&self.row_offset + row) * self.stride + &self.col_offset + col
    }
}

/// Coordinates of the block instance, one grid range per axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIds {
    pub x: (RangeId, Expr),
    pub y: (RangeId, Expr),
}

/// The block's K-slices of both inputs, bound to the outer reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KTileViews {
    pub range: RangeId,
    pub lhs: GlobalView,
    pub rhs: GlobalView,
}

/// Maps the grid of blocks to output tiles and to K-slices of the inputs.
#[derive(new, Debug, Clone, Copy)]
pub struct BlockPartitioner {
    config: TilingConfig,
}

impl BlockPartitioner {
    /// Declare the global matrices.
    pub fn declare(&self, graph: &mut OpGraph) -> GlobalBuffers {
        let config = &self.config;
        let elems = config.elems();
        let mut matrix = |name: &str, slot, rows, cols, elem| {
            graph.buffer(BufferDesc {
                name: name.into(),
                slot,
                space: AddressSpace::Global,
                shape: vec![rows, cols],
                elem,
            })
        };

        GlobalBuffers {
            lhs: matrix("lhs", 0, config.m(), config.k(), elems.input),
            rhs: matrix("rhs", 1, config.k(), config.n(), elems.input),
            out: matrix("out", 2, config.m(), config.n(), elems.output),
        }
    }

    /// Open the grid ranges, y first, so x is the fastest varying block coordinate.
    pub fn open_grid(&self, graph: &mut OpGraph) -> BlockIds {
        let count = self.config.cube_count();
        let y = graph.open_range("block_y", count.y, RangeKind::Grid(GridAxis::Y));
        let x = graph.open_range("block_x", count.x, RangeKind::Grid(GridAxis::X));

        BlockIds { x, y }
    }

    /// The output tile owned by the block.
    pub fn out_view(&self, buffers: &GlobalBuffers, block: &BlockIds) -> GlobalView {
        GlobalView {
            buffer: buffers.out,
            row_offset: &block.y.1 * self.config.block_m(),
            col_offset: &block.x.1 * self.config.block_n(),
            stride: self.config.n(),
            rows: self.config.block_m(),
            cols: self.config.block_n(),
        }
    }

    /// Open the outer reduction over `k / block_k` tiles and slice both inputs with it.
    pub fn open_k_tiles(
        &self,
        graph: &mut OpGraph,
        buffers: &GlobalBuffers,
        block: &BlockIds,
    ) -> KTileViews {
        let config = &self.config;
        let (range, k_tile) = graph.open_range("k_tile", config.k_tiles(), RangeKind::Reduce);

        let lhs = GlobalView {
            buffer: buffers.lhs,
            row_offset: &block.y.1 * config.block_m(),
            col_offset: &k_tile * config.block_k(),
            stride: config.k(),
            rows: config.block_m(),
            cols: config.block_k(),
        };
        let rhs = GlobalView {
            buffer: buffers.rhs,
            row_offset: &k_tile * config.block_k(),
            col_offset: &block.x.1 * config.block_n(),
            stride: config.n(),
            rows: config.block_k(),
            cols: config.block_n(),
        };

        log::debug!(
            "Partitioned into {:?} blocks over {} k-tiles",
            config.cube_count(),
            config.k_tiles()
        );

        KTileViews { range, lhs, rhs }
    }

    /// Close the grid ranges opened by [open_grid](Self::open_grid).
    pub fn close_grid(
        &self,
        graph: &mut OpGraph,
        block: &BlockIds,
        after: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        let end_x = graph.close_range(block.x.0, after)?;
        graph.close_range(block.y.0, &[end_x])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::TilingParams;

    #[test]
    fn views_address_the_block_tiles() {
        let config = TilingParams {
            block_m: 64,
            block_k: 64,
            threads_per_block: 128,
            warp_tile_n: None,
            ..TilingParams::new(128, 512, 128)
        }
        .validate()
        .unwrap();
        let partitioner = BlockPartitioner::new(config);
        let mut graph = OpGraph::new();
        let buffers = partitioner.declare(&mut graph);
        let block = partitioner.open_grid(&mut graph);
        let out = partitioner.out_view(&buffers, &block);
        let views = partitioner.open_k_tiles(&mut graph, &buffers, &block);

        assert_eq!(graph.range(block.x.0).unwrap().size, 4);
        assert_eq!(graph.range(block.y.0).unwrap().size, 2);
        assert_eq!(graph.range(views.range).unwrap().size, 2);

        let values = |id: RangeId| match id {
            id if id == block.x.0 => Some(3),
            id if id == block.y.0 => Some(1),
            id if id == views.range => Some(1),
            _ => None,
        };
        let at = |view: &GlobalView, row, col| view.index(Expr::constant(row), Expr::constant(col)).eval(&values);

        // Row 64 + 2, column 384 + 5 of a 128x512 output.
        assert_eq!(at(&out, 2, 5), Some(66 * 512 + 389));
        // Row 66, column 64 + 7 of the 128x128 lhs.
        assert_eq!(at(&views.lhs, 2, 7), Some(66 * 128 + 71));
        // Row 64 + 2, column 384 + 5 of the 128x512 rhs.
        assert_eq!(at(&views.rhs, 2, 5), Some(66 * 512 + 389));
    }
}
