use tileplan_ir::{AddressSpace, BufferDesc, Expr, GraphError, NodeId, OpGraph};

use crate::components::{GlobalView, TilingConfig};

/// Shared tiles of one block. `lhs` is stored k-major (`block_k x block_m`), `rhs` row-major
/// (`block_k x block_n`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBuffers {
    pub lhs: NodeId,
    pub rhs: NodeId,
}

/// Shared tiles readable once every thread finished staging them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedTiles {
    pub lhs: NodeId,
    pub rhs: NodeId,
    pub barrier: NodeId,
}

/// One element copied by one thread: from `(row, col)` of the global window to `shared[index]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCopy<E> {
    pub row: E,
    pub col: E,
    pub shared_index: E,
}

/// Cooperative global to shared copy of the block's input tiles.
///
/// Both tiles are flattened and split into chunks of `threads_per_block` elements. Every thread
/// copies exactly one element of every chunk, chunks are unrolled.
#[derive(new, Debug, Clone, Copy)]
pub struct GlobalToSharedStager {
    config: TilingConfig,
}

impl GlobalToSharedStager {
    pub fn declare(&self, graph: &mut OpGraph) -> StageBuffers {
        let config = &self.config;
        let elem = config.elems().input;

        let lhs = graph.buffer(BufferDesc {
            name: "lhs_tile".into(),
            slot: 0,
            space: AddressSpace::Shared,
            shape: vec![config.block_k(), config.block_m()],
            elem,
        });
        let rhs = graph.buffer(BufferDesc {
            name: "rhs_tile".into(),
            slot: 1,
            space: AddressSpace::Shared,
            shape: vec![config.block_k(), config.block_n()],
            elem,
        });

        StageBuffers { lhs, rhs }
    }

    /// Element of the lhs tile `thread` copies in `chunk`. The global window is
    /// `block_m x block_k`, the shared tile transposed.
    pub fn lhs_copy(&self, tid: &Expr, chunk: u32) -> StageCopy<Expr> {
        let config = &self.config;
        let element = tid + chunk * config.threads_per_block();
        let row = &element / config.block_k();
        let col = element % config.block_k();

        StageCopy {
            shared_index: &col * config.block_m() + &row,
            row,
            col,
        }
    }

    /// Element of the rhs tile `thread` copies in `chunk`. Both the global window and the shared
    /// tile are `block_k x block_n`.
    pub fn rhs_copy(&self, tid: &Expr, chunk: u32) -> StageCopy<Expr> {
        let config = &self.config;
        let element = tid + chunk * config.threads_per_block();

        StageCopy {
            row: &element / config.block_n(),
            col: &element % config.block_n(),
            shared_index: element,
        }
    }

    /// [lhs_copy](Self::lhs_copy) for a literal thread.
    pub fn lhs_assignment(&self, thread: u32, chunk: u32) -> Option<StageCopy<u32>> {
        literal(self.lhs_copy(&Expr::constant(thread), chunk))
    }

    /// [rhs_copy](Self::rhs_copy) for a literal thread.
    pub fn rhs_assignment(&self, thread: u32, chunk: u32) -> Option<StageCopy<u32>> {
        literal(self.rhs_copy(&Expr::constant(thread), chunk))
    }

    /// Copy both K-slices into shared memory. Returns the stores.
    pub fn copy(
        &self,
        graph: &mut OpGraph,
        buffers: &StageBuffers,
        lhs: &GlobalView,
        rhs: &GlobalView,
        tid: &Expr,
    ) -> Result<Vec<NodeId>, GraphError> {
        let mut stores = Vec::new();

        for chunk in graph.unrolled("lhs_chunk", self.config.lhs_stage_chunks()) {
            let copy = self.lhs_copy(tid, chunk);
            let value = graph.load(lhs.buffer, lhs.index(copy.row, copy.col))?;
            stores.push(graph.store(buffers.lhs, copy.shared_index, value)?);
        }
        for chunk in graph.unrolled("rhs_chunk", self.config.rhs_stage_chunks()) {
            let copy = self.rhs_copy(tid, chunk);
            let value = graph.load(rhs.buffer, rhs.index(copy.row, copy.col))?;
            stores.push(graph.store(buffers.rhs, copy.shared_index, value)?);
        }

        log::debug!("Staging copies {} elements per thread", stores.len());
        Ok(stores)
    }

    /// Barrier after every staging store, and re-bindings of both tiles ordered after it.
    pub fn publish(
        &self,
        graph: &mut OpGraph,
        buffers: &StageBuffers,
        stores: &[NodeId],
    ) -> Result<StagedTiles, GraphError> {
        let barrier = graph.barrier(stores);

        Ok(StagedTiles {
            lhs: graph.after(buffers.lhs, &[barrier])?,
            rhs: graph.after(buffers.rhs, &[barrier])?,
            barrier,
        })
    }
}

fn literal(copy: StageCopy<Expr>) -> Option<StageCopy<u32>> {
    Some(StageCopy {
        row: copy.row.as_const()?,
        col: copy.col.as_const()?,
        shared_index: copy.shared_index.as_const()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::TilingParams;

    fn stager(params: TilingParams) -> (GlobalToSharedStager, TilingConfig) {
        let config = params.validate().unwrap();
        (GlobalToSharedStager::new(config), config)
    }

    #[test]
    fn every_shared_element_is_written_once() {
        let scenario = TilingParams {
            block_m: 64,
            block_k: 64,
            threads_per_block: 128,
            warp_tile_n: None,
            ..TilingParams::new(128, 128, 128)
        };

        for params in [scenario, TilingParams::new(256, 256, 64)] {
            let (stager, config) = stager(params);
            let threads = config.threads_per_block();
            let mut lhs_hits = vec![0; (config.block_m() * config.block_k()) as usize];
            let mut rhs_hits = vec![0; (config.block_n() * config.block_k()) as usize];

            for thread in 0..threads {
                for chunk in 0..config.lhs_stage_chunks() {
                    let copy = stager.lhs_assignment(thread, chunk).unwrap();
                    assert!(copy.row < config.block_m() && copy.col < config.block_k());
                    // Transposed: k-major.
                    assert_eq!(copy.shared_index, copy.col * config.block_m() + copy.row);
                    lhs_hits[copy.shared_index as usize] += 1;
                }
                for chunk in 0..config.rhs_stage_chunks() {
                    let copy = stager.rhs_assignment(thread, chunk).unwrap();
                    assert!(copy.row < config.block_k() && copy.col < config.block_n());
                    assert_eq!(copy.shared_index, copy.row * config.block_n() + copy.col);
                    rhs_hits[copy.shared_index as usize] += 1;
                }
            }

            assert!(lhs_hits.iter().all(|hits| *hits == 1));
            assert!(rhs_hits.iter().all(|hits| *hits == 1));
        }
    }

    #[test]
    fn consecutive_threads_read_consecutive_columns() {
        let (stager, _) = stager(TilingParams::new(256, 256, 64));

        let first = stager.rhs_assignment(0, 1).unwrap();
        let second = stager.rhs_assignment(1, 1).unwrap();

        assert_eq!(first.row, second.row);
        assert_eq!(first.col + 1, second.col);
    }
}
