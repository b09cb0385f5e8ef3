use tileplan_ir::{
    AddressSpace, BufferDesc, Expr, GraphError, MatrixIdent, MmaDefinition, NodeId, OpGraph,
};

use crate::components::TilingConfig;

/// Register accumulators of one thread, one fragment per tensor-core tile of its warp.
///
/// Stored as a `(tc_tiles_m, tc_tiles_n, elements_per_lane)` register buffer. Every read goes
/// through the latest re-binding, so it is ordered after the writes it must observe.
#[derive(Debug, Clone)]
pub struct AccumulatorBank {
    config: TilingConfig,
    mma: MmaDefinition,
    buffer: NodeId,
    current: NodeId,
}

impl AccumulatorBank {
    /// Declare the accumulators and zero them with unrolled stores.
    pub fn init(
        graph: &mut OpGraph,
        config: TilingConfig,
        mma: MmaDefinition,
    ) -> Result<Self, GraphError> {
        let per_lane = mma.elements_per_lane(MatrixIdent::Accumulator, config.warp_size());
        let buffer = graph.buffer(BufferDesc {
            name: "acc".into(),
            slot: 2,
            space: AddressSpace::Register,
            shape: vec![config.tc_tiles_m(), config.tc_tiles_n(), per_lane],
            elem: mma.cd_type,
        });

        let zero = graph.constant(0.0, mma.cd_type);
        let len = config.tc_tiles_m() * config.tc_tiles_n() * per_lane;
        let stores = graph
            .unrolled("acc_init", len)
            .map(|index| graph.store(buffer, Expr::constant(index), zero))
            .collect::<Result<Vec<_>, _>>()?;
        let init = graph.group(&stores);

        Ok(Self {
            config,
            mma,
            current: graph.after(buffer, &[init])?,
            buffer,
        })
    }

    pub fn elements_per_lane(&self) -> u32 {
        self.mma
            .elements_per_lane(MatrixIdent::Accumulator, self.config.warp_size())
    }

    /// Flat register index of element `nth` of tile `(m_tile, n_tile)`.
    pub fn index(&self, m_tile: u32, n_tile: u32, nth: u32) -> u32 {
        (m_tile * self.config.tc_tiles_n() + n_tile) * self.elements_per_lane() + nth
    }

    /// The declaration of the register buffer.
    pub fn buffer(&self) -> NodeId {
        self.buffer
    }

    /// Read one accumulator element.
    pub fn read(
        &self,
        graph: &mut OpGraph,
        m_tile: u32,
        n_tile: u32,
        nth: u32,
    ) -> Result<NodeId, GraphError> {
        graph.load(self.current, Expr::constant(self.index(m_tile, n_tile, nth)))
    }

    /// `acc[m_tile][n_tile] += a * b` with one tensor-core instruction, written back in place.
    ///
    /// Returns the stores of the updated fragment.
    pub fn accumulate(
        &self,
        graph: &mut OpGraph,
        m_tile: u32,
        n_tile: u32,
        a: &[NodeId],
        b: &[NodeId],
    ) -> Result<Vec<NodeId>, GraphError> {
        let per_lane = self.elements_per_lane();
        let acc = (0..per_lane)
            .map(|nth| self.read(graph, m_tile, n_tile, nth))
            .collect::<Result<Vec<_>, _>>()?;

        let result = graph.mma(self.mma, a, b, &acc);

        (0..per_lane)
            .map(|nth| {
                let value = graph.extract(result, nth);
                let index = Expr::constant(self.index(m_tile, n_tile, nth));
                graph.store(self.current, index, value)
            })
            .collect()
    }

    /// Re-bind the accumulators after `after`, so later reads observe every update before it.
    pub fn finalize(&mut self, graph: &mut OpGraph, after: NodeId) -> Result<NodeId, GraphError> {
        self.current = graph.after(self.current, &[after])?;
        Ok(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::TilingParams;
    use tileplan_ir::{Elem, Operation, RegisterLayout, layouts::M16N8K16};

    #[test]
    fn init_zeroes_every_register() {
        let config = TilingParams::new(256, 256, 64).validate().unwrap();
        let mma = MmaDefinition {
            size: M16N8K16,
            a_type: Elem::F16,
            b_type: Elem::F16,
            cd_type: Elem::F32,
            layout: RegisterLayout::PtxM16N8K16,
        };
        let mut graph = OpGraph::new();
        let bank = AccumulatorBank::init(&mut graph, config, mma).unwrap();

        let stores = graph.nodes().filter(|(_, node)| node.op.is_store()).count();
        assert_eq!(stores, 2 * 8 * 4);
        assert_eq!(graph.buffer_desc(bank.buffer()).unwrap().shape, vec![2, 8, 4]);
        assert_eq!(bank.index(1, 7, 3), 63);

        let read = bank.read(&mut graph, 0, 0, 0).unwrap();
        assert!(matches!(graph[read].op, Operation::Load { .. }));
        assert_eq!(tileplan_ir::verify(&graph), Ok(()));
    }
}
