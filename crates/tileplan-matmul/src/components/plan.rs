use tileplan_ir::{
    Binding, Expr, KernelDefinition, NodeId, OpGraph, RangeId, RangeKind, Visibility, verify,
};
use tileplan_runtime::{DeviceProperties, config::GlobalConfig};

use crate::components::{
    AccumulatorBank, BlockIds, BlockPartitioner, EpilogueWriter, FragmentExtractor,
    GlobalBuffers, GlobalToSharedStager, GlobalView, KTileViews, MatmulAvailabilityError,
    MatmulSetupError, StageBuffers, StagedTiles, TilingConfig, TilingParams, UnitIds,
};

/// Progress of a plan through its stages.
///
/// The reduction body is emitted once and executed `k / block_k` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanState {
    Validated,
    Partitioned,
    Staged,
    StageBarrier,
    Extracted,
    Accumulated,
    IterationBarrier,
    FinalBarrier,
    Epilogue,
    Done,
}

impl PlanState {
    fn next(&self) -> Option<PlanState> {
        Some(match self {
            PlanState::Validated => PlanState::Partitioned,
            PlanState::Partitioned => PlanState::Staged,
            PlanState::Staged => PlanState::StageBarrier,
            PlanState::StageBarrier => PlanState::Extracted,
            PlanState::Extracted => PlanState::Accumulated,
            PlanState::Accumulated => PlanState::IterationBarrier,
            PlanState::IterationBarrier => PlanState::FinalBarrier,
            PlanState::FinalBarrier => PlanState::Epilogue,
            PlanState::Epilogue => PlanState::Done,
            PlanState::Done => return None,
        })
    }
}

/// A validated plan, ready to be compiled by a runtime.
#[derive(Debug, Clone)]
pub struct MatmulPlan {
    pub config: TilingConfig,
    pub kernel: KernelDefinition,
}

/// Build the plan of a matmul for a device.
///
/// Parameters are validated before anything else, then the device capabilities are checked, and
/// only then is the graph built.
pub fn build_plan(
    params: TilingParams,
    properties: &DeviceProperties,
) -> Result<MatmulPlan, MatmulSetupError> {
    let config = params.validate()?;
    check_availability(&config, properties)?;

    let extractor = FragmentExtractor::from_device(config, properties)?;
    let verify_graph = GlobalConfig::get().plan.verify_graph;

    MatmulPlanBuilder::new(config, extractor)
        .verify_graph(verify_graph)
        .build()
}

/// Check the device can run a plan for this config.
pub fn check_availability(
    config: &TilingConfig,
    properties: &DeviceProperties,
) -> Result<(), MatmulAvailabilityError> {
    let topology = properties.topology_properties();
    if topology.plane_size != config.warp_size() {
        return Err(MatmulAvailabilityError::PlaneDimUnsupported {
            plane_dim: topology.plane_size,
        });
    }
    if config.threads_per_block() > topology.max_units_per_cube {
        return Err(MatmulAvailabilityError::CubeDimTooBig {
            requested: config.threads_per_block(),
            max: topology.max_units_per_cube,
        });
    }

    let max = properties.memory_properties().max_shared_memory_size;
    if config.shared_memory_bytes() > max {
        return Err(MatmulAvailabilityError::SharedMemoryTooBig {
            requested: config.shared_memory_bytes(),
            max,
        });
    }

    Ok(())
}

// Handles produced by one stage and consumed by a later one.
#[derive(Default)]
struct Handles {
    buffers: Option<GlobalBuffers>,
    block: Option<BlockIds>,
    out: Option<GlobalView>,
    thread: Option<RangeId>,
    unit: Option<UnitIds>,
    bank: Option<AccumulatorBank>,
    k_tiles: Option<KTileViews>,
    stage: Option<StageBuffers>,
    stage_stores: Option<Vec<NodeId>>,
    staged: Option<StagedTiles>,
    k_chunk: Option<(RangeId, Expr)>,
    lhs_fragments: Vec<Vec<NodeId>>,
    rhs_fragments: Vec<Vec<NodeId>>,
    chunk_end: Option<NodeId>,
    tile_end: Option<NodeId>,
    epilogue: Option<NodeId>,
}

/// Emits the operation graph of a matmul, one stage at a time.
///
/// Each stage method advances the [state](PlanState) and fails when called out of order.
pub struct MatmulPlanBuilder {
    config: TilingConfig,
    extractor: FragmentExtractor,
    partitioner: BlockPartitioner,
    stager: GlobalToSharedStager,
    writer: EpilogueWriter,
    graph: OpGraph,
    state: PlanState,
    handles: Handles,
    verify_graph: bool,
}

macro_rules! handle {
    ($self:ident, $field:ident) => {
        $self
            .handles
            .$field
            .clone()
            .ok_or(MatmulSetupError::MissingHandle {
                state: $self.state,
                handle: stringify!($field),
            })?
    };
}

impl MatmulPlanBuilder {
    pub fn new(config: TilingConfig, extractor: FragmentExtractor) -> Self {
        Self {
            partitioner: BlockPartitioner::new(config),
            stager: GlobalToSharedStager::new(config),
            writer: EpilogueWriter::new(config, extractor.layout().clone()),
            config,
            extractor,
            graph: OpGraph::new(),
            state: PlanState::Validated,
            handles: Handles::default(),
            verify_graph: true,
        }
    }

    /// Whether to verify the ordering of the finished graph. Enabled by default.
    pub fn verify_graph(mut self, enabled: bool) -> Self {
        self.verify_graph = enabled;
        self
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    fn advance(&mut self, to: PlanState) -> Result<(), MatmulSetupError> {
        if self.state.next() != Some(to) {
            return Err(MatmulSetupError::Plan {
                from: self.state,
                to,
            });
        }

        log::trace!("Plan {:?} -> {to:?}", self.state);
        self.state = to;
        Ok(())
    }

    /// Declare the global matrices, open the grid and thread ranges, zero the accumulators and
    /// open the outer reduction.
    pub fn partition(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::Partitioned)?;
        let graph = &mut self.graph;

        let buffers = self.partitioner.declare(graph);
        let stage = self.stager.declare(graph);
        let block = self.partitioner.open_grid(graph);
        let out = self.partitioner.out_view(&buffers, &block);

        let (thread, tid) = graph.open_range(
            "thread",
            self.config.threads_per_block(),
            RangeKind::Thread,
        );
        let unit = UnitIds::new(&self.config, tid);
        let bank = AccumulatorBank::init(graph, self.config, self.extractor.mma())?;
        let k_tiles = self.partitioner.open_k_tiles(graph, &buffers, &block);

        self.handles.buffers = Some(buffers);
        self.handles.stage = Some(stage);
        self.handles.block = Some(block);
        self.handles.out = Some(out);
        self.handles.thread = Some(thread);
        self.handles.unit = Some(unit);
        self.handles.bank = Some(bank);
        self.handles.k_tiles = Some(k_tiles);
        Ok(())
    }

    /// Copy the current K-slices of both inputs into shared memory.
    pub fn stage(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::Staged)?;
        let stage = handle!(self, stage);
        let k_tiles = handle!(self, k_tiles);
        let unit = handle!(self, unit);

        let stores = self.stager.copy(
            &mut self.graph,
            &stage,
            &k_tiles.lhs,
            &k_tiles.rhs,
            &unit.tid,
        )?;
        self.handles.stage_stores = Some(stores);
        Ok(())
    }

    /// Publish the staged tiles behind a barrier. Readers go through re-bindings ordered after it.
    pub fn synchronize_stage(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::StageBarrier)?;
        let stage = handle!(self, stage);
        let stores = handle!(self, stage_stores);

        let staged = self.stager.publish(&mut self.graph, &stage, &stores)?;
        self.handles.staged = Some(staged);
        Ok(())
    }

    /// Open the inner reduction and gather the fragments of every tensor-core tile of the warp.
    pub fn extract(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::Extracted)?;
        let staged = handle!(self, staged);
        let unit = handle!(self, unit);
        let graph = &mut self.graph;

        let (chunk, k_chunk) =
            graph.open_range("k_chunk", self.config.k_chunks(), RangeKind::Reduce);

        let lhs_fragments = graph
            .unrolled("m_tile", self.config.tc_tiles_m())
            .map(|m_tile| {
                self.extractor
                    .load_lhs(graph, staged.lhs, &unit, &k_chunk, m_tile)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let rhs_fragments = graph
            .unrolled("n_tile", self.config.tc_tiles_n())
            .map(|n_tile| {
                self.extractor
                    .load_rhs(graph, staged.rhs, &unit, &k_chunk, n_tile)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.handles.k_chunk = Some((chunk, k_chunk));
        self.handles.lhs_fragments = lhs_fragments;
        self.handles.rhs_fragments = rhs_fragments;
        Ok(())
    }

    /// One tensor-core instruction per tile, then close the inner reduction.
    pub fn accumulate(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::Accumulated)?;
        let bank = handle!(self, bank);
        let (chunk, _) = handle!(self, k_chunk);
        let graph = &mut self.graph;

        let mut stores = Vec::new();
        for (m_tile, a) in self.handles.lhs_fragments.iter().enumerate() {
            for (n_tile, b) in self.handles.rhs_fragments.iter().enumerate() {
                stores.extend(bank.accumulate(graph, m_tile as u32, n_tile as u32, a, b)?);
            }
        }

        let updates = graph.group(&stores);
        self.handles.chunk_end = Some(graph.close_range(chunk, &[updates])?);
        Ok(())
    }

    /// Barrier closing the iteration, so the next restage can't overwrite tiles still being read.
    pub fn synchronize_iteration(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::IterationBarrier)?;
        let chunk_end = handle!(self, chunk_end);

        let barrier = self.graph.barrier(&[chunk_end]);
        let k_tiles = handle!(self, k_tiles);
        self.handles.tile_end = Some(self.graph.close_range(k_tiles.range, &[barrier])?);
        Ok(())
    }

    /// The outer reduction is closed: accumulators are re-bound after its final barrier.
    pub fn synchronize_final(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::FinalBarrier)?;
        let tile_end = handle!(self, tile_end);

        let mut bank = handle!(self, bank);
        bank.finalize(&mut self.graph, tile_end)?;
        self.handles.bank = Some(bank);
        Ok(())
    }

    /// Write the accumulators to the output.
    pub fn epilogue(&mut self) -> Result<(), MatmulSetupError> {
        self.advance(PlanState::Epilogue)?;
        let bank = handle!(self, bank);
        let out = handle!(self, out);
        let unit = handle!(self, unit);

        let group = self.writer.write(&mut self.graph, &bank, &out, &unit)?;
        self.handles.epilogue = Some(group);
        Ok(())
    }

    /// Close the remaining ranges, verify the graph and hand it off.
    pub fn finish(mut self) -> Result<MatmulPlan, MatmulSetupError> {
        self.advance(PlanState::Done)?;
        let epilogue = handle!(self, epilogue);
        let thread = handle!(self, thread);
        let block = handle!(self, block);
        let buffers = handle!(self, buffers);

        let thread_end = self.graph.close_range(thread, &[epilogue])?;
        let grid_end = self
            .partitioner
            .close_grid(&mut self.graph, &block, &[thread_end])?;
        self.graph.sink(&[grid_end])?;

        if self.verify_graph {
            verify(&self.graph)?;
        }

        let bindings = [
            (buffers.lhs, Visibility::Read),
            (buffers.rhs, Visibility::Read),
            (buffers.out, Visibility::ReadWrite),
        ]
        .into_iter()
        .map(|(node, visibility)| {
            let desc = self.graph.buffer_desc(node)?.clone();
            Ok(Binding::new(desc, visibility))
        })
        .collect::<Result<Vec<_>, MatmulSetupError>>()?;

        let config = self.config;
        let kernel = KernelDefinition {
            name: format!(
                "matmul_{}x{}x{}_{}",
                config.m(),
                config.n(),
                config.k(),
                self.extractor.mma()
            ),
            graph: self.graph,
            cube_dim: config.threads_per_block(),
            cube_count: config.cube_count(),
            bindings,
        };
        log::debug!(
            "Built {} with {} nodes over {} k-tiles",
            kernel.name,
            kernel.graph.len(),
            config.k_tiles()
        );

        Ok(MatmulPlan { config, kernel })
    }

    /// Run every stage in order.
    pub fn build(mut self) -> Result<MatmulPlan, MatmulSetupError> {
        self.partition()?;
        self.stage()?;
        self.synchronize_stage()?;
        self.extract()?;
        self.accumulate()?;
        self.synchronize_iteration()?;
        self.synchronize_final()?;
        self.epilogue()?;
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tileplan_ir::{CubeCount, Operation, layouts};

    fn scenario() -> TilingConfig {
        TilingParams {
            block_m: 64,
            block_k: 64,
            threads_per_block: 128,
            warp_tile_n: None,
            ..TilingParams::new(128, 128, 128)
        }
        .validate()
        .unwrap()
    }

    fn builder() -> MatmulPlanBuilder {
        let config = scenario();
        let extractor = FragmentExtractor::new(config, Arc::new(layouts::PtxM16N8K16)).unwrap();
        MatmulPlanBuilder::new(config, extractor)
    }

    #[test]
    fn stages_out_of_order_are_rejected() {
        let mut builder = builder();

        let err = builder.stage().unwrap_err();
        assert!(matches!(
            err,
            MatmulSetupError::Plan {
                from: PlanState::Validated,
                to: PlanState::Staged
            }
        ));

        builder.partition().unwrap();
        let err = builder.partition().unwrap_err();
        assert!(matches!(
            err,
            MatmulSetupError::Plan {
                from: PlanState::Partitioned,
                to: PlanState::Partitioned
            }
        ));

        builder.stage().unwrap();
        assert!(builder.extract().is_err());
        assert_eq!(builder.state(), PlanState::Staged);
    }

    #[test]
    fn missing_handle_is_named() {
        let mut builder = builder();
        builder.partition().unwrap();
        builder.handles.unit = None;

        let err = builder.stage().unwrap_err();

        assert!(matches!(
            err,
            MatmulSetupError::MissingHandle {
                state: PlanState::Staged,
                handle: "unit"
            }
        ));
    }

    #[test]
    fn finished_plan_is_verified_and_bound() {
        let plan = builder().build().unwrap();
        let kernel = &plan.kernel;

        assert_eq!(kernel.cube_dim, 128);
        assert_eq!(kernel.cube_count, CubeCount::new(1, 2));
        assert_eq!(kernel.name, "matmul_128x128x128_mma.m16n8k16.f16.f16.f32.ptx_m16n8k16");
        assert_eq!(
            kernel
                .bindings
                .iter()
                .map(|binding| (binding.desc.slot, binding.visibility))
                .collect::<Vec<_>>(),
            vec![
                (0, Visibility::Read),
                (1, Visibility::Read),
                (2, Visibility::ReadWrite)
            ]
        );
        assert_eq!(verify(&kernel.graph), Ok(()));
        assert!(kernel.graph.open_ranges().is_empty());
    }

    #[test]
    fn reduction_body_is_emitted_once() {
        let plan = builder().build().unwrap();
        let graph = &plan.kernel.graph;

        let reductions: Vec<_> = graph
            .ranges()
            .iter()
            .filter(|range| range.kind == RangeKind::Reduce)
            .map(|range| (range.name.as_str(), range.size))
            .collect();
        // 128 / 64 k-tiles, 64 / 16 chunks per tile.
        assert_eq!(reductions, vec![("k_tile", 2), ("k_chunk", 4)]);

        let barriers = graph
            .nodes()
            .filter(|(_, node)| node.op == Operation::Barrier)
            .count();
        assert_eq!(barriers, 2);

        // One warp along n covering 16 tiles, four warps along m with one tile each.
        let mma = graph
            .nodes()
            .filter(|(_, node)| matches!(node.op, Operation::Mma(_)))
            .count();
        assert_eq!(mma, 16);
    }
}
