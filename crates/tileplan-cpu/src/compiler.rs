use std::sync::Arc;

use hashbrown::HashMap;
use tileplan_ir::{
    AddressSpace, FragmentLayout, GridAxis, KernelDefinition, MmaConfig, NodeId, Operation,
    RangeId, RangeKind,
};
use tileplan_runtime::{DeviceProperties, Feature, LaunchError, validate_resources};

/// A kernel checked against the device and ready to be interpreted.
#[derive(Debug)]
pub struct CpuKernel {
    pub(crate) definition: KernelDefinition,
    pub(crate) plane_dim: u32,
    pub(crate) thread: RangeId,
    pub(crate) grid_x: Option<RangeId>,
    pub(crate) grid_y: Option<RangeId>,
    /// Position of the `Range` node of every sequential range.
    pub(crate) loop_starts: HashMap<RangeId, usize>,
    /// Register layout of every tensor-core node.
    pub(crate) layouts: HashMap<NodeId, Arc<dyn FragmentLayout>>,
}

impl CpuKernel {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &KernelDefinition {
        &self.definition
    }
}

fn compilation_error(reason: String) -> LaunchError {
    LaunchError::CompilationError { reason }
}

pub(crate) fn compile(
    properties: &DeviceProperties,
    definition: KernelDefinition,
) -> Result<CpuKernel, LaunchError> {
    validate_resources(properties, &definition)?;

    let plane_dim = properties.topology_properties().plane_size;
    if definition.cube_dim % plane_dim != 0 {
        return Err(compilation_error(format!(
            "{} threads per block don't form whole planes of {plane_dim}",
            definition.cube_dim
        )));
    }

    for (position, binding) in definition.bindings.iter().enumerate() {
        if binding.desc.slot as usize != position || binding.desc.space != AddressSpace::Global {
            return Err(compilation_error(format!(
                "Binding {position} is `{}` in {} slot {}",
                binding.desc.name, binding.desc.space, binding.desc.slot
            )));
        }
    }

    let graph = &definition.graph;
    let mut thread = None;
    let mut grid_x = None;
    let mut grid_y = None;

    for range in graph.ranges() {
        let (slot, expected) = match range.kind {
            RangeKind::Grid(GridAxis::X) => (&mut grid_x, definition.cube_count.x),
            RangeKind::Grid(GridAxis::Y) => (&mut grid_y, definition.cube_count.y),
            RangeKind::Thread => (&mut thread, definition.cube_dim),
            RangeKind::Reduce | RangeKind::Unroll => continue,
        };
        if slot.is_some() || range.size != expected {
            return Err(compilation_error(format!(
                "Range {range} doesn't match the launch geometry"
            )));
        }
        *slot = Some(range.id);
    }
    let thread =
        thread.ok_or_else(|| compilation_error("The kernel has no thread range".into()))?;

    let mut loop_starts = HashMap::new();
    let mut layouts = HashMap::new();

    for (position, (id, node)) in graph.nodes().enumerate() {
        match &node.op {
            Operation::Range(range) => {
                let reduce = graph
                    .range(*range)
                    .is_some_and(|range| range.kind == RangeKind::Reduce);
                if reduce {
                    loop_starts.insert(*range, position);
                }
            }
            Operation::Mma(def) => {
                let size = def.size;
                let feature = Feature::Mma(MmaConfig {
                    a_type: def.a_type,
                    b_type: def.b_type,
                    cd_type: def.cd_type,
                    m: size.m(),
                    n: size.n(),
                    k: size.k(),
                    layout: def.layout,
                });
                if !properties.feature_enabled(feature) {
                    return Err(compilation_error(format!("{def} is not supported")));
                }

                let layout = def.layout.instantiate(size, plane_dim).ok_or_else(|| {
                    compilation_error(format!("{} is not defined for {size}", def.layout))
                })?;
                layouts.insert(id, layout);
            }
            _ => {}
        }
    }

    log::debug!(
        "Compiled {} with {} nodes and {} tensor-core instructions",
        definition.name,
        graph.len(),
        layouts.len()
    );

    Ok(CpuKernel {
        definition,
        plane_dim,
        thread,
        grid_x,
        grid_y,
        loop_starts,
        layouts,
    })
}
