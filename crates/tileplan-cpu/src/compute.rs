use hashbrown::HashMap;
use tileplan_ir::{
    AddressSpace, Expr, FragmentLayout, MatrixIdent, MmaDefinition, Node, NodeId, OpGraph,
    Operation, RangeId, RangeKind,
};
use tileplan_runtime::{ExecutionError, TensorData};

use crate::CpuKernel;

/// Executes a kernel block by block, in grid order.
///
/// The threads of a block run in lockstep: every node is executed for all of them before the next
/// one starts, so every barrier is reached by the whole block at once. Returns the number of
/// executed nodes.
pub(crate) fn execute(
    kernel: &CpuKernel,
    bindings: &mut [TensorData],
) -> Result<u64, ExecutionError> {
    check_bindings(kernel, bindings)?;

    let interpreter = Interpreter::new(kernel);
    let count = kernel.definition.cube_count;
    let mut executed = 0;

    for y in 0..count.y {
        for x in 0..count.x {
            executed += interpreter.run_block(x, y, bindings)?;
        }
    }

    Ok(executed)
}

fn check_bindings(kernel: &CpuKernel, bindings: &[TensorData]) -> Result<(), ExecutionError> {
    let declared = &kernel.definition.bindings;
    if declared.len() != bindings.len() {
        return Err(ExecutionError::BindingCount {
            expected: declared.len(),
            got: bindings.len(),
        });
    }

    for (binding, data) in declared.iter().zip(bindings.iter()) {
        let desc = &binding.desc;
        let shape: Vec<usize> = desc.shape.iter().map(|dim| *dim as usize).collect();

        if data.elem() != desc.elem || data.shape() != shape.as_slice() {
            return Err(ExecutionError::BindingMismatch {
                slot: desc.slot,
                reason: format!(
                    "expected `{}` as {}{:?}, got {}{:?}",
                    desc.name,
                    desc.elem,
                    shape,
                    data.elem(),
                    data.shape()
                ),
            });
        }
    }

    Ok(())
}

struct Interpreter<'a> {
    kernel: &'a CpuKernel,
    graph: &'a OpGraph,
    nodes: Vec<&'a Node>,
    threads: usize,
}

/// Everything a block owns while it runs.
struct BlockState {
    /// Value of every node, `threads * width` entries, thread-major.
    values: Vec<Vec<f64>>,
    /// Current value of every range, except the thread range.
    counters: Vec<u32>,
    shared: HashMap<NodeId, Vec<f64>>,
    /// Registers of every thread, thread-major.
    registers: HashMap<NodeId, Vec<f64>>,
}

impl<'a> Interpreter<'a> {
    fn new(kernel: &'a CpuKernel) -> Self {
        let graph = &kernel.definition.graph;

        Self {
            kernel,
            graph,
            nodes: graph.nodes().map(|(_, node)| node).collect(),
            threads: kernel.definition.cube_dim as usize,
        }
    }

    fn run_block(
        &self,
        x: u32,
        y: u32,
        bindings: &mut [TensorData],
    ) -> Result<u64, ExecutionError> {
        let mut state = self.allocate();
        if let Some(range) = self.kernel.grid_x {
            state.counters[range.0 as usize] = x;
        }
        if let Some(range) = self.kernel.grid_y {
            state.counters[range.0 as usize] = y;
        }

        let mut position = 0;
        let mut executed = 0;
        while position < self.nodes.len() {
            position = self.step(position, &mut state, bindings)?;
            executed += 1;
        }

        log::trace!("Block ({x}, {y}) executed {executed} nodes");
        Ok(executed)
    }

    fn allocate(&self) -> BlockState {
        let shared = self
            .graph
            .buffers(AddressSpace::Shared)
            .map(|(id, desc)| (id, vec![0.0; desc.len()]))
            .collect();
        let registers = self
            .graph
            .buffers(AddressSpace::Register)
            .map(|(id, desc)| (id, vec![0.0; desc.len() * self.threads]))
            .collect();

        BlockState {
            values: vec![Vec::new(); self.nodes.len()],
            counters: vec![0; self.graph.ranges().len()],
            shared,
            registers,
        }
    }

    /// Execute the node at `position` and return the position of the next one.
    fn step(
        &self,
        position: usize,
        state: &mut BlockState,
        bindings: &mut [TensorData],
    ) -> Result<usize, ExecutionError> {
        let node = self.nodes[position];

        let value = match &node.op {
            Operation::Buffer(_)
            | Operation::Barrier
            | Operation::After
            | Operation::Group
            | Operation::Sink => return Ok(position + 1),
            Operation::Range(range) => {
                // Grid ranges keep the block coordinates.
                if self.kernel.loop_starts.contains_key(range) {
                    state.counters[range.0 as usize] = 0;
                }
                return Ok(position + 1);
            }
            Operation::End(range) => return Ok(self.end(*range, position, state)),
            Operation::Const(value) => vec![*value; self.threads],
            Operation::Load { index } => self.load(node, index, state, bindings)?,
            Operation::Store { index } => {
                self.store(node, index, state, bindings)?;
                return Ok(position + 1);
            }
            Operation::Cast => self
                .input(node, 0, state)?
                .iter()
                .map(|value| node.elem.round(*value))
                .collect(),
            Operation::Mma(def) => self.mma(position, node, def, state)?,
            Operation::Extract { index } => {
                let vector = self.input(node, 0, state)?;
                let width = vector.len() / self.threads;
                (0..self.threads)
                    .map(|thread| vector[thread * width + *index as usize])
                    .collect()
            }
        };

        state.values[position] = value;
        Ok(position + 1)
    }

    fn end(&self, range: RangeId, position: usize, state: &mut BlockState) -> usize {
        let Some(info) = self.graph.range(range) else {
            return position + 1;
        };
        if info.kind != RangeKind::Reduce {
            return position + 1;
        }

        let counter = &mut state.counters[range.0 as usize];
        match self.kernel.loop_starts.get(&range) {
            Some(start) if *counter + 1 < info.size => {
                *counter += 1;
                start + 1
            }
            _ => position + 1,
        }
    }

    fn input<'s>(
        &self,
        node: &Node,
        nth: usize,
        state: &'s BlockState,
    ) -> Result<&'s [f64], ExecutionError> {
        node.inputs
            .get(nth)
            .and_then(|input| state.values.get(input.index()))
            .map(Vec::as_slice)
            .ok_or_else(|| generic(format!("Operand {nth} of {node:?} has no value")))
    }

    fn index(
        &self,
        index: &Expr,
        thread: usize,
        state: &BlockState,
    ) -> Result<usize, ExecutionError> {
        let thread_range = self.kernel.thread;
        index
            .eval(&|range| match range == thread_range {
                true => Some(thread as u32),
                false => state.counters.get(range.0 as usize).copied(),
            })
            .map(|index| index as usize)
            .ok_or_else(|| generic(format!("Index {index} can't be evaluated")))
    }

    fn load(
        &self,
        node: &Node,
        index: &Expr,
        state: &BlockState,
        bindings: &[TensorData],
    ) -> Result<Vec<f64>, ExecutionError> {
        let (root, space, slot, len) = self.buffer_of(node)?;

        (0..self.threads)
            .map(|thread| {
                let index = self.index(index, thread, state)?;
                let out_of_bounds = ExecutionError::OutOfBounds { index, len };
                match space {
                    AddressSpace::Global => bindings
                        .get(slot)
                        .and_then(|data| data.read(index))
                        .ok_or(out_of_bounds),
                    AddressSpace::Shared => memory(&state.shared, root)?
                        .get(index)
                        .copied()
                        .ok_or(out_of_bounds),
                    AddressSpace::Register if index < len => {
                        Ok(memory(&state.registers, root)?[thread * len + index])
                    }
                    AddressSpace::Register => Err(out_of_bounds),
                }
            })
            .collect()
    }

    fn store(
        &self,
        node: &Node,
        index: &Expr,
        state: &mut BlockState,
        bindings: &mut [TensorData],
    ) -> Result<(), ExecutionError> {
        let (root, space, slot, len) = self.buffer_of(node)?;
        let values = self.input(node, 1, state)?.to_vec();

        for (thread, value) in values.iter().enumerate() {
            let index = self.index(index, thread, state)?;
            let value = node.elem.round(*value);
            let out_of_bounds = ExecutionError::OutOfBounds { index, len };

            match space {
                AddressSpace::Global => bindings
                    .get_mut(slot)
                    .ok_or(out_of_bounds)?
                    .write(index, value)?,
                AddressSpace::Shared => {
                    *memory_mut(&mut state.shared, root)?
                        .get_mut(index)
                        .ok_or(out_of_bounds)? = value
                }
                AddressSpace::Register if index < len => {
                    memory_mut(&mut state.registers, root)?[thread * len + index] = value
                }
                AddressSpace::Register => return Err(out_of_bounds),
            }
        }

        Ok(())
    }

    /// Root buffer, address space, binding slot and length of the buffer a node accesses.
    fn buffer_of(
        &self,
        node: &Node,
    ) -> Result<(NodeId, AddressSpace, usize, usize), ExecutionError> {
        let buffer = node
            .buffer()
            .ok_or_else(|| generic(format!("{node:?} doesn't access a buffer")))?;
        let root = self
            .graph
            .root_buffer(buffer)
            .ok_or_else(|| generic(format!("Node {buffer:?} is not a buffer")))?;
        let desc = self
            .graph
            .buffer_desc(root)
            .map_err(|err| generic(err.to_string()))?;

        Ok((root, desc.space, desc.slot as usize, desc.len()))
    }

    /// `D = A * B + C` for every plane of the block, accumulated in `f32`.
    ///
    /// Operands are gathered into whole tiles through the register layout, and the result is
    /// scattered back through it.
    fn mma(
        &self,
        position: usize,
        node: &Node,
        def: &MmaDefinition,
        state: &BlockState,
    ) -> Result<Vec<f64>, ExecutionError> {
        let layout = self
            .kernel
            .layouts
            .get(&NodeId::new(position))
            .ok_or_else(|| generic(format!("{def} was not compiled")))?;
        let (m, n, k) = (
            def.size.m() as usize,
            def.size.n() as usize,
            def.size.k() as usize,
        );
        let plane_dim = self.kernel.plane_dim as usize;

        let a_len = layout.elements_per_lane(MatrixIdent::A) as usize;
        let b_len = layout.elements_per_lane(MatrixIdent::B) as usize;
        let c_len = layout.elements_per_lane(MatrixIdent::Accumulator) as usize;
        if node.inputs.len() != a_len + b_len + c_len {
            return Err(generic(format!(
                "{def} takes {} operands, got {}",
                a_len + b_len + c_len,
                node.inputs.len()
            )));
        }
        let operands = [
            (MatrixIdent::A, 0..a_len, k),
            (MatrixIdent::B, a_len..a_len + b_len, n),
            (MatrixIdent::Accumulator, a_len + b_len..node.inputs.len(), n),
        ];

        let mut out = vec![0.0; self.threads * c_len];
        for plane in 0..self.threads / plane_dim {
            let mut tiles = [vec![0f32; m * k], vec![0f32; k * n], vec![0f32; m * n]];

            for lane in 0..plane_dim {
                let thread = plane * plane_dim + lane;
                for ((ident, inputs, cols), tile) in operands.iter().zip(tiles.iter_mut()) {
                    for (nth, input) in node.inputs[inputs.clone()].iter().enumerate() {
                        let (row, col) = position_of(layout.as_ref(), lane, nth, *ident)?;
                        tile[row * cols + col] = state.values[input.index()][thread] as f32;
                    }
                }
            }

            let [a, b, c] = &tiles;
            for lane in 0..plane_dim {
                let thread = plane * plane_dim + lane;
                for nth in 0..c_len {
                    let (row, col) =
                        position_of(layout.as_ref(), lane, nth, MatrixIdent::Accumulator)?;
                    let mut sum = c[row * n + col];
                    for kk in 0..k {
                        sum += a[row * k + kk] * b[kk * n + col];
                    }
                    out[thread * c_len + nth] = def.cd_type.round(sum as f64);
                }
            }
        }

        Ok(out)
    }
}

fn position_of(
    layout: &dyn FragmentLayout,
    lane: usize,
    nth: usize,
    ident: MatrixIdent,
) -> Result<(usize, usize), ExecutionError> {
    layout
        .position(lane as u32, nth as u32, ident)
        .map(|(row, col)| (row as usize, col as usize))
        .ok_or_else(|| generic(format!("{:?} has no position for lane {lane}", layout.kind())))
}

fn memory(
    memory: &HashMap<NodeId, Vec<f64>>,
    root: NodeId,
) -> Result<&Vec<f64>, ExecutionError> {
    memory
        .get(&root)
        .ok_or_else(|| generic(format!("Buffer {root:?} is not allocated")))
}

fn memory_mut(
    memory: &mut HashMap<NodeId, Vec<f64>>,
    root: NodeId,
) -> Result<&mut Vec<f64>, ExecutionError> {
    memory
        .get_mut(&root)
        .ok_or_else(|| generic(format!("Buffer {root:?} is not allocated")))
}

fn generic(reason: String) -> ExecutionError {
    ExecutionError::Generic { reason }
}
