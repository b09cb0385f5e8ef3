use core::ops::Index;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use petgraph::{Direction, stable_graph::StableDiGraph, visit::NodeIndexable};
use smallvec::SmallVec;

use crate::{
    AddressSpace, BufferDesc, Elem, Expr, GraphError, MmaDefinition, Node, NodeId, Operation,
    Range, RangeId, RangeKind,
};

/// Kind of a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The target consumes the value of the source.
    Data,
    /// The target happens after the source, without consuming it.
    Order,
}

/// An append-only operation graph.
///
/// Nodes are numbered in emission order, which is always a valid program order: every node is
/// emitted after its inputs and ordering dependencies, and range bodies are the nodes emitted
/// between a range's `Range` and `End` nodes.
#[derive(Debug, Clone, Default)]
pub struct OpGraph {
    graph: StableDiGraph<Node, EdgeKind>,
    ranges: Vec<Range>,
    open: Vec<RangeId>,
}

/// A set of nodes of one graph.
#[derive(Debug, Clone)]
pub struct NodeSet {
    members: Vec<bool>,
}

impl NodeSet {
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.get(node.index()).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members
            .iter()
            .enumerate()
            .filter(|(_, member)| **member)
            .map(|(index, _)| NodeId::new(index))
    }
}

impl OpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a buffer in any address space.
    pub fn buffer(&mut self, desc: BufferDesc) -> NodeId {
        let space = desc.space;
        let elem = desc.elem;
        let shape = desc.shape.clone();

        self.push(Operation::Buffer(desc), &[], &[], space, elem, shape)
    }

    /// Open a range and return its id with the expression of its current value.
    ///
    /// Unrolled ranges must go through [`unrolled`](Self::unrolled) instead.
    pub fn open_range<S: Into<String>>(
        &mut self,
        name: S,
        size: u32,
        kind: RangeKind,
    ) -> (RangeId, Expr) {
        let id = self.register_range(name.into(), size, kind);
        self.push(
            Operation::Range(id),
            &[],
            &[],
            AddressSpace::Register,
            Elem::U32,
            vec![],
        );
        self.open.push(id);

        log::trace!("Opened {}", self.ranges[id.0 as usize]);
        (id, Expr::range(id))
    }

    /// Register a fully-unrolled axis and return its literal indices.
    ///
    /// Unrolled axes never appear in the graph as nodes, the caller emits one copy of the body
    /// per index.
    pub fn unrolled<S: Into<String>>(&mut self, name: S, size: u32) -> core::ops::Range<u32> {
        self.register_range(name.into(), size, RangeKind::Unroll);
        0..size
    }

    /// Close the innermost open range, ordered after `after`.
    pub fn close_range(&mut self, range: RangeId, after: &[NodeId]) -> Result<NodeId, GraphError> {
        match self.open.last() {
            Some(innermost) if *innermost == range => {}
            expected => {
                return Err(GraphError::UnbalancedRange {
                    expected: expected.copied(),
                    found: range,
                });
            }
        }

        let node = self.push(
            Operation::End(range),
            &[],
            after,
            AddressSpace::Register,
            Elem::U32,
            vec![],
        );
        self.open.pop();

        Ok(node)
    }

    pub fn constant(&mut self, value: f64, elem: Elem) -> NodeId {
        self.push(
            Operation::Const(elem.round(value)),
            &[],
            &[],
            AddressSpace::Register,
            elem,
            vec![],
        )
    }

    /// Read one element of a buffer into a register.
    pub fn load(&mut self, buffer: NodeId, index: Expr) -> Result<NodeId, GraphError> {
        let desc = self.buffer_desc(buffer)?;
        let elem = desc.elem;
        self.check_open(&index, "load")?;

        Ok(self.push(
            Operation::Load { index },
            &[buffer],
            &[],
            AddressSpace::Register,
            elem,
            vec![],
        ))
    }

    /// Write one element of a buffer. The value must already have the buffer's element type.
    pub fn store(
        &mut self,
        buffer: NodeId,
        index: Expr,
        value: NodeId,
    ) -> Result<NodeId, GraphError> {
        let desc = self.buffer_desc(buffer)?;
        let (space, elem) = (desc.space, desc.elem);
        let value_elem = self[value].elem;
        if value_elem != elem {
            return Err(GraphError::ElemMismatch {
                buffer: elem,
                value: value_elem,
            });
        }
        self.check_open(&index, "store")?;

        Ok(self.push(
            Operation::Store { index },
            &[buffer, value],
            &[],
            space,
            elem,
            vec![],
        ))
    }

    pub fn cast(&mut self, value: NodeId, elem: Elem) -> NodeId {
        let shape = self[value].shape.clone();
        self.push(
            Operation::Cast,
            &[value],
            &[],
            AddressSpace::Register,
            elem,
            shape,
        )
    }

    /// Emit one tensor-core instruction. The result is a vector of `c.len()` accumulator values.
    pub fn mma(
        &mut self,
        def: MmaDefinition,
        a: &[NodeId],
        b: &[NodeId],
        c: &[NodeId],
    ) -> NodeId {
        let inputs: Vec<NodeId> = a.iter().chain(b).chain(c).copied().collect();
        self.push(
            Operation::Mma(def),
            &inputs,
            &[],
            AddressSpace::Register,
            def.cd_type,
            vec![c.len() as u32],
        )
    }

    pub fn extract(&mut self, vector: NodeId, index: u32) -> NodeId {
        let elem = self[vector].elem;
        self.push(
            Operation::Extract { index },
            &[vector],
            &[],
            AddressSpace::Register,
            elem,
            vec![],
        )
    }

    /// Block-wide barrier ordered after `after`.
    pub fn barrier(&mut self, after: &[NodeId]) -> NodeId {
        self.push(
            Operation::Barrier,
            &[],
            after,
            AddressSpace::Shared,
            Elem::U32,
            vec![],
        )
    }

    /// Re-bind `buffer` so readers observe it after `deps` completed.
    pub fn after(&mut self, buffer: NodeId, deps: &[NodeId]) -> Result<NodeId, GraphError> {
        let desc = self.buffer_desc(buffer)?;
        let (space, elem, shape) = (desc.space, desc.elem, desc.shape.clone());

        Ok(self.push(Operation::After, &[buffer], deps, space, elem, shape))
    }

    /// Bundle independent nodes into one.
    pub fn group(&mut self, members: &[NodeId]) -> NodeId {
        self.push(
            Operation::Group,
            &[],
            members,
            AddressSpace::Register,
            Elem::U32,
            vec![],
        )
    }

    /// Terminate the graph. Every range must be closed.
    pub fn sink(&mut self, after: &[NodeId]) -> Result<NodeId, GraphError> {
        if !self.open.is_empty() {
            return Err(GraphError::OpenRanges(self.open.clone()));
        }

        Ok(self.push(
            Operation::Sink,
            &[],
            after,
            AddressSpace::Global,
            Elem::U32,
            vec![],
        ))
    }

    pub fn get(&self, node: NodeId) -> Option<&Node> {
        self.graph.node_weight(node)
    }

    /// Nodes in emission order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.graph
            .node_indices()
            .map(move |index| (index, &self.graph[index]))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn range(&self, id: RangeId) -> Option<&Range> {
        self.ranges.get(id.0 as usize)
    }

    pub fn open_ranges(&self) -> &[RangeId] {
        &self.open
    }

    /// Follow re-bindings back to the buffer declaration.
    pub fn root_buffer(&self, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            let weight = self.get(current)?;
            match weight.op {
                Operation::Buffer(_) => return Some(current),
                Operation::After => current = *weight.inputs.first()?,
                _ => return None,
            }
        }
    }

    /// Description of the buffer a node refers to, following re-bindings.
    pub fn buffer_desc(&self, node: NodeId) -> Result<&BufferDesc, GraphError> {
        let root = self
            .root_buffer(node)
            .ok_or(GraphError::NotABuffer(node))?;

        match &self.graph[root].op {
            Operation::Buffer(desc) => Ok(desc),
            _ => Err(GraphError::NotABuffer(node)),
        }
    }

    /// Every buffer declared in the given address space.
    pub fn buffers(&self, space: AddressSpace) -> impl Iterator<Item = (NodeId, &BufferDesc)> + '_ {
        self.nodes().filter_map(move |(id, node)| match &node.op {
            Operation::Buffer(desc) if desc.space == space => Some((id, desc)),
            _ => None,
        })
    }

    /// Nodes the given node transitively depends on through data or ordering edges.
    pub fn ancestors(&self, node: NodeId) -> NodeSet {
        let mut members = vec![false; self.graph.node_bound()];
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            for parent in self.graph.neighbors_directed(current, Direction::Incoming) {
                if !members[parent.index()] {
                    members[parent.index()] = true;
                    stack.push(parent);
                }
            }
        }

        NodeSet { members }
    }

    /// Nodes emitted between the `Range` and `End` nodes of a range.
    pub fn range_body(&self, range: RangeId) -> Vec<NodeId> {
        let mut inside = false;
        let mut body = Vec::new();

        for (id, node) in self.nodes() {
            match node.op {
                Operation::Range(current) if current == range => inside = true,
                Operation::End(current) if current == range => break,
                _ if inside => body.push(id),
                _ => {}
            }
        }

        body
    }

    fn register_range(&mut self, name: String, size: u32, kind: RangeKind) -> RangeId {
        let id = RangeId(self.ranges.len() as u32);
        self.ranges.push(Range {
            id,
            name,
            size,
            kind,
        });
        id
    }

    fn check_open(&self, index: &Expr, node_kind: &'static str) -> Result<(), GraphError> {
        match index.ranges().into_iter().find(|id| !self.open.contains(id)) {
            Some(range) => Err(GraphError::RangeNotOpen { range, node_kind }),
            None => Ok(()),
        }
    }

    fn push(
        &mut self,
        op: Operation,
        inputs: &[NodeId],
        after: &[NodeId],
        space: AddressSpace,
        elem: Elem,
        shape: Vec<u32>,
    ) -> NodeId {
        let node = self.graph.add_node(Node {
            op,
            inputs: SmallVec::from_slice(inputs),
            after: SmallVec::from_slice(after),
            space,
            elem,
            shape,
            scope: self.open.clone(),
        });

        for input in inputs {
            self.graph.add_edge(*input, node, EdgeKind::Data);
        }
        for dep in after {
            self.graph.add_edge(*dep, node, EdgeKind::Order);
        }

        node
    }
}

impl Index<NodeId> for OpGraph {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.graph[index]
    }
}
