use core::fmt::Display;

use alloc::string::String;
use alloc::vec::Vec;

use crate::{Node, NodeId, OpGraph, Operation};

fn id(node: &NodeId) -> String {
    alloc::format!("%{}", node.index())
}

fn list(nodes: &[NodeId]) -> String {
    nodes.iter().map(id).collect::<Vec<_>>().join(", ")
}

impl Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operation::Buffer(desc) => write!(
                f,
                "buffer {} {} slot({}) {:?}",
                desc.space, desc.name, desc.slot, desc.shape
            ),
            Operation::Range(range) => write!(f, "range {range}"),
            Operation::End(range) => write!(f, "end {range}"),
            Operation::Const(value) => write!(f, "const {value}"),
            Operation::Load { index } => write!(f, "load [{index}]"),
            Operation::Store { index } => write!(f, "store [{index}]"),
            Operation::Cast => f.write_str("cast"),
            Operation::Mma(def) => write!(f, "{def}"),
            Operation::Extract { index } => write!(f, "extract {index}"),
            Operation::Barrier => f.write_str("barrier"),
            Operation::After => f.write_str("after"),
            Operation::Group => f.write_str("group"),
            Operation::Sink => f.write_str("sink"),
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, "({})", list(&self.inputs))?;
        }
        if !self.after.is_empty() {
            write!(f, " after [{}]", list(&self.after))?;
        }
        write!(f, ": {} {}", self.space, self.elem)?;
        if !self.shape.is_empty() {
            write!(f, "{:?}", self.shape)?;
        }
        Ok(())
    }
}

impl Display for OpGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "# Ranges:")?;
        for range in self.ranges() {
            writeln!(f, "{range};")?;
        }
        f.write_str("\n")?;

        for (node_id, node) in self.nodes() {
            let depth = match node.op {
                Operation::End(_) => node.scope.len().saturating_sub(1),
                _ => node.scope.len(),
            };
            for _ in 0..depth {
                f.write_str("    ")?;
            }
            writeln!(f, "{} = {node};", id(&node_id))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{AddressSpace, BufferDesc, Elem, OpGraph, RangeKind};
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn nested_nodes_are_indented() {
        let mut graph = OpGraph::new();
        let buffer = graph.buffer(BufferDesc {
            name: "lhs".to_string(),
            slot: 0,
            space: AddressSpace::Global,
            shape: vec![8],
            elem: Elem::F16,
        });
        let (range, value) = graph.open_range("i", 8, RangeKind::Thread);
        let load = graph.load(buffer, value).unwrap();
        graph.close_range(range, &[load]).unwrap();

        let text = graph.to_string();
        assert!(text.contains("r0 = thread(0..8) `i`;"));
        assert!(text.contains("%0 = buffer global lhs slot(0) [8]: global f16[8];"));
        assert!(text.contains("    %2 = load [r0](%0): reg f16;"));
        assert!(text.contains("\n%3 = end r0 after [%2]: reg u32;"));
    }
}
