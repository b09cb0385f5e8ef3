use alloc::vec::Vec;

use crate::{AddressSpace, GraphError, NodeId, NodeSet, OpGraph, Operation, RangeKind};

/// Checks the ordering contract of a finished graph.
///
/// - Every load of a shared or register buffer is ordered after every earlier store to that
///   buffer, unless both indices are literals that differ.
/// - For shared buffers, that ordering goes through a barrier.
/// - A reduce range that both writes and reads a shared buffer ends its body with a barrier
///   ordered after every one of those reads.
pub fn verify(graph: &OpGraph) -> Result<(), GraphError> {
    let barriers: Vec<(NodeId, NodeSet)> = graph
        .nodes()
        .filter(|(_, node)| matches!(node.op, Operation::Barrier))
        .map(|(id, _)| (id, graph.ancestors(id)))
        .collect();

    let mut stores: Vec<(NodeId, NodeId)> = Vec::new();

    for (id, node) in graph.nodes() {
        let Some(buffer) = node.buffer().and_then(|buffer| graph.root_buffer(buffer)) else {
            continue;
        };
        let space = graph.buffer_desc(buffer)?.space;

        match &node.op {
            Operation::Store { .. } => stores.push((id, buffer)),
            Operation::Load { index } if space != AddressSpace::Global => {
                let ancestors = graph.ancestors(id);

                for (store, _) in stores.iter().filter(|(_, target)| *target == buffer) {
                    let disjoint = match (graph[*store].index(), index) {
                        (Some(written), read) => match (written.as_const(), read.as_const()) {
                            (Some(written), Some(read)) => written != read,
                            _ => false,
                        },
                        (None, _) => false,
                    };
                    if disjoint {
                        continue;
                    }

                    if !ancestors.contains(*store) {
                        return Err(GraphError::MissingOrdering {
                            load: id,
                            store: *store,
                            buffer,
                        });
                    }

                    if space == AddressSpace::Shared {
                        let crosses = barriers.iter().any(|(barrier, before)| {
                            ancestors.contains(*barrier) && before.contains(*store)
                        });
                        if !crosses {
                            return Err(GraphError::MissingBarrier {
                                load: id,
                                store: *store,
                                buffer,
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    verify_restage(graph, &barriers)
}

fn verify_restage(graph: &OpGraph, barriers: &[(NodeId, NodeSet)]) -> Result<(), GraphError> {
    for range in graph.ranges() {
        if range.kind != RangeKind::Reduce {
            continue;
        }
        let body = graph.range_body(range.id);

        let shared_access = |id: &NodeId, store: bool| -> Option<(NodeId, NodeId)> {
            let node = &graph[*id];
            if node.op.is_store() != store || !(node.op.is_store() || node.op.is_load()) {
                return None;
            }
            let buffer = graph.root_buffer(node.buffer()?)?;
            let desc = graph.buffer_desc(buffer).ok()?;
            (desc.space == AddressSpace::Shared).then_some((*id, buffer))
        };

        let written: Vec<NodeId> = body
            .iter()
            .filter_map(|id| shared_access(id, true))
            .map(|(_, buffer)| buffer)
            .collect();
        let reads: Vec<(NodeId, NodeId)> = body
            .iter()
            .filter_map(|id| shared_access(id, false))
            .filter(|(_, buffer)| written.contains(buffer))
            .collect();

        for (load, buffer) in reads {
            let synced = barriers
                .iter()
                .any(|(barrier, before)| body.contains(barrier) && before.contains(load));

            if !synced {
                return Err(GraphError::UnsyncedRestage {
                    range: range.id,
                    buffer,
                    load,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferDesc, Elem, Expr};
    use alloc::string::ToString;
    use alloc::vec;

    fn buffer(graph: &mut OpGraph, space: AddressSpace, len: u32) -> NodeId {
        graph.buffer(BufferDesc {
            name: "buf".to_string(),
            slot: 0,
            space,
            shape: vec![len],
            elem: Elem::F32,
        })
    }

    #[test]
    fn shared_read_after_barrier_is_accepted() {
        let mut graph = OpGraph::new();
        let smem = buffer(&mut graph, AddressSpace::Shared, 32);
        let (tid, tid_value) = graph.open_range("tid", 32, RangeKind::Thread);
        let one = graph.constant(1.0, Elem::F32);
        let store = graph.store(smem, tid_value.clone(), one).unwrap();
        let barrier = graph.barrier(&[store]);
        let ready = graph.after(smem, &[barrier]).unwrap();
        let load = graph.load(ready, (tid_value + 1u32) % 32u32).unwrap();
        graph.close_range(tid, &[load]).unwrap();

        assert_eq!(verify(&graph), Ok(()));
    }

    #[test]
    fn shared_read_without_barrier_is_rejected() {
        let mut graph = OpGraph::new();
        let smem = buffer(&mut graph, AddressSpace::Shared, 32);
        let (tid, tid_value) = graph.open_range("tid", 32, RangeKind::Thread);
        let one = graph.constant(1.0, Elem::F32);
        let store = graph.store(smem, tid_value.clone(), one).unwrap();
        let ready = graph.after(smem, &[store]).unwrap();
        let load = graph.load(ready, tid_value).unwrap();
        graph.close_range(tid, &[load]).unwrap();

        assert_eq!(
            verify(&graph),
            Err(GraphError::MissingBarrier {
                load,
                store,
                buffer: smem
            })
        );
    }

    #[test]
    fn unordered_register_read_is_rejected() {
        let mut graph = OpGraph::new();
        let acc = buffer(&mut graph, AddressSpace::Register, 4);
        let zero = graph.constant(0.0, Elem::F32);
        let store = graph.store(acc, Expr::constant(2), zero).unwrap();
        let load = graph.load(acc, Expr::constant(2)).unwrap();

        assert_eq!(
            verify(&graph),
            Err(GraphError::MissingOrdering {
                load,
                store,
                buffer: acc
            })
        );
    }

    #[test]
    fn disjoint_literal_indices_need_no_ordering() {
        let mut graph = OpGraph::new();
        let acc = buffer(&mut graph, AddressSpace::Register, 4);
        let zero = graph.constant(0.0, Elem::F32);
        graph.store(acc, Expr::constant(0), zero).unwrap();
        graph.load(acc, Expr::constant(1)).unwrap();

        assert_eq!(verify(&graph), Ok(()));
    }

    #[test]
    fn restage_without_trailing_barrier_is_rejected() {
        let mut graph = OpGraph::new();
        let smem = buffer(&mut graph, AddressSpace::Shared, 32);
        let (tid, tid_value) = graph.open_range("tid", 32, RangeKind::Thread);
        let (k, _) = graph.open_range("k", 4, RangeKind::Reduce);
        let one = graph.constant(1.0, Elem::F32);
        let store = graph.store(smem, tid_value.clone(), one).unwrap();
        let barrier = graph.barrier(&[store]);
        let ready = graph.after(smem, &[barrier]).unwrap();
        let load = graph.load(ready, (tid_value + 1u32) % 32u32).unwrap();

        let mut unsynced = graph.clone();
        unsynced.close_range(k, &[load]).unwrap();
        assert_eq!(
            verify(&unsynced),
            Err(GraphError::UnsyncedRestage {
                range: k,
                buffer: smem,
                load
            })
        );

        let trailing = graph.barrier(&[load]);
        graph.close_range(k, &[trailing]).unwrap();
        graph.close_range(tid, &[]).unwrap();
        assert_eq!(verify(&graph), Ok(()));
    }
}
