//! End-to-end planning scenarios: a full 4-device ring all-reduce, a
//! reduce-scatter shape resolution pass, and rejection of a broken ring.

use std::collections::{HashMap, HashSet};

use ringcc::resolver::{op_has_input, op_has_output, op_input_shape, op_output_shape};
use ringcc::{
    build_uniform_rings, DataType, DeviceDescriptor, DeviceSet, DeviceType, GraphContext,
    LogicalBlobId, MemCase, NodeId, OpDescriptor, OpKind, ParallelContext, PlanError,
    RankDescriptor, RegstId, RingAllReduceNode, RingPlanConfig, Shape,
};

#[derive(Default)]
struct EngineTable {
    next_regst: usize,
    produced: HashMap<NodeId, RegstId>,
    edges: Vec<(NodeId, NodeId, RegstId)>,
    consumed: Vec<(NodeId, RegstId)>,
    host_regsts: HashSet<RegstId>,
    shapes: HashMap<RegstId, Shape>,
}

impl GraphContext for EngineTable {
    fn produce_regst(&mut self, producer: NodeId, _lbi: &LogicalBlobId, shape: &Shape) -> RegstId {
        let regst = RegstId(self.next_regst);
        self.next_regst += 1;
        self.produced.insert(producer, regst);
        self.shapes.insert(regst, shape.clone());
        regst
    }

    fn bind_edge(&mut self, from: NodeId, to: NodeId, regst: RegstId) {
        self.edges.push((from, to, regst));
    }

    fn consume_regst(&mut self, consumer: NodeId, regst: RegstId) {
        self.consumed.push((consumer, regst));
    }

    fn produced_regst(&self, node: NodeId) -> Option<RegstId> {
        self.produced.get(&node).copied()
    }

    fn mem_case(&self, regst: RegstId) -> MemCase {
        if self.host_regsts.contains(&regst) {
            MemCase::HostMem
        } else {
            MemCase::DeviceMem { device_id: 0 }
        }
    }
}

fn lbi() -> LogicalBlobId {
    LogicalBlobId::new("dense1.weight.grad", "out")
}

/// Scenario A: 4-device all-reduce, one ring `[1, 2, 3, 0]`. Every node
/// produces the full logical shape; build succeeds only once all four
/// peers report produced regsts.
#[test]
fn four_device_all_reduce_single_ring() {
    let n = 4usize;
    let ring_next = vec![1i64, 2, 3, 0];
    let shape = Shape::new([4i64, 8].as_slice()).unwrap();
    let mut graph = EngineTable::default();

    let mut nodes: Vec<RingAllReduceNode> = (0..n)
        .map(|rank| {
            let mut node = RingAllReduceNode::new(NodeId(rank));
            node.init(
                rank as i64,
                0,
                lbi(),
                shape.clone(),
                ParallelContext { rank: rank as i64, num_ranks: n as i64 },
            )
            .unwrap();
            let send_to = NodeId(ring_next[rank] as usize);
            let recv_from = NodeId(ring_next.iter().position(|&x| x as usize == rank).unwrap());
            node.add_ring(ring_next.clone(), send_to, recv_from).unwrap();
            node
        })
        .collect();

    // Upstream inputs exist before any ring node produces.
    let in_regsts: Vec<RegstId> = (0..n)
        .map(|rank| graph.produce_regst(NodeId(100 + rank), &lbi(), &shape))
        .collect();

    // Produce one node first: nobody can be ready until all four are done.
    nodes[0].produce_regsts_and_bind_edges(&mut graph).unwrap();
    nodes[0].consume_regsts(&mut graph, in_regsts[0]).unwrap();
    assert!(!nodes[0].is_ready_for_build(&graph).unwrap());

    for rank in 1..n {
        nodes[rank].produce_regsts_and_bind_edges(&mut graph).unwrap();
        nodes[rank].consume_regsts(&mut graph, in_regsts[rank]).unwrap();
    }

    for (rank, node) in nodes.iter_mut().enumerate() {
        assert!(node.is_ready_for_build(&graph).unwrap());
        node.build_exec_graph_and_regsts(&mut graph).unwrap();
        let proto = node.to_proto().unwrap();

        // produced output shape equals the full input shape
        let out_regst = graph.produced_regst(NodeId(rank)).unwrap();
        assert_eq!(graph.shapes[&out_regst], shape);
        assert_eq!(proto.op_confs.len(), 1);
        assert_eq!(proto.op_confs[0].partition_offset, 0);
        assert_eq!(proto.op_confs[0].partition_len, shape.elem_cnt());
        assert_eq!(proto.rings[0].ring_next, ring_next);
        assert_eq!(proto.op_confs[0].send_to_rank, ring_next[rank]);
    }

    // every node consumed its upstream input and its ring recv regst
    for rank in 0..n {
        let recv_peer = NodeId(ring_next.iter().position(|&x| x as usize == rank).unwrap());
        let recv_regst = graph.produced_regst(recv_peer).unwrap();
        assert!(graph.consumed.contains(&(NodeId(rank), in_regsts[rank])));
        assert!(graph.consumed.contains(&(NodeId(rank), recv_regst)));
    }
}

/// Scenario B: reduce-scatter over 3 devices, 9 elements along the leading
/// dimension. Each rank's output partition is 3; the partitions sum to 9.
#[test]
fn reduce_scatter_partitions_conserve_elements() {
    let devices = DeviceSet::new(
        (0..3i64)
            .map(|i| DeviceDescriptor::new(i, DeviceType::Cuda, 0))
            .collect(),
    )
    .unwrap();
    let op =
        OpDescriptor::new(OpKind::ReduceScatter, 9, DataType::Float32, devices, None).unwrap();

    let mut total = 0i64;
    for rank in 0..3 {
        let rank_desc = RankDescriptor::new(op.clone(), rank).unwrap();
        assert!(op_has_input(&rank_desc));
        assert!(op_has_output(&rank_desc));
        assert_eq!(op_input_shape(&rank_desc).unwrap(), Shape::flat(9));
        let out = op_output_shape(&rank_desc).unwrap();
        assert_eq!(out.at(0), 3);
        total += out.elem_cnt();
    }
    assert_eq!(total, 9);
}

/// Scenario C: `[1, 0, 3, 2]` is two disjoint 2-cycles, not one 4-cycle.
#[test]
fn disjoint_sub_cycles_rejected() {
    let mut node = RingAllReduceNode::new(NodeId(0));
    node.init(
        0,
        0,
        lbi(),
        Shape::flat(8),
        ParallelContext { rank: 0, num_ranks: 4 },
    )
    .unwrap();
    assert!(matches!(
        node.add_ring(vec![1, 0, 3, 2], NodeId(1), NodeId(1)),
        Err(PlanError::InvalidTopology(_))
    ));
    assert!(node.rings().is_empty());
}

/// Multiple rings from the uniform builder drive a conserving partition of
/// the data volume, and the emitted plan message serializes cleanly.
#[test]
fn multi_ring_plan_serializes() {
    let n = 2usize;
    let rings = build_uniform_rings(n, RingPlanConfig { num_rings: 2 }).unwrap();
    let shape = Shape::flat(10);
    let mut graph = EngineTable::default();

    let mut nodes: Vec<RingAllReduceNode> = (0..n)
        .map(|rank| {
            let mut node = RingAllReduceNode::new(NodeId(rank));
            node.init(
                0,
                rank as i64,
                lbi(),
                shape.clone(),
                ParallelContext { rank: rank as i64, num_ranks: n as i64 },
            )
            .unwrap();
            for ring_next in &rings {
                let send_to = NodeId(ring_next[rank] as usize);
                let recv_from =
                    NodeId(ring_next.iter().position(|&x| x as usize == rank).unwrap());
                node.add_ring(ring_next.clone(), send_to, recv_from).unwrap();
            }
            node
        })
        .collect();

    let in_regsts: Vec<RegstId> = (0..n)
        .map(|rank| graph.produce_regst(NodeId(100 + rank), &lbi(), &shape))
        .collect();
    for (rank, node) in nodes.iter_mut().enumerate() {
        node.produce_regsts_and_bind_edges(&mut graph).unwrap();
        node.consume_regsts(&mut graph, in_regsts[rank]).unwrap();
    }

    let proto = {
        let node = &mut nodes[0];
        assert!(node.is_ready_for_build(&graph).unwrap());
        node.build_exec_graph_and_regsts(&mut graph).unwrap();
        node.to_proto().unwrap()
    };

    assert_eq!(proto.op_confs.len(), 2);
    let total: i64 = proto.op_confs.iter().map(|conf| conf.partition_len).sum();
    assert_eq!(total, 10);
    assert_eq!(proto.op_confs[0].partition_len, 5);
    // two rings, one pipeline step each
    assert_eq!(proto.time_shape, Shape::flat(2));

    let json = serde_json::to_value(&proto).unwrap();
    assert_eq!(json["task_type"], "RingBoxing");
    assert_eq!(json["op_confs"][1]["ring_index"], 1);
}
