//! The ring all-reduce execution node: single-owner mutable state driven
//! through a strict lifecycle by the external graph engine. One node per
//! participating device; peers are referenced by [`NodeId`] into the
//! engine-owned node table.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::proto::{RingBoxingOpConf, RingLinkConf, TaskProto};
use crate::ring::{ring_partition, Ring};
use crate::shape::Shape;

crate::new_usize_type!(pub, NodeId);
crate::new_usize_type!(pub, RegstId);

/// Identity of the logical tensor a node produces.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalBlobId {
    pub op_name: String,
    pub blob_name: String,
}

impl LogicalBlobId {
    pub fn new(op_name: impl Into<String>, blob_name: impl Into<String>) -> LogicalBlobId {
        LogicalBlobId { op_name: op_name.into(), blob_name: blob_name.into() }
    }
}

impl std::fmt::Display for LogicalBlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.op_name, self.blob_name)
    }
}

/// This device's position within the collective.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelContext {
    pub rank: i64,
    pub num_ranks: i64,
}

/// Where a regst's backing memory lives. Collective hops assume direct
/// device-to-device transfer, so consumed regsts must be device-resident.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemCase {
    DeviceMem { device_id: i64 },
    HostMem,
}

impl MemCase {
    pub fn is_device_resident(self) -> bool {
        matches!(self, MemCase::DeviceMem { .. })
    }
}

/// Closed set of node kinds the engine schedules. The engine dispatches on
/// this tag rather than holding a base-class pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Compute,
    CopyHd,
    RingBoxing,
}

/// Boundary to the external execution-graph engine: regst allocation keyed
/// by logical blob identity, edge wiring, and memory-placement metadata.
pub trait GraphContext {
    /// Allocates the regst `producer` writes for `lbi`, sized by `shape`.
    fn produce_regst(&mut self, producer: NodeId, lbi: &LogicalBlobId, shape: &Shape) -> RegstId;

    /// Wires a data edge carrying `regst` from `from` to `to`.
    fn bind_edge(&mut self, from: NodeId, to: NodeId, regst: RegstId);

    /// Declares that `consumer` reads `regst`.
    fn consume_regst(&mut self, consumer: NodeId, regst: RegstId);

    /// The regst `node` has produced, if it has reached that point.
    fn produced_regst(&self, node: NodeId) -> Option<RegstId>;

    fn mem_case(&self, regst: RegstId) -> MemCase;
}

/// Lifecycle stage of a [`RingAllReduceNode`]. Transitions are strictly
/// sequential; `Serialized` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeStage {
    Uninitialized,
    Initialized,
    RegstsProduced,
    RegstsConsumed,
    ExecGraphBuilt,
    Serialized,
}

impl NodeStage {
    fn name(self) -> &'static str {
        match self {
            NodeStage::Uninitialized => "uninitialized",
            NodeStage::Initialized => "initialized",
            NodeStage::RegstsProduced => "regsts-produced",
            NodeStage::RegstsConsumed => "regsts-consumed",
            NodeStage::ExecGraphBuilt => "exec-graph-built",
            NodeStage::Serialized => "serialized",
        }
    }
}

/// Execution node for one device's share of a ring all-reduce. Owns the
/// logical tensor identity, the local parallel context and the configured
/// rings, and walks the produce/consume/build/serialize lifecycle the
/// engine drives.
#[derive(Debug)]
pub struct RingAllReduceNode {
    id: NodeId,
    stage: NodeStage,
    machine_id: i64,
    thrd_id: i64,
    lbi: LogicalBlobId,
    logical_shape: Shape,
    parallel_ctx: ParallelContext,
    rings: Vec<Ring>,
    out_regst: Option<RegstId>,
    in_regst: Option<RegstId>,
    recv_regsts: Vec<Option<RegstId>>,
    op_confs: Vec<RingBoxingOpConf>,
    time_shape: Shape,
}

impl RingAllReduceNode {
    pub fn new(id: NodeId) -> RingAllReduceNode {
        RingAllReduceNode {
            id,
            stage: NodeStage::Uninitialized,
            machine_id: 0,
            thrd_id: 0,
            lbi: LogicalBlobId::default(),
            logical_shape: Shape::default(),
            parallel_ctx: ParallelContext::default(),
            rings: vec![],
            out_regst: None,
            in_regst: None,
            recv_regsts: vec![],
            op_confs: vec![],
            time_shape: Shape::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn stage(&self) -> NodeStage {
        self.stage
    }

    pub fn task_type(&self) -> TaskType {
        TaskType::RingBoxing
    }

    pub fn parallel_ctx(&self) -> &ParallelContext {
        &self.parallel_ctx
    }

    pub fn rings(&self) -> &[Ring] {
        &self.rings
    }

    fn expect_stage(&self, expected: NodeStage) -> Result<()> {
        if self.stage != expected {
            return Err(PlanError::InvalidLifecycleTransition {
                expected: expected.name(),
                actual: self.stage.name(),
            });
        }
        Ok(())
    }

    /// Stores identity, shape and this device's rank context.
    pub fn init(
        &mut self,
        machine_id: i64,
        thrd_id: i64,
        lbi: LogicalBlobId,
        logical_shape: Shape,
        parallel_ctx: ParallelContext,
    ) -> Result<()> {
        self.expect_stage(NodeStage::Uninitialized)?;
        if parallel_ctx.num_ranks <= 0 || parallel_ctx.rank < 0 || parallel_ctx.rank >= parallel_ctx.num_ranks {
            return Err(PlanError::InvalidArgument(format!(
                "rank {} outside [0, {})",
                parallel_ctx.rank, parallel_ctx.num_ranks
            )));
        }
        debug!(node = self.id.0, %lbi, rank = parallel_ctx.rank, num_ranks = parallel_ctx.num_ranks, "init ring all-reduce node");
        self.machine_id = machine_id;
        self.thrd_id = thrd_id;
        self.lbi = lbi;
        self.logical_shape = logical_shape;
        self.parallel_ctx = parallel_ctx;
        self.stage = NodeStage::Initialized;
        Ok(())
    }

    /// Registers one more ring over the node's device membership. Rings
    /// freeze once regsts are produced.
    pub fn add_ring(&mut self, ring_next: Vec<i64>, send_to: NodeId, recv_from: NodeId) -> Result<()> {
        self.expect_stage(NodeStage::Initialized)?;
        let ring = Ring::new(ring_next, send_to, recv_from)?;
        if ring.len() != self.parallel_ctx.num_ranks as usize {
            return Err(PlanError::InvalidTopology(format!(
                "ring over {} ranks added to a {}-rank collective",
                ring.len(),
                self.parallel_ctx.num_ranks
            )));
        }
        debug!(node = self.id.0, ring = self.rings.len(), "add ring");
        self.rings.push(ring);
        self.recv_regsts.push(None);
        Ok(())
    }

    /// Allocates the produced regst under this node's blob identity and
    /// binds one outgoing edge per ring. All-reduce: every rank produces
    /// the full logical shape.
    pub fn produce_regsts_and_bind_edges(&mut self, ctx: &mut impl GraphContext) -> Result<()> {
        self.expect_stage(NodeStage::Initialized)?;
        let out_shape = self.logical_shape.clone();
        let regst = ctx.produce_regst(self.id, &self.lbi, &out_shape);
        for ring in &self.rings {
            ctx.bind_edge(self.id, ring.send_to(), regst);
        }
        debug!(node = self.id.0, regst = regst.0, shape = %out_shape, "produced regst");
        self.out_regst = Some(regst);
        self.stage = NodeStage::RegstsProduced;
        Ok(())
    }

    /// Declares the regsts this node reads: its previous-stage input plus
    /// each ring's recv-side regst (those already produced; the rest are
    /// gated by readiness and picked up at build). Consumed regsts are
    /// pinned device-resident.
    pub fn consume_regsts(&mut self, ctx: &mut impl GraphContext, in_regst: RegstId) -> Result<()> {
        self.expect_stage(NodeStage::RegstsProduced)?;
        self.pin_consumed_mem_case(ctx, in_regst)?;
        ctx.consume_regst(self.id, in_regst);
        self.in_regst = Some(in_regst);
        for i in 0..self.rings.len() {
            if let Some(regst) = ctx.produced_regst(self.rings[i].recv_from()) {
                self.pin_consumed_mem_case(ctx, regst)?;
                ctx.consume_regst(self.id, regst);
                self.recv_regsts[i] = Some(regst);
            }
        }
        self.stage = NodeStage::RegstsConsumed;
        Ok(())
    }

    /// Whether every ring peer has produced its regst. `Ok(false)` is
    /// backpressure: the scheduler retries later. A node with zero rings
    /// can never become ready and reports the topology error instead.
    pub fn is_ready_for_build(&self, ctx: &impl GraphContext) -> Result<bool> {
        self.expect_stage(NodeStage::RegstsConsumed)?;
        if self.rings.is_empty() {
            return Err(PlanError::InvalidTopology(
                "ring all-reduce node with zero rings".to_string(),
            ));
        }
        Ok(self.rings.iter().all(|ring| {
            ctx.produced_regst(ring.send_to()).is_some()
                && ctx.produced_regst(ring.recv_from()).is_some()
        }))
    }

    /// Emits one operator configuration per ring: combine the local
    /// partial with the received data, forward the result along the ring.
    /// Also fixes the produced-data time shape at one step per ring
    /// (rings are parallel pipelines, so steps do not compound with hop
    /// count).
    pub fn build_exec_graph_and_regsts(&mut self, ctx: &mut impl GraphContext) -> Result<()> {
        if !self.is_ready_for_build(ctx)? {
            return Err(PlanError::InvalidArgument(
                "build invoked before peer regsts were produced".to_string(),
            ));
        }
        let rank = self.parallel_ctx.rank as usize;
        let partitions = ring_partition(self.logical_shape.elem_cnt(), self.rings.len())?;
        for (i, (ring, &(offset, len))) in self.rings.iter().zip(&partitions).enumerate() {
            if self.recv_regsts[i].is_none() {
                // peer produced after our consume step
                let regst = ctx
                    .produced_regst(ring.recv_from())
                    .ok_or_else(|| PlanError::InvalidArgument(format!(
                        "recv peer {:?} lost its produced regst",
                        ring.recv_from()
                    )))?;
                if !ctx.mem_case(regst).is_device_resident() {
                    return Err(PlanError::IncompatibleMemoryPlacement(format!(
                        "regst {} received on ring {i} is host-resident",
                        regst.0
                    )));
                }
                ctx.consume_regst(self.id, regst);
                self.recv_regsts[i] = Some(regst);
            }
            self.op_confs.push(RingBoxingOpConf {
                name: format!("{}-ring_all_reduce-{}", self.lbi, i),
                lbi: self.lbi.clone(),
                ring_index: i,
                send_to_rank: ring.next_of(rank),
                recv_from_rank: ring.prev_of(rank),
                partition_offset: offset,
                partition_len: len,
                out_shape: self.logical_shape.clone(),
            });
        }
        self.time_shape = Shape::flat(self.rings.len() as i64);
        debug!(node = self.id.0, ops = self.op_confs.len(), "built exec subgraph");
        self.stage = NodeStage::ExecGraphBuilt;
        Ok(())
    }

    /// Terminal serialization. The node freezes; calling again is a
    /// lifecycle error.
    pub fn to_proto(&mut self) -> Result<TaskProto> {
        self.expect_stage(NodeStage::ExecGraphBuilt)?;
        let proto = TaskProto {
            task_id: self.id.0,
            task_type: self.task_type(),
            machine_id: self.machine_id,
            thrd_id: self.thrd_id,
            lbi: self.lbi.clone(),
            parallel_ctx: self.parallel_ctx,
            rings: self
                .rings
                .iter()
                .map(|ring| RingLinkConf {
                    ring_next: ring.ring_next().to_vec(),
                    send_to: ring.send_to().0,
                    recv_from: ring.recv_from().0,
                })
                .collect(),
            op_confs: self.op_confs.clone(),
            mem_case: MemCase::DeviceMem { device_id: self.thrd_id },
            time_shape: self.time_shape.clone(),
        };
        self.stage = NodeStage::Serialized;
        Ok(proto)
    }

    fn pin_consumed_mem_case(&self, ctx: &impl GraphContext, regst: RegstId) -> Result<()> {
        let mem_case = ctx.mem_case(regst);
        if !mem_case.is_device_resident() {
            return Err(PlanError::IncompatibleMemoryPlacement(format!(
                "regst {} consumed by node {} is host-resident",
                regst.0, self.id.0
            )));
        }
        Ok(())
    }
}
