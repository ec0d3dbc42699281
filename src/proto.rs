//! Structured plan messages emitted by
//! [`RingAllReduceNode::to_proto`](crate::node::RingAllReduceNode::to_proto).
//! These are the unit the external graph engine schedules onto a device
//! thread/stream; the wire encoding of the surrounding plan is the
//! engine's concern.

use serde::{Deserialize, Serialize};

use crate::node::{LogicalBlobId, MemCase, ParallelContext, TaskType};
use crate::shape::Shape;

/// One ring as serialized into the plan: the cycle plus the node ids on
/// the send and receive side of the local hop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingLinkConf {
    pub ring_next: Vec<i64>,
    pub send_to: usize,
    pub recv_from: usize,
}

/// Operator configuration for one ring's local hop: combine the locally
/// held partial result with the data received from `recv_from_rank`, then
/// forward the combined partial to `send_to_rank`. Derived mechanically
/// from the node identity, the rank-resolved shape and the ring adjacency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingBoxingOpConf {
    pub name: String,
    pub lbi: LogicalBlobId,
    pub ring_index: usize,
    pub send_to_rank: i64,
    pub recv_from_rank: i64,
    /// Element range of the total data volume this ring pipelines.
    pub partition_offset: i64,
    pub partition_len: i64,
    pub out_shape: Shape,
}

/// Complete serialized description of one ring all-reduce execution node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProto {
    pub task_id: usize,
    pub task_type: TaskType,
    pub machine_id: i64,
    pub thrd_id: i64,
    pub lbi: LogicalBlobId,
    pub parallel_ctx: ParallelContext,
    pub rings: Vec<RingLinkConf>,
    pub op_confs: Vec<RingBoxingOpConf>,
    pub mem_case: MemCase,
    /// Pipeline steps this node's output represents. Rings are parallel
    /// staged pipelines, so steps do not multiply across rings.
    pub time_shape: Shape,
}
