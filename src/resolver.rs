//! Per-rank I/O resolution: whether a given rank of a collective produces
//! an input or output buffer, and with what shape. Downstream regst sizing
//! depends on these answers, so they are pure functions of the
//! [`RankDescriptor`].

use crate::descriptor::{OpKind, RankDescriptor};
use crate::error::{PlanError, Result};
use crate::shape::Shape;

/// Whether this rank contributes an input buffer to the collective.
pub fn op_has_input(rank_desc: &RankDescriptor) -> bool {
    match rank_desc.op().kind() {
        OpKind::AllReduce | OpKind::Reduce | OpKind::AllGather | OpKind::ReduceScatter => true,
        OpKind::Broadcast => rank_desc.is_root(),
    }
}

/// Whether this rank receives an output buffer from the collective.
pub fn op_has_output(rank_desc: &RankDescriptor) -> bool {
    match rank_desc.op().kind() {
        OpKind::AllReduce | OpKind::Broadcast | OpKind::AllGather | OpKind::ReduceScatter => true,
        OpKind::Reduce => rank_desc.is_root(),
    }
}

/// The shape of this rank's input buffer. Calling this for a rank without
/// an input is a caller bug.
pub fn op_input_shape(rank_desc: &RankDescriptor) -> Result<Shape> {
    if !op_has_input(rank_desc) {
        return Err(PlanError::InvalidArgument(format!(
            "rank {} of {} has no input",
            rank_desc.rank(),
            rank_desc.op().kind()
        )));
    }
    match rank_desc.op().kind() {
        OpKind::AllReduce | OpKind::Reduce | OpKind::Broadcast | OpKind::ReduceScatter => {
            Ok(rank_desc.op().logical_shape())
        }
        OpKind::AllGather => rank_partition(rank_desc),
    }
}

/// The shape of this rank's output buffer. Calling this for a rank without
/// an output is a caller bug.
pub fn op_output_shape(rank_desc: &RankDescriptor) -> Result<Shape> {
    if !op_has_output(rank_desc) {
        return Err(PlanError::InvalidArgument(format!(
            "rank {} of {} has no output",
            rank_desc.rank(),
            rank_desc.op().kind()
        )));
    }
    match rank_desc.op().kind() {
        OpKind::AllReduce | OpKind::Reduce | OpKind::Broadcast | OpKind::AllGather => {
            Ok(rank_desc.op().logical_shape())
        }
        OpKind::ReduceScatter => rank_partition(rank_desc),
    }
}

fn rank_partition(rank_desc: &RankDescriptor) -> Result<Shape> {
    rank_desc
        .op()
        .logical_shape()
        .dim0_partition(rank_desc.rank() as usize, rank_desc.op().num_ranks())
}
