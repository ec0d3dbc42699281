//! Planning of ring-based collective communication for a dataflow-graph
//! compiler: descriptor value types for collective operations over device
//! groups, per-rank shape resolution, ring topology construction, and the
//! ring all-reduce execution node the enclosing graph engine schedules.

use smallvec::SmallVec;

pub type SVec<T, const N: usize = 3> = SmallVec<[T; N]>;

macro_rules! new_usize_type {
    ($visibility: vis, $type_name: ident) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $visibility struct $type_name(pub usize);

        impl From<usize> for $type_name {
            fn from(x: usize) -> $type_name {
                $type_name(x)
            }
        }
    }
}

pub(crate) use new_usize_type;

pub mod descriptor;
pub mod error;
pub mod node;
pub mod proto;
pub mod resolver;
pub mod ring;
pub mod shape;

pub use descriptor::{
    DataType, DeviceDescriptor, DeviceSet, DeviceType, OpDescriptor, OpKind, RankDescriptor,
};
pub use error::{PlanError, Result};
pub use node::{
    GraphContext, LogicalBlobId, MemCase, NodeId, NodeStage, ParallelContext, RegstId,
    RingAllReduceNode, TaskType,
};
pub use ring::{build_uniform_rings, Ring, RingPlanConfig};
pub use shape::Shape;
