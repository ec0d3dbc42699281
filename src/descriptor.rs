//! Value types describing one collective operation: which devices
//! participate, in what order, over how many elements. These are immutable
//! once constructed and are compared/hashed structurally, e.g. to
//! deduplicate identical collective groups across the graph.

use std::collections::HashSet;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::shape::Shape;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Cuda,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DataType {
    Float16,
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
}

/// Semantic kind of a collective operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpKind {
    AllReduce,
    Reduce,
    Broadcast,
    AllGather,
    ReduceScatter,
}

impl OpKind {
    /// Rooted kinds designate one rank as the source (broadcast) or sink
    /// (reduce) of the full result.
    pub fn has_root(self) -> bool {
        matches!(self, OpKind::Reduce | OpKind::Broadcast)
    }
}

impl Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::AllReduce => write!(f, "all_reduce"),
            OpKind::Reduce => write!(f, "reduce"),
            OpKind::Broadcast => write!(f, "broadcast"),
            OpKind::AllGather => write!(f, "all_gather"),
            OpKind::ReduceScatter => write!(f, "reduce_scatter"),
        }
    }
}

impl TryFrom<i32> for OpKind {
    type Error = PlanError;

    fn try_from(x: i32) -> Result<OpKind> {
        match x {
            0 => Ok(OpKind::AllReduce),
            1 => Ok(OpKind::Reduce),
            2 => Ok(OpKind::Broadcast),
            3 => Ok(OpKind::AllGather),
            4 => Ok(OpKind::ReduceScatter),
            _ => Err(PlanError::UnsupportedOperation(x)),
        }
    }
}

/// Identity of one compute device. Equality is field-wise; the hash
/// combines the three fields in fixed order so equal descriptors hash
/// equally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub machine_id: i64,
    pub device_type: DeviceType,
    pub device_id: i64,
}

impl DeviceDescriptor {
    pub fn new(machine_id: i64, device_type: DeviceType, device_id: i64) -> DeviceDescriptor {
        DeviceDescriptor { machine_id, device_type, device_id }
    }
}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.machine_id.hash(state);
        self.device_type.hash(state);
        self.device_id.hash(state);
    }
}

/// Ordered device membership of a collective. Order is semantically
/// significant: position defines rank assignment, so the same devices in a
/// different order are a different set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceSet {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceSet {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Result<DeviceSet> {
        if devices.is_empty() {
            return Err(PlanError::InvalidTopology("empty device set".to_string()));
        }
        let mut seen = HashSet::with_capacity(devices.len());
        for device in &devices {
            if !seen.insert(*device) {
                return Err(PlanError::InvalidTopology(format!(
                    "duplicate device {device:?} in device set"
                )));
            }
        }
        Ok(DeviceSet { devices })
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn size(&self) -> usize {
        self.devices.len()
    }

    /// The rank of `device` within this set, if it is a member.
    pub fn rank_of(&self, device: &DeviceDescriptor) -> Option<usize> {
        self.devices.iter().position(|d| d == device)
    }
}

impl Hash for DeviceSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for device in &self.devices {
            device.hash(state);
        }
    }
}

/// One collective operation instance over a fixed device membership.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct OpDescriptor {
    kind: OpKind,
    element_count: i64,
    element_type: DataType,
    device_set: DeviceSet,
    root_rank: Option<i32>,
}

impl OpDescriptor {
    pub fn new(
        kind: OpKind,
        element_count: i64,
        element_type: DataType,
        device_set: DeviceSet,
        root_rank: Option<i32>,
    ) -> Result<OpDescriptor> {
        if element_count < 0 {
            return Err(PlanError::InvalidArgument(format!(
                "negative element count {element_count}"
            )));
        }
        match (kind.has_root(), root_rank) {
            (true, Some(root)) => {
                if root < 0 || root as usize >= device_set.size() {
                    return Err(PlanError::InvalidArgument(format!(
                        "root rank {root} outside [0, {})",
                        device_set.size()
                    )));
                }
            }
            (true, None) => {
                return Err(PlanError::InvalidArgument(format!(
                    "{kind} requires a root rank"
                )));
            }
            (false, Some(root)) => {
                return Err(PlanError::InvalidArgument(format!(
                    "{kind} does not take a root rank (got {root})"
                )));
            }
            (false, None) => {}
        }
        Ok(OpDescriptor { kind, element_count, element_type, device_set, root_rank })
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn element_count(&self) -> i64 {
        self.element_count
    }

    pub fn element_type(&self) -> DataType {
        self.element_type
    }

    pub fn device_set(&self) -> &DeviceSet {
        &self.device_set
    }

    pub fn root_rank(&self) -> Option<i32> {
        self.root_rank
    }

    pub fn num_ranks(&self) -> usize {
        self.device_set.size()
    }

    /// The full logical shape as seen by ranks that hold the whole tensor.
    pub fn logical_shape(&self) -> Shape {
        Shape::flat(self.element_count)
    }
}

/// One participant's view of an [`OpDescriptor`]: the descriptor plus this
/// participant's rank within the device set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RankDescriptor {
    op: OpDescriptor,
    rank: i32,
}

impl RankDescriptor {
    pub fn new(op: OpDescriptor, rank: i32) -> Result<RankDescriptor> {
        if rank < 0 || rank as usize >= op.num_ranks() {
            return Err(PlanError::InvalidArgument(format!(
                "rank {rank} outside [0, {})",
                op.num_ranks()
            )));
        }
        Ok(RankDescriptor { op, rank })
    }

    pub fn op(&self) -> &OpDescriptor {
        &self.op
    }

    pub fn rank(&self) -> i32 {
        self.rank
    }

    pub fn is_root(&self) -> bool {
        self.op.root_rank() == Some(self.rank)
    }
}
