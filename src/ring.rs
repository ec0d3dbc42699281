//! Ring topology for pipelined collective transfer. A ring is a directed
//! cycle over all participating ranks; each configured ring carries a
//! disjoint partition of the tensor's data volume so separate rings can
//! saturate separate network links in parallel.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PlanError, Result};
use crate::node::NodeId;
use crate::shape::{balanced_offset, balanced_part};

/// One ring over the node's device membership. `ring_next[i]` is the rank
/// that rank `i` forwards data to. `send_to`/`recv_from` identify the
/// execution nodes adjacent to the local device's hop; they are indices
/// into the engine-owned node table, never owned references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ring {
    ring_next: Vec<i64>,
    send_to: NodeId,
    recv_from: NodeId,
}

impl Ring {
    /// Validates the single-cycle permutation invariant: following
    /// `ring_next` from any rank visits every rank exactly once before
    /// returning. Sub-cycles, omissions and out-of-range entries are all
    /// [`PlanError::InvalidTopology`].
    pub fn new(ring_next: Vec<i64>, send_to: NodeId, recv_from: NodeId) -> Result<Ring> {
        let n = ring_next.len();
        if n == 0 {
            return Err(PlanError::InvalidTopology("empty ring".to_string()));
        }
        for &next in &ring_next {
            if next < 0 || next as usize >= n {
                return Err(PlanError::InvalidTopology(format!(
                    "ring_next entry {next} outside [0, {n})"
                )));
            }
        }
        let mut visited = vec![false; n];
        let mut cur = 0usize;
        for _ in 0..n {
            cur = ring_next[cur] as usize;
            if visited[cur] {
                return Err(PlanError::InvalidTopology(format!(
                    "ring_next {ring_next:?} is not a single cycle (revisits rank {cur})"
                )));
            }
            visited[cur] = true;
        }
        if cur != 0 {
            // unreachable given the revisit check, kept as a guard
            return Err(PlanError::InvalidTopology(format!(
                "ring_next {ring_next:?} does not return to its start"
            )));
        }
        trace!(len = n, ?send_to, ?recv_from, "ring validated");
        Ok(Ring { ring_next, send_to, recv_from })
    }

    pub fn len(&self) -> usize {
        self.ring_next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring_next.is_empty()
    }

    pub fn ring_next(&self) -> &[i64] {
        &self.ring_next
    }

    /// The rank that `rank` forwards to on this ring.
    pub fn next_of(&self, rank: usize) -> i64 {
        self.ring_next[rank]
    }

    /// The rank that forwards to `rank` on this ring.
    pub fn prev_of(&self, rank: usize) -> i64 {
        self.ring_next
            .iter()
            .position(|&next| next as usize == rank)
            .expect("ring_next is a validated permutation") as i64
    }

    pub fn send_to(&self) -> NodeId {
        self.send_to
    }

    pub fn recv_from(&self) -> NodeId {
        self.recv_from
    }
}

/// `(offset, len)` element ranges assigning the collective's data volume to
/// `n_rings` rings: disjoint, in order, summing to `elem_cnt` exactly. A
/// ring left with an empty partition means the collective was configured
/// with more rings than elements.
pub fn ring_partition(elem_cnt: i64, n_rings: usize) -> Result<Vec<(i64, i64)>> {
    if n_rings == 0 {
        return Err(PlanError::InvalidArgument("zero rings".to_string()));
    }
    let mut parts = Vec::with_capacity(n_rings);
    for i in 0..n_rings {
        let len = balanced_part(elem_cnt, n_rings, i)?;
        if len == 0 {
            return Err(PlanError::ShapeMismatch(format!(
                "{elem_cnt} elements cannot feed {n_rings} rings (ring {i} is empty)"
            )));
        }
        parts.push((balanced_offset(elem_cnt, n_rings, i)?, len));
    }
    Ok(parts)
}

/// How many rings to pipeline a collective over. Topology selection is out
/// of scope; this only sizes the fixed topologies built by
/// [`build_uniform_rings`].
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct RingPlanConfig {
    #[serde(default = "default_num_rings")]
    pub num_rings: usize,
}

fn default_num_rings() -> usize {
    1
}

impl Default for RingPlanConfig {
    fn default() -> RingPlanConfig {
        RingPlanConfig { num_rings: default_num_rings() }
    }
}

/// Builds `config.num_rings` cycles over `n_ranks` ranks, alternating the
/// forward cycle `[1, 2, .., 0]` with its reverse so consecutive rings run
/// over opposite link directions.
pub fn build_uniform_rings(n_ranks: usize, config: RingPlanConfig) -> Result<Vec<Vec<i64>>> {
    if n_ranks == 0 {
        return Err(PlanError::InvalidTopology("zero ranks".to_string()));
    }
    if config.num_rings == 0 {
        return Err(PlanError::InvalidArgument("zero rings requested".to_string()));
    }
    let n = n_ranks as i64;
    let forward: Vec<i64> = (0..n).map(|i| (i + 1) % n).collect();
    let backward: Vec<i64> = (0..n).map(|i| (i + n - 1) % n).collect();
    Ok((0..config.num_rings)
        .map(|k| if k % 2 == 0 { forward.clone() } else { backward.clone() })
        .collect())
}
