use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::SVec;

/// Tensor shape. Dimensions are `i64` to match the external message schema;
/// a scalar has zero dimensions and one element.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: SVec<i64>,
}

impl Shape {
    pub fn new(dims: impl Into<SVec<i64>>) -> Result<Shape> {
        let dims = dims.into();
        if dims.iter().any(|&d| d < 0) {
            return Err(PlanError::InvalidArgument(format!(
                "negative dimension in shape {dims:?}"
            )));
        }
        Ok(Shape { dims })
    }

    /// The full logical shape of a collective over `elem_cnt` elements.
    pub fn flat(elem_cnt: i64) -> Shape {
        Shape {
            dims: smallvec::smallvec![elem_cnt],
        }
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn at(&self, axis: usize) -> i64 {
        self.dims[axis]
    }

    pub fn elem_cnt(&self) -> i64 {
        self.dims.iter().product()
    }

    /// The shape of rank `rank`'s partition when the leading dimension is
    /// split across `parts` ranks. Remainder rule: the first
    /// `dim0 % parts` ranks get one extra row each.
    pub fn dim0_partition(&self, rank: usize, parts: usize) -> Result<Shape> {
        if self.dims.is_empty() {
            return Err(PlanError::ShapeMismatch(
                "cannot partition a scalar shape".to_string(),
            ));
        }
        let mut dims = self.dims.clone();
        dims[0] = balanced_part(self.dims[0], parts, rank)?;
        Ok(Shape { dims })
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

/// Size of part `idx` when `total` is split as evenly as possible across
/// `parts`. The first `total % parts` parts absorb the remainder, so sizes
/// differ by at most one and sum to `total` exactly.
pub fn balanced_part(total: i64, parts: usize, idx: usize) -> Result<i64> {
    if parts == 0 || idx >= parts {
        return Err(PlanError::InvalidArgument(format!(
            "part {idx} of {parts}"
        )));
    }
    let parts = parts as i64;
    let idx = idx as i64;
    Ok(total / parts + i64::from(idx < total % parts))
}

/// Offset of part `idx` under the same split: the prefix sum of the sizes
/// of parts `0..idx`.
pub fn balanced_offset(total: i64, parts: usize, idx: usize) -> Result<i64> {
    if parts == 0 || idx >= parts {
        return Err(PlanError::InvalidArgument(format!(
            "part {idx} of {parts}"
        )));
    }
    let parts_i = parts as i64;
    let idx_i = idx as i64;
    Ok(total / parts_i * idx_i + idx_i.min(total % parts_i))
}
