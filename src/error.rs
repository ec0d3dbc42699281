use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

/// Failures raised while planning a collective. All of these are fatal to
/// the enclosing graph-compilation pass; readiness polling is the only
/// repeated non-error condition and is not represented here.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Empty or duplicated device membership, or a ring that is not a
    /// single cycle over all participants.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Out-of-range rank or root, or a malformed call argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation kind outside the closed set, as received from an
    /// external message.
    #[error("unsupported operation kind: {0}")]
    UnsupportedOperation(i32),

    /// Ring partition does not reconcile with the declared element count.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A consumed regst must be device-resident for direct device-to-device
    /// transfer.
    #[error("incompatible memory placement: {0}")]
    IncompatibleMemoryPlacement(String),

    /// A lifecycle method was called out of order, or after the node was
    /// serialized.
    #[error("invalid lifecycle transition: node is {actual}, expected {expected}")]
    InvalidLifecycleTransition {
        expected: &'static str,
        actual: &'static str,
    },
}
