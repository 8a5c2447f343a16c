//! Error types for kernel optimization.

use thiserror::Error;

/// Errors that can occur while constructing or optimizing a kernel.
#[derive(Debug, Clone, Error)]
pub enum KernelOptError {
    /// The input graph is not a valid kernel AST.
    #[error("invalid ast: {reason}")]
    InvalidAst { reason: String },

    /// An optimization precondition failed. Recoverable: the kernel state
    /// is unchanged and the caller may try a different opt.
    #[error("{reason}")]
    OptRejected { reason: String },

    /// A grouped reduction would not fit in shared memory.
    #[error("exceeds maximum shared memory size: needs {needed}, max {max}")]
    SharedMemoryExceeded { needed: usize, max: usize },

    /// A shape-tracker operation could not represent the requested shape.
    #[error("shape error: {reason}")]
    ShapeError { reason: String },
}

impl KernelOptError {
    pub fn invalid_ast(reason: impl Into<String>) -> Self {
        Self::InvalidAst {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::OptRejected {
            reason: reason.into(),
        }
    }

    pub fn shape(reason: impl Into<String>) -> Self {
        Self::ShapeError {
            reason: reason.into(),
        }
    }
}

/// Result type for kernel optimization.
pub type OptResult<T> = core::result::Result<T, KernelOptError>;

/// Guard helper: every opt precondition funnels through this so that a
/// failed check surfaces as a recoverable [`KernelOptError::OptRejected`].
pub(crate) fn check(cond: bool, reason: &str) -> OptResult<()> {
    if cond {
        Ok(())
    } else {
        Err(KernelOptError::rejected(reason))
    }
}
