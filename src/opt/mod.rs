//! The optimization surface: opt records, kernel state, and the passes
//! that mutate it.

mod catalogue;
mod heuristics;
mod kernel;
mod lower;
mod tensor_core;

pub use kernel::Kernel;
pub use tensor_core::TensorCoreOptions;

use core::fmt;

use serde::Serialize;

/// The kinds of shape optimization the kernel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptOps {
    /// Match and apply a tensor core. Must be the first opt.
    TC,
    /// Vectorize a non-reduce axis.
    Upcast,
    /// Unroll a reduce axis.
    Unroll,
    /// Turn a global axis into a work-group dim.
    Local,
    /// Partial-reduce a reduce axis through shared memory.
    Group,
    /// Like Group, splitting from the top of the axis.
    GroupTop,
    /// Commit to running without work groups.
    NoLocals,
    /// Exchange two global axes.
    Swap,
    /// Pad an axis up to a multiple.
    PadTo,
}

/// The opcode-specific argument of an [`Opt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptArg {
    None,
    /// Split/pad amount; 0 means the full axis size. For `Swap`, the
    /// other axis.
    Amt(usize),
    /// Tensor-core selection.
    Tc { tc_select: i64, tc_opt: u8 },
}

/// One optimization step: operation, target axis, argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Opt {
    pub op: OptOps,
    pub axis: Option<usize>,
    pub arg: OptArg,
}

impl Opt {
    pub fn upcast(axis: usize, amt: usize) -> Opt {
        Opt {
            op: OptOps::Upcast,
            axis: Some(axis),
            arg: OptArg::Amt(amt),
        }
    }

    pub fn unroll(axis: usize, amt: usize) -> Opt {
        Opt {
            op: OptOps::Unroll,
            axis: Some(axis),
            arg: OptArg::Amt(amt),
        }
    }

    pub fn local(axis: usize, amt: usize) -> Opt {
        Opt {
            op: OptOps::Local,
            axis: Some(axis),
            arg: OptArg::Amt(amt),
        }
    }

    pub fn group(axis: usize, amt: usize) -> Opt {
        Opt {
            op: OptOps::Group,
            axis: Some(axis),
            arg: OptArg::Amt(amt),
        }
    }

    pub fn group_top(axis: usize, amt: usize) -> Opt {
        Opt {
            op: OptOps::GroupTop,
            axis: Some(axis),
            arg: OptArg::Amt(amt),
        }
    }

    pub fn nolocals() -> Opt {
        Opt {
            op: OptOps::NoLocals,
            axis: None,
            arg: OptArg::None,
        }
    }

    pub fn swap(axis: usize, other: usize) -> Opt {
        Opt {
            op: OptOps::Swap,
            axis: Some(axis),
            arg: OptArg::Amt(other),
        }
    }

    pub fn padto(axis: usize, amt: usize) -> Opt {
        Opt {
            op: OptOps::PadTo,
            axis: Some(axis),
            arg: OptArg::Amt(amt),
        }
    }

    pub fn tc(axis: usize, tc_select: i64, tc_opt: u8) -> Opt {
        Opt {
            op: OptOps::TC,
            axis: Some(axis),
            arg: OptArg::Tc { tc_select, tc_opt },
        }
    }
}

impl fmt::Display for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(", self.op)?;
        if let Some(axis) = self.axis {
            write!(f, "axis={}", axis)?;
        }
        match self.arg {
            OptArg::None => {}
            OptArg::Amt(amt) => write!(f, ", arg={}", amt)?,
            OptArg::Tc { tc_select, tc_opt } => {
                write!(f, ", arg=({}, {})", tc_select, tc_opt)?
            }
        }
        write!(f, ")")
    }
}
