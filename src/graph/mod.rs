//! Operation graph nodes and the view-pushdown rewriter.

mod rewrite;
mod uop;

pub use rewrite::view_left;
pub use uop::{Arg, Op, ReduceKind, UOp, UpcastAxes};
