//! The operation graph the optimizer consumes and produces.
//!
//! Nodes are immutable and shared; two `UOp`s compare equal when they
//! are the same allocation. The optimizer relies on identity to find
//! buffer positions and to memoize rewrites, so builders never
//! hash-cons.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::dtype::{ConstValue, DType, ScalarKind};
use crate::renderer::{KernelInfo, WmmaArg};
use crate::shape::ShapeTracker;

/// Opcodes understood by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Sink,
    Load,
    Store,
    Const,
    Valid,
    View,
    ReduceAxis,
    Mul,
    Add,
    Cast,
    DefineGlobal,
    DefineLocal,
    Wmma,
    Contract,
    Unroll,
    Name,
}

impl Op {
    /// Buffer ops carry (or can be given) a shape-tracker.
    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self, Op::Load | Op::Store | Op::Const | Op::Valid)
    }

    /// Ops through which zero-padding a reduce input stays neutral.
    #[inline]
    pub fn is_pad_neutral(&self) -> bool {
        matches!(
            self,
            Op::Mul | Op::Add | Op::Cast | Op::Load | Op::Const | Op::Valid | Op::View
        )
    }
}

/// The reduction carried by a `REDUCE_AXIS` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Add,
    Mul,
    Max,
}

/// Upcast axes attached to `CONTRACT`/`UNROLL` nodes: `(axis, amount)`.
pub type UpcastAxes = SmallVec<[(usize, usize); 4]>;

/// Opcode-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    None,
    /// Buffer slot of a `DEFINE_GLOBAL`.
    Buffer(usize),
    /// Name of a `DEFINE_LOCAL` or `NAME` node.
    Name(String),
    /// Literal of a `CONST`.
    Const(ConstValue),
    /// Tracker carried by a `VIEW`.
    View(ShapeTracker),
    /// Reduction kind and axes of a `REDUCE_AXIS`.
    Reduce(ReduceKind, SmallVec<[usize; 4]>),
    /// Kernel metadata on the `SINK` after lowering.
    Kernel(KernelInfo),
    /// Tensor-core instruction descriptor on a `WMMA`.
    Wmma(Box<WmmaArg>),
    /// Upcast axes of a `CONTRACT` or `UNROLL`.
    Axes(UpcastAxes),
}

struct Node {
    op: Op,
    dtype: DType,
    src: Vec<UOp>,
    arg: Arg,
}

/// A shared, immutable graph node.
#[derive(Clone)]
pub struct UOp {
    node: Arc<Node>,
}

impl PartialEq for UOp {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}
impl Eq for UOp {}

impl std::hash::Hash for UOp {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.node) as usize).hash(state);
    }
}

impl fmt::Debug for UOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({} srcs)", self.op(), self.src().len())
    }
}

impl UOp {
    pub fn new(op: Op, dtype: DType, src: Vec<UOp>, arg: Arg) -> UOp {
        UOp {
            node: Arc::new(Node {
                op,
                dtype,
                src,
                arg,
            }),
        }
    }

    #[inline]
    pub fn op(&self) -> Op {
        self.node.op
    }

    #[inline]
    pub fn dtype(&self) -> &DType {
        &self.node.dtype
    }

    #[inline]
    pub fn src(&self) -> &[UOp] {
        &self.node.src
    }

    #[inline]
    pub fn arg(&self) -> &Arg {
        &self.node.arg
    }

    /// Stable identity for maps and `bufs` lookups.
    #[inline]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }

    /// Same opcode/dtype/arg over new sources.
    pub fn replace_src(&self, src: Vec<UOp>) -> UOp {
        UOp::new(self.op(), self.dtype().clone(), src, self.arg().clone())
    }

    /// Same node with a different arg.
    pub fn replace_arg(&self, arg: Arg) -> UOp {
        UOp::new(self.op(), self.dtype().clone(), self.node.src.clone(), arg)
    }

    // ---- builders ----

    pub fn sink(stores: Vec<UOp>) -> UOp {
        UOp::new(Op::Sink, DType::scalar(ScalarKind::Bool), stores, Arg::None)
    }

    pub fn define_global(index: usize, dtype: DType) -> UOp {
        UOp::new(Op::DefineGlobal, dtype, vec![], Arg::Buffer(index))
    }

    pub fn define_local(name: impl Into<String>, dtype: DType) -> UOp {
        UOp::new(Op::DefineLocal, dtype, vec![], Arg::Name(name.into()))
    }

    pub fn view(st: ShapeTracker) -> UOp {
        UOp::new(
            Op::View,
            DType::scalar(ScalarKind::Bool),
            vec![],
            Arg::View(st),
        )
    }

    /// Wraps `src` in a VIEW applied on top of whatever `src` indexes.
    pub fn view_of(st: ShapeTracker, src: UOp) -> UOp {
        UOp::new(Op::View, src.dtype().clone(), vec![src], Arg::View(st))
    }

    pub fn load(buf: UOp, st: ShapeTracker) -> UOp {
        let dtype = DType::scalar(buf.dtype().base());
        UOp::new(Op::Load, dtype, vec![buf, UOp::view(st)], Arg::None)
    }

    /// A load ordered after `dep` (used for staged local buffers).
    pub fn load_after(buf: UOp, st: ShapeTracker, dtype: DType, dep: UOp) -> UOp {
        UOp::new(Op::Load, dtype, vec![buf, UOp::view(st), dep], Arg::None)
    }

    pub fn store(buf: UOp, st: ShapeTracker, value: UOp) -> UOp {
        UOp::new(
            Op::Store,
            value.dtype().clone(),
            vec![buf, UOp::view(st), value],
            Arg::None,
        )
    }

    pub fn const_(dtype: DType, value: ConstValue, st: ShapeTracker) -> UOp {
        UOp::new(
            Op::Const,
            dtype,
            vec![UOp::view(st)],
            Arg::Const(value),
        )
    }

    /// A bare constant with no view, for WMMA accumulators.
    pub fn const_scalar(dtype: DType, value: ConstValue) -> UOp {
        UOp::new(Op::Const, dtype, vec![], Arg::Const(value))
    }

    pub fn cast(dtype: DType, src: UOp) -> UOp {
        UOp::new(Op::Cast, dtype, vec![src], Arg::None)
    }

    pub fn mul(a: UOp, b: UOp) -> UOp {
        let dtype = a.dtype().clone();
        UOp::new(Op::Mul, dtype, vec![a, b], Arg::None)
    }

    pub fn add(a: UOp, b: UOp) -> UOp {
        let dtype = a.dtype().clone();
        UOp::new(Op::Add, dtype, vec![a, b], Arg::None)
    }

    pub fn reduce_axis(kind: ReduceKind, axes: impl IntoIterator<Item = usize>, src: UOp) -> UOp {
        let dtype = src.dtype().clone();
        UOp::new(
            Op::ReduceAxis,
            dtype,
            vec![src],
            Arg::Reduce(kind, axes.into_iter().collect()),
        )
    }

    pub fn name(name: impl Into<String>) -> UOp {
        UOp::new(
            Op::Name,
            DType::scalar(ScalarKind::Bool),
            vec![],
            Arg::Name(name.into()),
        )
    }

    /// "Const where the view is valid, else zero": the wrap applied to
    /// constants that pick up a mask during optimization.
    pub fn masked_const(&self, st: &ShapeTracker) -> UOp {
        debug_assert_eq!(self.op(), Op::Const);
        let bare = UOp::new(
            Op::Const,
            self.dtype().clone(),
            vec![],
            self.arg().clone(),
        );
        UOp::new(
            Op::Valid,
            self.dtype().clone(),
            vec![UOp::view(st.clone()), bare],
            Arg::None,
        )
    }

    // ---- structural queries ----

    /// The reduction kind of a `REDUCE_AXIS`.
    pub fn reduce_arg(&self) -> Option<(ReduceKind, &[usize])> {
        match self.arg() {
            Arg::Reduce(kind, axes) => Some((*kind, axes)),
            _ => None,
        }
    }

    /// The shape-tracker a buffer op carries.
    pub fn st_arg(&self) -> Option<&ShapeTracker> {
        let view = match self.op() {
            Op::Load | Op::Store => self.src().get(1)?,
            Op::Const | Op::Valid => self.src().first()?,
            Op::View => return self.view_arg(),
            _ => return None,
        };
        view.view_arg()
    }

    fn view_arg(&self) -> Option<&ShapeTracker> {
        match self.arg() {
            Arg::View(st) => Some(st),
            _ => None,
        }
    }

    /// The logical shape-tracker of this node's output, derived from
    /// its sources.
    pub fn st(&self) -> Option<ShapeTracker> {
        match self.op() {
            Op::View => self.view_arg().cloned(),
            Op::Load | Op::Store | Op::Const | Op::Valid => self.st_arg().cloned(),
            Op::ReduceAxis => {
                let (_, axes) = self.reduce_arg()?;
                let src_st = self.src().first()?.st()?;
                let shape: SmallVec<[usize; 8]> = src_st
                    .shape()
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| if axes.contains(&i) { 1 } else { s })
                    .collect();
                Some(ShapeTracker::from_shape(&shape))
            }
            Op::Mul | Op::Add | Op::Cast | Op::Contract | Op::Unroll | Op::Wmma => {
                self.src().iter().find_map(|s| s.st())
            }
            _ => None,
        }
    }

    /// Post-order traversal, children before parents, deduplicated by
    /// identity.
    pub fn toposort(&self) -> Vec<UOp> {
        let mut seen = hashbrown::HashSet::new();
        let mut out = Vec::new();
        let mut stack: Vec<(UOp, bool)> = vec![(self.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                out.push(node);
                continue;
            }
            if !seen.insert(node.id()) {
                continue;
            }
            stack.push((node.clone(), true));
            for s in node.src().iter().rev() {
                if !seen.contains(&s.id()) {
                    stack.push((s.clone(), false));
                }
            }
        }
        out
    }

    /// Whether zero-padding the input of this reduce preserves its
    /// result: an ADD reduce whose whole input slice is built from
    /// pad-neutral ops.
    pub fn can_pad(&self) -> bool {
        if self.reduce_arg().map(|(k, _)| k) != Some(ReduceKind::Add) {
            return false;
        }
        self.src()[0]
            .toposort()
            .iter()
            .all(|u| {
                u.op().is_pad_neutral() || matches!(u.op(), Op::DefineGlobal | Op::DefineLocal)
            })
    }
}

impl ShapeTracker {
    /// The `VIEW` node form of a tracker.
    pub fn to_uop(&self) -> UOp {
        UOp::view(self.clone())
    }
}
