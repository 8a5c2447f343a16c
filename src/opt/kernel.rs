//! Kernel state: per-buffer shape-trackers, the axis model, and the
//! base simplifiers everything else is built from.
//!
//! The shape of a kernel is partitioned into ordered segments:
//!
//! ```text
//! [ globals | locals | grouped-reduce | reduce | upcast ]
//!            ^first_reduce                      ^first_upcast
//! ```
//!
//! Upcast axes further split into reduce-upcast and plain upcast by
//! comparing the full shape to the output shape.

use std::cell::OnceCell;

use colored::{Color, Colorize};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::{check, KernelOptError, OptResult};
use crate::graph::{Op, UOp};
use crate::opt::Opt;
use crate::renderer::{Renderer, TensorCore};
use crate::shape::{get_contraction, prod, strides_for_shape, RealStrides, Shape, ShapeTracker};

use super::tensor_core::TensorCoreOptions;

/// Mutable optimizer state for a single fused kernel.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub(crate) ast: UOp,
    pub(crate) renderer: Renderer,
    pub(crate) reduceops: Vec<UOp>,
    /// Buffer ops in reverse toposort order. This ordering is part of
    /// the contract: every buffer index below derives from it.
    pub(crate) bufs: Vec<UOp>,
    pub(crate) full_buf_index: usize,
    /// One tracker per buffer, then output/input pairs per reduce.
    pub(crate) sts: Vec<ShapeTracker>,
    pub(crate) applied_opts: Vec<Opt>,
    pub(crate) group_for_reduces: usize,
    pub(crate) upcasted: usize,
    pub(crate) local_dims: usize,
    pub(crate) tensor_core: Option<TensorCore>,
    pub(crate) tensor_core_opts: Option<TensorCoreOptions>,
    pub(crate) use_tensor_cores: u8,
    pub(crate) dont_use_locals: bool,
    pub(crate) name_cell: OnceCell<String>,
}

impl PartialEq for Kernel {
    /// State equality: same graph identity and same optimizer state.
    fn eq(&self, other: &Self) -> bool {
        self.ast == other.ast
            && self.sts == other.sts
            && self.applied_opts == other.applied_opts
            && self.group_for_reduces == other.group_for_reduces
            && self.upcasted == other.upcasted
            && self.local_dims == other.local_dims
            && self.tensor_core == other.tensor_core
            && self.tensor_core_opts == other.tensor_core_opts
            && self.use_tensor_cores == other.use_tensor_cores
            && self.dont_use_locals == other.dont_use_locals
    }
}

impl Kernel {
    /// Builds optimizer state from a `SINK` graph: enumerates reduces
    /// and buffers, clones trackers, permutes reduce axes to the tail
    /// and runs the group simplifiers.
    pub fn new(ast: UOp, renderer: Renderer) -> OptResult<Kernel> {
        if ast.op() != Op::Sink {
            return Err(KernelOptError::invalid_ast(format!(
                "root must be SINK, not {:?}",
                ast.op()
            )));
        }
        let topo = ast.toposort();
        verify_structure(&topo)?;

        let reduceops: Vec<UOp> = topo
            .iter()
            .filter(|u| u.op() == Op::ReduceAxis)
            .cloned()
            .collect();
        let bufs: Vec<UOp> = topo
            .iter()
            .rev()
            .filter(|u| u.op().is_buffer())
            .cloned()
            .collect();
        if bufs.is_empty() {
            return Err(KernelOptError::invalid_ast("kernel has no buffers"));
        }

        // the largest buffer feeding a reduce carries the full shape
        let mut earlybufs: Vec<UOp> = reduceops
            .iter()
            .flat_map(|r| r.src()[0].toposort())
            .filter(|u| u.op().is_buffer())
            .collect();
        earlybufs.sort_by_key(|u| {
            std::cmp::Reverse(u.st_arg().map(|st| prod(st.shape())).unwrap_or(0))
        });
        let full_buf_index = earlybufs
            .first()
            .and_then(|e| bufs.iter().position(|b| b == e))
            .unwrap_or(0);

        let mut sts: Vec<ShapeTracker> = Vec::with_capacity(bufs.len() + 2 * reduceops.len());
        for b in &bufs {
            sts.push(
                b.st_arg()
                    .ok_or_else(|| KernelOptError::invalid_ast("buffer op without tracker"))?
                    .clone(),
            );
        }
        for r in &reduceops {
            let out_st = r
                .st()
                .ok_or_else(|| KernelOptError::invalid_ast("reduce without shape"))?;
            let in_st = r.src()[0]
                .st()
                .ok_or_else(|| KernelOptError::invalid_ast("reduce input without shape"))?;
            sts.push(out_st);
            sts.push(in_st);
        }
        let rank = sts[0].len();
        if sts.iter().any(|st| st.len() != rank) {
            return Err(KernelOptError::invalid_ast(
                "buffers disagree on shape length",
            ));
        }

        let mut kernel = Kernel {
            ast,
            renderer,
            reduceops,
            bufs,
            full_buf_index,
            sts,
            applied_opts: Vec::new(),
            group_for_reduces: 0,
            upcasted: 0,
            local_dims: 0,
            tensor_core: None,
            tensor_core_opts: None,
            use_tensor_cores: 0,
            dont_use_locals: false,
            name_cell: OnceCell::new(),
        };

        // move all reduce axes to the end, keeping relative order
        let full: Shape = kernel.full_shape().iter().copied().collect();
        let out: Shape = kernel.output_shape().iter().copied().collect();
        let mut perm: Vec<usize> = (0..rank).filter(|&i| full[i] == out[i]).collect();
        perm.extend((0..rank).filter(|&i| full[i] != out[i]));
        kernel.reshape_and_permute(None, Some(&perm))?;

        kernel.simplify_ones()?;
        kernel.simplify_merge_adjacent()?;
        Ok(kernel)
    }

    /// A duplicate safe to branch in a search: shared graph, cloned
    /// optimizer state, trackers truncated to the buffer + reduce
    /// accounting (anything extra is re-derived during lowering).
    pub fn copy(&self) -> Kernel {
        let mut ret = self.clone();
        ret.sts.truncate(ret.bufs.len() + 2 * ret.reduceops.len());
        ret.name_cell = OnceCell::new();
        ret
    }

    // ---- the axis model ----

    #[inline]
    pub fn ast(&self) -> &UOp {
        &self.ast
    }

    #[inline]
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    #[inline]
    pub fn applied_opts(&self) -> &[Opt] {
        &self.applied_opts
    }

    #[inline]
    pub fn sts(&self) -> &[ShapeTracker] {
        &self.sts
    }

    #[inline]
    pub fn upcasted(&self) -> usize {
        self.upcasted
    }

    #[inline]
    pub fn local_dims(&self) -> usize {
        self.local_dims
    }

    #[inline]
    pub fn group_for_reduces(&self) -> usize {
        self.group_for_reduces
    }

    #[inline]
    pub fn dont_use_locals(&self) -> bool {
        self.dont_use_locals
    }

    #[inline]
    pub fn tensor_core(&self) -> Option<&TensorCore> {
        self.tensor_core.as_ref()
    }

    #[inline]
    pub fn tensor_core_opts(&self) -> Option<&TensorCoreOptions> {
        self.tensor_core_opts.as_ref()
    }

    /// The first reduce op, if any.
    pub fn reduceop(&self) -> Option<&UOp> {
        self.reduceops.first()
    }

    /// The kernel's output shape (tracker of the first buffer).
    #[inline]
    pub fn output_shape(&self) -> &[usize] {
        self.sts[0].shape()
    }

    /// The canonical full shape, including reduce axis sizes.
    #[inline]
    pub fn full_shape(&self) -> &[usize] {
        self.sts[self.full_buf_index].shape()
    }

    #[inline]
    pub fn shape_len(&self) -> usize {
        self.sts[0].len()
    }

    /// First axis of the upcast segment.
    #[inline]
    pub fn first_upcast(&self) -> usize {
        self.shape_len() - self.upcasted
    }

    /// First axis where the output diverges from the full shape.
    pub fn first_reduce(&self) -> usize {
        let fu = self.first_upcast();
        let out = self.output_shape();
        let full = self.full_shape();
        (0..fu).find(|&i| out[i] != full[i]).unwrap_or(fu)
    }

    #[inline]
    pub fn global_dims(&self) -> usize {
        self.first_reduce() - self.local_dims
    }

    /// Full shape up to the upcast segment.
    pub fn full_unupcasted_shape(&self) -> &[usize] {
        &self.full_shape()[..self.first_upcast()]
    }

    /// Deduped memory buffers (parents of LOAD/STORE ops).
    pub fn membufs(&self) -> Vec<UOp> {
        let mut seen = HashMap::new();
        let mut out = Vec::new();
        for b in &self.bufs {
            if matches!(b.op(), Op::Load | Op::Store) {
                let parent = b.src()[0].clone();
                if seen.insert(parent.id(), ()).is_none() {
                    out.push(parent);
                }
            }
        }
        out
    }

    /// Position of a buffer op in `bufs`, by identity.
    pub(crate) fn buf_index(&self, op: &UOp) -> Option<usize> {
        self.bufs.iter().position(|b| b == op)
    }

    /// The upcast segment of buffer `i` as (size, stride, is-reduce)
    /// triples.
    pub fn upcasted_axis(&self, i: usize) -> Vec<(usize, Option<isize>, bool)> {
        let fu = self.first_upcast();
        let shape = &self.sts[i].shape()[fu..];
        let strides = self.sts[i].real_strides(false);
        let out = &self.output_shape()[fu..];
        let full = &self.full_shape()[fu..];
        shape
            .iter()
            .zip(strides[fu..].iter())
            .zip(out.iter().zip(full.iter()))
            .map(|((&s, &st), (&o, &f))| (s, st, o != f))
            .collect()
    }

    /// The axis-segment classification, one color per axis.
    pub fn colors(&self) -> Vec<&'static str> {
        let mut colors: Vec<&'static str> = Vec::with_capacity(self.shape_len());
        let global = if self.dont_use_locals { "BLUE" } else { "blue" };
        colors.extend(std::iter::repeat(global).take(self.global_dims()));
        colors.extend(std::iter::repeat("cyan").take(self.local_dims));
        colors.extend(std::iter::repeat("green").take(self.group_for_reduces));
        colors.extend(
            std::iter::repeat("red")
                .take(self.first_upcast() - (self.first_reduce() + self.group_for_reduces)),
        );
        for i in self.first_upcast()..self.shape_len() {
            colors.push(if self.full_shape()[i] != self.output_shape()[i] {
                "magenta"
            } else {
                "yellow"
            });
        }
        debug_assert_eq!(colors.len(), self.shape_len());
        colors
    }

    /// The full shape rendered with axis-segment colors.
    pub fn colored_shape(&self) -> String {
        self.full_shape()
            .iter()
            .zip(self.colors())
            .map(|(&s, c)| {
                let text = format!("{:4}", s);
                let colored = match c {
                    "blue" => text.color(Color::Blue),
                    "BLUE" => text.color(Color::BrightBlue),
                    "cyan" => text.color(Color::Cyan),
                    "green" => text.color(Color::Green),
                    "red" => text.color(Color::Red),
                    "magenta" => text.color(Color::Magenta),
                    _ => text.color(Color::Yellow),
                };
                format!("{}", colored)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    // ---- base simplifiers ----

    /// Applies an optional reshape then an optional permute to every
    /// tracker. All trackers succeed or the state is untouched.
    pub(crate) fn reshape_and_permute(
        &mut self,
        reshape_fn: Option<&dyn Fn(&[usize]) -> Shape>,
        perm: Option<&[usize]>,
    ) -> OptResult<()> {
        let mut new_sts = Vec::with_capacity(self.sts.len());
        for st in &self.sts {
            let mut st = st.clone();
            if let Some(f) = reshape_fn {
                let new_shape = f(st.shape());
                st = st.reshape(&new_shape)?;
            }
            if let Some(p) = perm {
                st = st.permute(p);
            }
            new_sts.push(st);
        }
        self.sts = new_sts;
        Ok(())
    }

    /// Drops the final dimension into the upcast segment.
    pub(crate) fn upcast(&mut self) -> OptResult<()> {
        check(
            *self.full_shape().last().unwrap_or(&1) != 1,
            "can't upcast a dimension with size 1",
        )?;
        self.upcasted += 1;
        Ok(())
    }

    /// Splits `axis` into two factors and moves the `amount` factor to
    /// just before `insert_before` (defaults to the end). `top` pulls
    /// the factor from the outside of the axis.
    pub(crate) fn shift_to(
        &mut self,
        axis: usize,
        amount: usize,
        top: bool,
        insert_before: Option<usize>,
    ) -> OptResult<()> {
        let shape_len = self.shape_len();
        let mut insert_before = insert_before.unwrap_or(shape_len);
        let move_axis = if top { axis } else { axis + 1 };
        if move_axis < insert_before {
            insert_before += 1;
        }
        let reshape = move |shape: &[usize]| -> Shape {
            let mut out: Shape = SmallVec::with_capacity(shape.len() + 1);
            out.extend_from_slice(&shape[..axis]);
            if shape[axis] > 1 {
                if top {
                    out.push(amount);
                    out.push(shape[axis] / amount);
                } else {
                    out.push(shape[axis] / amount);
                    out.push(amount);
                }
            } else {
                out.push(1);
                out.push(1);
            }
            out.extend_from_slice(&shape[axis + 1..]);
            out
        };
        let perm: Vec<usize> = (0..insert_before)
            .filter(|&i| i != move_axis)
            .chain(std::iter::once(move_axis))
            .chain((insert_before..shape_len + 1).filter(|&i| i != move_axis))
            .collect();
        self.reshape_and_permute(Some(&reshape), Some(&perm))
    }

    /// Removes every axis whose full-shape entry is 1, keeping the axis
    /// counters consistent. Returns whether anything was removed.
    pub(crate) fn simplify_ones(&mut self) -> OptResult<bool> {
        if self.shape_len() == 0 {
            return Ok(false);
        }
        let all_ones: Vec<bool> = self.full_shape().iter().map(|&s| s == 1).collect();
        let first_reduce = self.first_reduce();
        let first_upcast = self.first_upcast();
        self.local_dims -= all_ones[first_reduce - self.local_dims..first_reduce]
            .iter()
            .filter(|&&o| o)
            .count();
        self.upcasted -= all_ones[first_upcast..].iter().filter(|&&o| o).count();
        let keep = all_ones.clone();
        let drop_ones = move |shape: &[usize]| -> Shape {
            shape
                .iter()
                .enumerate()
                .filter(|(i, _)| !keep[*i])
                .map(|(_, &s)| s)
                .collect()
        };
        self.reshape_and_permute(Some(&drop_ones), None)?;
        Ok(all_ones.iter().any(|&o| o))
    }

    /// Greedily merges adjacent axes when every tracker's strides stay
    /// consistent. Never merges across the reduce boundary, and image
    /// buffers contribute a synthetic stride row that stops merges
    /// across image planes.
    pub(crate) fn simplify_merge_adjacent(&mut self) -> OptResult<()> {
        if self.shape_len() == 0 {
            return Ok(());
        }
        let output_shape: Vec<usize> = self.output_shape().to_vec();
        let mut shapes: Vec<Vec<usize>> =
            self.sts.iter().map(|st| st.shape().to_vec()).collect();
        let mut strides: Vec<RealStrides> =
            self.sts.iter().map(|st| st.real_strides(false)).collect();

        if let Some(first) = self.membufs().first() {
            if let Some(base_shape) = first.dtype().image_shape() {
                if let Some(groups) = get_contraction(&output_shape, base_shape) {
                    let mut special: RealStrides = SmallVec::new();
                    for g in &groups {
                        let piece: Vec<usize> = g.iter().map(|&x| output_shape[x]).collect();
                        special.extend(strides_for_shape(&piece).iter().map(|&s| Some(s)));
                    }
                    shapes.push(output_shape.clone());
                    strides.push(special);
                }
            }
        }

        let first_reduce = self.first_reduce();
        let mut rets: Vec<Vec<(usize, Option<isize>)>> = shapes
            .iter()
            .zip(strides.iter())
            .map(|(s, st)| vec![(s[0], st[0])])
            .collect();
        for i in 1..shapes[0].len() {
            let mut can_merge = true;
            for ((s, st), ret) in shapes.iter().zip(strides.iter()).zip(rets.iter()) {
                let last_st = ret.last().unwrap().1;
                let ok = match st[i] {
                    Some(0) => last_st == Some(0),
                    Some(v) => last_st == Some(s[i] as isize * v),
                    None => false,
                };
                can_merge &= ok;
            }
            let mergeable = can_merge && i != first_reduce;
            for (j, (s, st)) in shapes.iter().zip(strides.iter()).enumerate() {
                if mergeable {
                    let last = rets[j].last_mut().unwrap();
                    *last = (last.0 * s[i], st[i]);
                } else {
                    rets[j].push((s[i], st[i]));
                }
            }
        }

        for (i, ret) in rets.into_iter().take(self.sts.len()).enumerate() {
            let new_shape: Shape = ret.iter().map(|&(s, _)| s).collect();
            if new_shape.as_slice() != self.sts[i].shape() {
                self.sts[i] = self.sts[i].reshape(&new_shape)?;
            }
        }
        Ok(())
    }
}

/// Structural sanity of the input graph.
fn verify_structure(topo: &[UOp]) -> OptResult<()> {
    for u in topo {
        match u.op() {
            Op::Sink => {
                if u.src().iter().any(|s| s.op() != Op::Store) {
                    return Err(KernelOptError::invalid_ast("SINK sources must be STOREs"));
                }
            }
            Op::ReduceAxis => {
                if u.reduce_arg().is_none() || u.src().len() != 1 {
                    return Err(KernelOptError::invalid_ast(
                        "REDUCE_AXIS needs one source and a (kind, axes) arg",
                    ));
                }
            }
            op if op.is_buffer() && op != Op::Valid => {
                if u.st_arg().is_none() {
                    return Err(KernelOptError::invalid_ast(format!(
                        "{:?} carries no shape-tracker",
                        op
                    )));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
