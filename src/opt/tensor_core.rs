//! Tensor-core matching: finding (N, M, K) axis triples that satisfy a
//! hardware matrix instruction and planning the opt sequence that
//! shapes the kernel for it.

use itertools::iproduct;
use smallvec::SmallVec;

use crate::config::config;
use crate::error::{check, KernelOptError, OptResult};
use crate::graph::{Op, ReduceKind, UOp};
use crate::renderer::{TcStep, TensorCore};

use super::kernel::Kernel;
use super::{Opt, OptArg};

/// Where the matched matrix axes live in the current shape, and the
/// padding each still needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorCoreOptions {
    /// Locations of the N, M and K axes.
    pub axes: [usize; 3],
    /// Whether the N and M axes still exist in the shape.
    pub axes_exist: [bool; 2],
    /// Axes that must be padded to a multiple before the core fits.
    pub axis_pads: SmallVec<[(usize, usize); 3]>,
}

impl TensorCoreOptions {
    /// Shifts the stored N/M axes after `removed_axis` dropped out of
    /// the shape.
    pub(crate) fn fix_axes(&mut self, removed_axis: usize) {
        for tc_dim in 0..2 {
            if !self.axes_exist[tc_dim] {
                continue;
            }
            if removed_axis < self.axes[tc_dim] {
                self.axes[tc_dim] -= 1;
            } else if removed_axis == self.axes[tc_dim] {
                self.axes_exist[tc_dim] = false;
            }
        }
    }
}

impl Kernel {
    /// Matches one reduce against a tensor core: the source must be an
    /// ADD reduce of `MUL(load, load)` (optionally through a cast), and
    /// each operand must broadcast over an axis the other one varies
    /// on. `axis` indexes the candidate triples from the tail.
    fn create_tc_opts(
        &self,
        reduceop: &UOp,
        tc: &TensorCore,
        axis: usize,
        opt_level: u8,
    ) -> Option<TensorCoreOptions> {
        let has_cast = tc.dtype_in != tc.dtype_out;
        let src0 = &reduceop.src()[0];
        if has_cast && !(src0.op() == Op::Cast && src0.dtype() == &tc.dtype_out) {
            return None;
        }
        let mul_op = if has_cast { &src0.src()[0] } else { src0 };
        if mul_op.op() != Op::Mul {
            return None;
        }

        let buf_index = |src: &UOp| -> Option<usize> {
            if src.op() == Op::Load && src.dtype() == &tc.dtype_in {
                return self.buf_index(src);
            }
            if opt_level >= 1 && src.op() == Op::Cast && src.dtype() == &tc.dtype_in {
                return self.buf_index(&src.src()[0]);
            }
            None
        };
        let buf0 = buf_index(&mul_op.src()[0])?;
        let buf1 = buf_index(&mul_op.src()[1])?;

        let first_reduce = self.first_reduce();
        let buf0_strides = self.sts[buf0].real_strides(false);
        let buf1_strides = self.sts[buf1].real_strides(false);
        let axis_buf0: Vec<usize> = (0..first_reduce)
            .filter(|&i| buf0_strides[i] == Some(0))
            .collect();
        let axis_buf1: Vec<usize> = (0..first_reduce)
            .filter(|&i| buf1_strides[i] == Some(0))
            .collect();
        if axis_buf0.is_empty() || axis_buf1.is_empty() {
            return None;
        }
        if self.shape_len() - first_reduce != 1 && opt_level < 1 {
            return None;
        }

        let axis_choices: Vec<(usize, usize, usize)> = iproduct!(
            axis_buf0.iter().copied(),
            axis_buf1.iter().copied(),
            first_reduce..self.shape_len()
        )
        .collect();
        if axis >= axis_choices.len() {
            return None;
        }
        let (s0, s1, s2) = axis_choices[axis_choices.len() - 1 - axis];

        let axis_pads: SmallVec<[(usize, usize); 3]> = [s0, s1, s2]
            .iter()
            .enumerate()
            .filter(|(i, &x)| self.full_shape()[x] % tc.dims[*i] != 0)
            .map(|(i, &x)| (x, tc.dims[i]))
            .collect();
        if !axis_pads.is_empty() && opt_level < 2 {
            return None;
        }
        Some(TensorCoreOptions {
            axes: [s0, s1, s2],
            axes_exist: [true, true],
            axis_pads,
        })
    }

    /// Tries every candidate tensor core; on a match, applies the pad,
    /// unroll and upcast/local program and records the selection.
    fn apply_tc_match(
        &mut self,
        use_tensor_cores: u8,
        axis: usize,
        tc_select: i64,
        opt_level: u8,
    ) -> OptResult<bool> {
        if use_tensor_cores == 0 {
            return Ok(false);
        }
        let reduce_kind = self.reduceop().and_then(|r| r.reduce_arg()).map(|(k, _)| k);
        if reduce_kind != Some(ReduceKind::Add) {
            return Ok(false);
        }
        let tensor_cores: Vec<TensorCore> = if tc_select == -1 {
            self.renderer.tensor_cores.clone()
        } else {
            vec![self.renderer.tensor_cores[tc_select as usize].clone()]
        };
        'cores: for tc in tensor_cores {
            let per_reduce: Vec<Option<TensorCoreOptions>> = self
                .reduceops
                .clone()
                .iter()
                .map(|r| self.create_tc_opts(r, &tc, axis, opt_level))
                .collect();
            // reduces can only fuse when they agree on the tc layout
            check(
                per_reduce.windows(2).all(|w| w[0] == w[1]),
                "reduces disagree on tensor core options",
            )?;
            let tc_opts = match per_reduce.into_iter().next().flatten() {
                Some(o) => o,
                None => continue,
            };
            self.tensor_core_opts = Some(tc_opts.clone());

            for &(pad_axis, dim) in &tc_opts.axis_pads {
                if self
                    .apply_opt_ex(Opt::padto(pad_axis, dim), false)
                    .is_err()
                {
                    continue 'cores;
                }
            }
            // unroll the reduce dim (K), then upcast/local the N and M
            // dims per the core's program
            for (_, amt) in tc.get_reduce_axes() {
                let k_axis = self.tensor_core_opts.as_ref().unwrap().axes[2];
                let first_reduce = self.first_reduce();
                self.apply_opt_ex(Opt::unroll(k_axis - first_reduce, amt), false)?;
            }
            for step in &tc.opts {
                let which = step.axis() as usize;
                let target = self.tensor_core_opts.as_ref().unwrap().axes[which];
                let opt = match step {
                    TcStep::Upcast(_) => Opt::upcast(target, 2),
                    TcStep::Local(_) => Opt::local(target, 2),
                };
                self.apply_opt_ex(opt, false)?;
            }
            self.tensor_core = Some(tc);
            self.use_tensor_cores = use_tensor_cores;
            return Ok(true);
        }
        Ok(false)
    }

    /// Entry point for a `TC` opt. A failure restores the pre-call
    /// state wholesale.
    pub(crate) fn apply_tc_from_opt(
        &mut self,
        opt: Opt,
        use_override: Option<u8>,
        append_opt: bool,
    ) -> OptResult<()> {
        check(
            self.applied_opts.is_empty(),
            "tensor core opts must be first",
        )?;
        let use_tensor_cores = use_override.unwrap_or(config().use_tc);
        check(
            use_tensor_cores == 2 || !self.renderer.tensor_cores.is_empty(),
            "must have tensor cores or shape-only mode",
        )?;
        let axis = opt
            .axis
            .ok_or_else(|| KernelOptError::rejected("tensor core opts must have an axis"))?;
        let (tc_select, tc_opt) = match opt.arg {
            OptArg::Tc { tc_select, tc_opt } => (tc_select, tc_opt),
            _ => {
                return Err(KernelOptError::rejected(
                    "tensor core opts must have tc_select and tc_opt",
                ))
            }
        };
        check(
            tc_select >= -1 && tc_select < self.renderer.tensor_cores.len() as i64,
            "tensor core opts must have valid tc_select",
        )?;
        check(tc_opt <= 2, "tensor core opts must have valid tc_opt")?;

        let snapshot = self.clone();
        match self.apply_tc_match(use_tensor_cores, axis, tc_select, tc_opt) {
            Ok(true) => {
                if append_opt {
                    self.applied_opts.push(opt);
                }
                Ok(())
            }
            Ok(false) => {
                *self = snapshot;
                Err(KernelOptError::rejected("no tensor core available"))
            }
            Err(e) => {
                *self = snapshot;
                Err(e)
            }
        }
    }

    /// Attempts the whole tensor-core pipeline: match, shape, and the
    /// hand-coded follow-up upcasts. Returns whether it applied; the
    /// kernel is untouched when it did not.
    ///
    /// `use_tensor_cores`: 1 emits a real WMMA, 2 shapes without one,
    /// 3 emulates the warp layout through local memory.
    /// `tc_opt` level: 0 only direct single-reduce loads, 1 allows
    /// casts and multiple reduces, 2 also pads non-multiple axes.
    pub fn apply_tensor_cores(
        &mut self,
        use_tensor_cores: u8,
        extra_opts: Option<&[Opt]>,
        axis: usize,
        tc_select: Option<i64>,
        tc_opt: Option<u8>,
    ) -> bool {
        let tc_select = tc_select.unwrap_or(config().tc_select);
        let tc_opt = tc_opt.unwrap_or(config().tc_opt);
        if self.renderer.tensor_cores.is_empty() && use_tensor_cores != 2 {
            return false;
        }
        let snapshot = self.clone();
        match self.apply_tc_pipeline(use_tensor_cores, extra_opts, axis, tc_select, tc_opt) {
            Ok(()) => true,
            Err(_) => {
                *self = snapshot;
                false
            }
        }
    }

    fn apply_tc_pipeline(
        &mut self,
        use_tensor_cores: u8,
        extra_opts: Option<&[Opt]>,
        axis: usize,
        tc_select: i64,
        tc_opt: u8,
    ) -> OptResult<()> {
        self.apply_tc_from_opt(
            Opt::tc(axis, tc_select, tc_opt),
            Some(use_tensor_cores),
            true,
        )?;
        if self.tensor_core_opts.is_none() {
            return Ok(());
        }
        if let Some(extra) = extra_opts {
            for opt in extra {
                self.apply_opt(*opt)?;
            }
            return Ok(());
        }
        if config().amx {
            // wider upcasts make emulated AMX kernels slower
            return Ok(());
        }
        for tc_dim in [1usize, 0] {
            let opts = self.tensor_core_opts.as_ref().unwrap();
            if !opts.axes_exist[tc_dim] {
                continue;
            }
            let target = opts.axes[tc_dim];
            let sz = [5usize, 4, 3, 2]
                .into_iter()
                .find(|&sz| self.full_shape()[target] % sz == 0);
            if let Some(sz) = sz {
                self.apply_opt(Opt::upcast(target, sz))?;
            }
        }
        let opts = self.tensor_core_opts.as_ref().unwrap();
        if opts.axes_exist[0] {
            let target = opts.axes[0];
            let sz = [4usize, 2]
                .into_iter()
                .find(|&sz| self.full_shape()[target] % sz == 0);
            if let Some(sz) = sz {
                self.apply_opt(Opt::local(target, sz))?;
            }
        }
        Ok(())
    }
}
