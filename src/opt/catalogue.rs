//! Validation and dispatch for the opt catalogue.
//!
//! Every precondition is checked before any tracker or counter moves,
//! so a failed opt leaves the kernel exactly as it was.

use hashbrown::HashSet;

use crate::error::{check, KernelOptError, OptResult};
use crate::shape::prod;

use super::kernel::Kernel;
use super::{Opt, OptArg, OptOps};

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

impl Kernel {
    /// Resolves an opt's axis index into a position in the full shape.
    /// `Unroll` counts from the first reduce axis, `Group`/`GroupTop`
    /// from the first ungrouped reduce axis.
    pub fn real_axis(&self, opt: &Opt) -> Option<usize> {
        let axis = opt.axis?;
        Some(match opt.op {
            OptOps::Unroll => self.first_reduce() + axis,
            OptOps::Group | OptOps::GroupTop => {
                self.first_reduce() + self.group_for_reduces + axis
            }
            _ => axis,
        })
    }

    /// Validates and applies one opt, recording it in `applied_opts`.
    pub fn apply_opt(&mut self, opt: Opt) -> OptResult<()> {
        self.apply_opt_ex(opt, true)
    }

    pub(crate) fn apply_opt_ex(&mut self, opt: Opt, append_opt: bool) -> OptResult<()> {
        if self.dont_use_locals {
            check(
                !matches!(opt.op, OptOps::Local | OptOps::Group | OptOps::GroupTop),
                "not using locals",
            )?;
        }

        if opt.op == OptOps::TC {
            return self.apply_tc_from_opt(opt, None, append_opt);
        }

        let axis = self.real_axis(&opt);
        if let Some(a) = axis {
            check(a < self.shape_len(), "invalid axis")?;
        }

        let amt = match (opt.op, opt.arg) {
            (OptOps::Swap, OptArg::Amt(other)) => other,
            (_, OptArg::Amt(raw)) => {
                let a = axis.ok_or_else(|| KernelOptError::rejected("opt needs an axis"))?;
                let amt = if raw == 0 { self.full_shape()[a] } else { raw };
                check(amt != 1, "shift/padto of 1 is meaningless")?;
                if opt.op != OptOps::PadTo {
                    check(self.full_shape()[a] % amt == 0, "no longer valid shift")?;
                }
                amt
            }
            (OptOps::NoLocals, OptArg::None) => 0,
            _ => return Err(KernelOptError::rejected("arg should be an amount")),
        };

        if self.reduceop().is_some()
            && (matches!(opt.op, OptOps::Group | OptOps::GroupTop)
                || (self.group_for_reduces > 0
                    && !matches!(opt.op, OptOps::NoLocals | OptOps::PadTo)))
        {
            let acc_sz = self.reduceop().unwrap().dtype().itemsize();
            let fu = self.first_upcast();
            let upcast_sz: usize = self.full_shape()[fu..]
                .iter()
                .zip(self.output_shape()[fu..].iter())
                .filter(|(a, b)| a == b)
                .map(|(&a, _)| a)
                .product();
            let fr = self.first_reduce();
            let local_sz = prod(
                &self.full_shape()[fr - self.local_dims..fr + self.group_for_reduces],
            );
            let smem_sz = amt * acc_sz * upcast_sz * local_sz;
            if smem_sz > self.renderer.shared_max {
                return Err(KernelOptError::SharedMemoryExceeded {
                    needed: smem_sz,
                    max: self.renderer.shared_max,
                });
            }
        }

        match opt.op {
            OptOps::Local => {
                let axis = axis.unwrap();
                check(self.renderer.has_local, "target does not support local")?;
                check(axis < self.global_dims(), "local is for globals")?;
                let first_reduce = self.first_reduce();
                self.shift_to(axis, amt, false, Some(first_reduce))?;
                self.local_dims += 1;
            }
            OptOps::Group | OptOps::GroupTop => {
                let axis = axis.unwrap();
                check(
                    self.renderer.has_local && self.renderer.has_shared,
                    "target does not support local or shared mem",
                )?;
                let first_reduce = self.first_reduce();
                check(
                    first_reduce + self.group_for_reduces <= axis && axis < self.first_upcast(),
                    "must be reduce axis to group",
                )?;
                check(self.tensor_core.is_none(), "can't group with tensor cores")?;
                let reduce_axes: Vec<usize> = self
                    .reduceops
                    .iter()
                    .filter_map(|r| r.reduce_arg())
                    .flat_map(|(_, axes)| axes.iter().copied())
                    .collect();
                let distinct: HashSet<usize> = reduce_axes.iter().copied().collect();
                check(
                    reduce_axes.len() == distinct.len(),
                    "can't group with parallel reduces",
                )?;
                let insert_before = first_reduce + self.group_for_reduces;
                self.shift_to(axis, amt, opt.op == OptOps::GroupTop, Some(insert_before))?;
                self.group_for_reduces += 1;
            }
            OptOps::Unroll => {
                let axis = axis.unwrap();
                check(axis < self.first_upcast(), "can't upcast an upcasted axis")?;
                check(amt <= 32, "don't unroll more than 32")?;
                let first_reduce = self.first_reduce();
                let full_sz = self.full_shape()[axis];
                self.shift_to(axis, amt, false, None)?;
                // a fully unrolled axis disappears in simplify_ones; keep
                // the counters pointing at the same segments
                if full_sz == amt && axis == first_reduce {
                    self.local_dims += 1;
                }
                if full_sz == amt && axis < first_reduce + self.group_for_reduces {
                    self.group_for_reduces -= 1;
                }
                self.upcast()?;
            }
            OptOps::Upcast => {
                let axis = axis.unwrap();
                check(axis < self.first_reduce(), "upcast is for non-reduce")?;
                let tc_locals = self
                    .tensor_core
                    .as_ref()
                    .map(|tc| tc.get_local_axes().len())
                    .unwrap_or(0);
                check(
                    !(self.tensor_core.is_some()
                        && self.global_dims() <= axis
                        && axis < self.global_dims() + tc_locals),
                    "can't upcast tensor core locals",
                )?;
                check(
                    self.renderer.device == "DSP" || amt <= 16,
                    "don't upcast more than 16",
                )?;
                self.shift_to(axis, amt, false, None)?;
                self.upcast()?;
            }
            OptOps::NoLocals => {
                check(
                    self.renderer.has_local && !self.dont_use_locals,
                    "NOLOCALS is meaningless without locals",
                )?;
                check(
                    self.local_dims == 0 && self.group_for_reduces == 0,
                    "can't have no locals with locals",
                )?;
                self.dont_use_locals = true;
            }
            OptOps::Swap => {
                let axis =
                    axis.ok_or_else(|| KernelOptError::rejected("swap needs an axis"))?;
                check(
                    axis < amt && amt < self.global_dims(),
                    "swap is only for globals with axis < amt",
                )?;
                let mut perm: Vec<usize> = (0..self.shape_len()).collect();
                perm.swap(axis, amt);
                self.reshape_and_permute(None, Some(&perm))?;
            }
            OptOps::PadTo => {
                let axis = axis.unwrap();
                check(axis < self.first_upcast(), "cannot pad upcasted")?;
                // padding a reduce axis is only sound when zeros are
                // neutral through the whole reduce input
                if let Some(r) = self.reduceop() {
                    if self.first_reduce() <= axis {
                        check(r.can_pad(), "cannot pad this reduce")?;
                    }
                }
                let rank = self.shape_len();
                let mut new_sts = self.sts.clone();
                let mut padded = false;
                for (i, st) in self.sts.iter().enumerate() {
                    let s = st.shape()[axis];
                    if s == 1 {
                        continue; // reduced
                    }
                    check(s > amt / 4, "pad adds more than quadruple the work")?;
                    let ru = round_up(s, amt) - s;
                    if ru > 0 {
                        let mut arg = vec![(0usize, 0usize); rank];
                        arg[axis] = (0, ru); // pad right
                        new_sts[i] = st.pad(&arg);
                        padded = true;
                    }
                }
                check(padded, "nothing was padded")?;
                self.sts = new_sts;
            }
            OptOps::TC => unreachable!("handled above"),
        }

        if append_opt {
            self.applied_opts.push(opt);
        }
        if self.simplify_ones()? && self.tensor_core_opts.is_some() {
            if let (Some(a), Some(tc_opts)) = (axis, self.tensor_core_opts.as_mut()) {
                tc_opts.fix_axes(a);
            }
        }
        Ok(())
    }

    /// Clears the image-dtype obligation: image buffers must be read
    /// four elements at a time along a unit-stride axis.
    pub fn required_optimizations(&mut self) -> OptResult<()> {
        let first = match self.membufs().first() {
            Some(b) => b.clone(),
            None => return Ok(()),
        };
        if !first.dtype().is_image() {
            return Ok(());
        }
        let unit4: Vec<usize> = self.sts[0]
            .unit_stride_axes(true)
            .into_iter()
            .filter(|&i| self.sts[0].shape()[i] % 4 == 0)
            .collect();
        check(!unit4.is_empty(), "image kernel needs a unit stride axis")?;
        if unit4.iter().all(|&x| x < self.first_upcast()) {
            self.apply_opt(Opt::upcast(unit4[0], 4))?;
        }
        Ok(())
    }
}
