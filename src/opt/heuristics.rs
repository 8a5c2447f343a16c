//! The deterministic opt sequence used when no external planner runs.

use hashbrown::HashSet;
use itertools::iproduct;

use crate::config::config;
use crate::error::OptResult;
use crate::graph::{Op, ReduceKind};
use crate::shape::prod;

use super::kernel::Kernel;
use super::Opt;

impl Kernel {
    /// The hand-coded default optimization. Mirrors what a careful
    /// kernel author would do by hand: spot matvecs, group small
    /// reductions, vectorize image and broadcast axes, unroll short
    /// reduce tails and pick work-group dims.
    pub fn hand_coded_optimizations(&mut self) -> OptResult<()> {
        self.required_optimizations()?;
        let cfg = config();

        // matvec: one thread block per row batch, threads cooperating
        // across the reduce
        let (bs, tpr, rpt) = (cfg.mv_blocksize, cfg.mv_threads_per_row, cfg.mv_rows_per_thread);
        if self.renderer.has_local
            && self.renderer.has_shared
            && cfg.mv
            && (bs > 1 || tpr > 1 || rpt > 1)
            && self.full_shape().len() >= 2
        {
            if let Some(r) = self.reduceop() {
                let is_add = r.reduce_arg().map(|(k, _)| k) == Some(ReduceKind::Add);
                let mulop = r.src()[0].clone();
                if is_add
                    && mulop.op() == Op::Mul
                    && mulop.src()[0].op() == Op::Load
                    && mulop.src()[1].op() == Op::Load
                {
                    let st0 = &self.sts[self.buf_index(&mulop.src()[0]).unwrap()];
                    let st1 = &self.sts[self.buf_index(&mulop.src()[1]).unwrap()];
                    let strides0 = st0.real_strides(false);
                    let strides1 = st1.real_strides(false);
                    let expanded = |shape: &[usize], strides: &[Option<isize>]| {
                        shape
                            .iter()
                            .zip(strides.iter())
                            .any(|(&s, &st)| s > 1 && st == Some(0))
                    };
                    let first_reduce = self.first_reduce();
                    if strides0[first_reduce] == Some(1)
                        && !(expanded(st0.shape(), &strides0) && expanded(st1.shape(), &strides1))
                    {
                        for global_idx in 0..self.global_dims() {
                            if self.full_shape()[first_reduce] % tpr == 0
                                && self.full_shape()[global_idx] % (bs * rpt) == 0
                            {
                                if tpr > 1 {
                                    self.apply_opt(Opt::group(0, tpr))?;
                                }
                                if bs > 1 {
                                    self.apply_opt(Opt::local(global_idx, bs))?;
                                }
                                if rpt > 1 {
                                    self.apply_opt(Opt::upcast(global_idx, rpt))?;
                                }
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }

        // small outputs with a big reduce benefit from a grouped
        // partial reduction
        if self.renderer.has_local && self.renderer.has_shared {
            let fu = self.first_upcast();
            let fr = self.first_reduce();
            let late_unit4 = self.sts[0]
                .unit_stride_axes(false)
                .into_iter()
                .any(|x| x >= fu && self.sts[0].shape()[x] % 4 == 0);
            let out_sz = prod(&self.sts[0].shape()[..fr]);
            if !late_unit4 && fr <= 2 && fr < self.shape_len() && out_sz <= 2048 {
                let szs: &[usize] = if out_sz <= 32 { &[256, 16] } else { &[16] };
                for &sz in szs {
                    let fits = self
                        .sts
                        .iter()
                        .all(|st| st.shape()[fr] % sz == 0 || st.shape()[fr] == 1);
                    if fits && self.apply_opt(Opt::group_top(0, sz)).is_ok() {
                        break;
                    }
                }
            }
        }

        // image buffers read float4 along their unit-stride axis
        for buf_index in 0..self.bufs.len() {
            let buf = self.bufs[buf_index].clone();
            let parent_is_image = buf
                .src()
                .first()
                .map(|p| p.dtype().is_image())
                .unwrap_or(false);
            if !parent_is_image {
                continue;
            }
            let unit4: Vec<usize> = self.sts[buf_index]
                .unit_stride_axes(true)
                .into_iter()
                .filter(|&i| self.sts[buf_index].shape()[i] % 4 == 0)
                .collect();
            let fu = self.first_upcast();
            if !unit4.is_empty() && unit4.iter().all(|&x| x < fu) {
                let fr = self.first_reduce();
                if unit4[0] < fr {
                    self.apply_opt(Opt::upcast(unit4[0], 4))?;
                } else {
                    self.apply_opt(Opt::unroll(unit4[0] - fr, 4))?;
                }
            }
        }

        // grouping handles the rest of the schedule itself
        if self.group_for_reduces > 0 {
            return Ok(());
        }

        // upcast small masked leading axes (stacked tensors produce
        // them), capped so the unrolled body stays small
        let mut to_upcast: Vec<usize> = Vec::new();
        for axis in 0..self.first_reduce() {
            let sz = self.full_shape()[axis];
            let masked = self.sts.iter().any(|st| st.axis_is_masked(axis));
            let budget: usize = prod(&self.full_shape()[self.first_upcast()..])
                * to_upcast.iter().map(|&j| self.full_shape()[j]).product::<usize>()
                * sz;
            if sz <= 7 && masked && budget <= 7 * 7 {
                to_upcast.push(axis);
            }
        }
        for &axis in to_upcast.iter().rev() {
            self.apply_opt(Opt::upcast(axis, 0))?;
        }

        // upcast broadcast axes while the output stays large enough to
        // fill the device
        let is_dsp = self.renderer.device == "DSP";
        let mut upcasted_axis: HashSet<usize> = HashSet::new();
        while prod(&self.sts[0].shape()[..self.first_reduce()]) >= 1024 {
            let amounts: &[usize] = if is_dsp {
                if upcasted_axis.is_empty() {
                    &[128]
                } else {
                    &[]
                }
            } else {
                &[3, 4]
            };
            let mut xb_choices: Vec<(usize, isize, usize, usize)> = Vec::new();
            for (axis, &amt) in iproduct!(0..self.first_reduce(), amounts) {
                if upcasted_axis.contains(&axis) || self.full_shape()[axis] % amt != 0 {
                    continue;
                }
                let candidate = (0..self.sts.len()).any(|i| {
                    let last = self.sts[i].views().last().unwrap();
                    last.strides()[axis] == 0
                        && !self
                            .upcasted_axis(i)
                            .iter()
                            .any(|&(_, st, _)| st == Some(0))
                });
                if candidate {
                    let zeros = self
                        .sts
                        .iter()
                        .filter(|st| st.views().last().unwrap().strides()[axis] > 0)
                        .count();
                    let stride_sum: isize = self
                        .sts
                        .iter()
                        .map(|st| st.views().last().unwrap().strides()[axis])
                        .sum();
                    xb_choices.push((zeros, stride_sum, axis, amt));
                }
            }
            if xb_choices.is_empty() {
                break;
            }
            xb_choices.sort();
            let (_, _, axis, amt) = xb_choices[0];
            self.apply_opt(Opt::upcast(axis, amt))?;
            upcasted_axis.insert(axis);
        }

        // a small reduce tail unrolls completely; a divisible one by 4
        if self.first_reduce() < self.first_upcast() {
            let upcast_prod = prod(&self.full_shape()[self.first_upcast()..]);
            let no_reduce_upcast = !self
                .upcasted_axis(self.full_buf_index)
                .iter()
                .any(|&(_, _, r)| r);
            let small_upcast = self.upcasted == 0
                || prod(&self.full_shape()[self.shape_len() - self.upcasted..]) < 64;
            if (upcast_prod <= 4 || no_reduce_upcast) && small_upcast {
                let s = *self.full_unupcasted_shape().last().unwrap();
                if s <= 32 {
                    let axis = self.full_unupcasted_shape().len() - 1 - self.first_reduce();
                    self.apply_opt(Opt::unroll(axis, 0))?;
                    // tiny reduces can take a second axis with them
                    if self.first_reduce() < self.first_upcast() && s <= 3 {
                        let s2 = *self.full_unupcasted_shape().last().unwrap();
                        if s2 <= 3 {
                            let axis =
                                self.full_unupcasted_shape().len() - 1 - self.first_reduce();
                            self.apply_opt(Opt::unroll(axis, 0))?;
                        }
                    }
                } else if s % 4 == 0 {
                    let axis = self.full_unupcasted_shape().len() - 1 - self.first_reduce();
                    self.apply_opt(Opt::unroll(axis, 4))?;
                }
            }
        }

        // if nothing at all is upcasted and it's easy to, do an upcast
        if self.upcasted == 0 && !self.full_unupcasted_shape().is_empty() {
            let last = *self.full_unupcasted_shape().last().unwrap();
            if last % 4 == 0 {
                let axis = self.full_unupcasted_shape().len() - 1;
                self.apply_opt(Opt::upcast(axis, 4))?;
            }
        }

        // work-group dims, broadcast axes first
        if self.renderer.has_local {
            if cfg.nolocals && self.local_dims == 0 && self.group_for_reduces == 0 {
                self.apply_opt(Opt::nolocals())?;
            } else {
                let mut ranking: Vec<(bool, usize)> = (0..self.first_reduce())
                    .map(|axis| {
                        let expanded = self
                            .sts
                            .iter()
                            .any(|st| st.views().last().unwrap().strides()[axis] == 0);
                        (expanded, axis)
                    })
                    .collect();
                ranking.sort_by_key(|&(expanded, axis)| {
                    (std::cmp::Reverse(expanded), std::cmp::Reverse(axis))
                });
                let mut to_local: Vec<(usize, usize)> = Vec::new();
                for &(_, axis) in &ranking {
                    let local_size: usize = to_local.iter().map(|&(_, sz)| sz).product();
                    let menu: &[usize] = if axis == 0 {
                        &[32, 16, 8, 4, 3, 2]
                    } else {
                        &[16, 8, 4, 3, 2]
                    };
                    let local_sz = menu.iter().copied().find(|&x| {
                        self.full_shape()[axis] % x == 0 && local_size * x <= 128
                    });
                    if let Some(sz) = local_sz {
                        to_local.push((axis, sz));
                    }
                }
                to_local.truncate(3);
                to_local.sort();
                let mut deleted_shape = 0usize;
                for (axis, local_sz) in to_local {
                    let axis = axis - deleted_shape;
                    let will_delete_shape = local_sz == self.full_shape()[axis];
                    self.apply_opt(Opt::local(axis, local_sz))?;
                    if will_delete_shape {
                        deleted_shape += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
