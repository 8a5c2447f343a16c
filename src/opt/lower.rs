//! Lowering: re-embedding the transformed trackers into the graph and
//! producing the program descriptor.

use std::sync::{Mutex, OnceLock};

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::config::config;
use crate::dtype::ConstValue;
use crate::graph::{view_left, Arg, Op, ReduceKind, UOp, UpcastAxes};
use crate::renderer::{KernelInfo, ProgramSpec, Swizzle, WmmaArg};
use crate::replay::{self, ReplayRecord};
use crate::shape::{Shape, ShapeTracker};

use super::kernel::Kernel;

static KERNEL_CNT: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();

fn kernel_cnt() -> &'static Mutex<HashMap<String, usize>> {
    KERNEL_CNT.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Sanitizes a display name into a C identifier.
pub fn to_function_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl Kernel {
    /// The kernel's display name: kind prefix (`r` reduce, `C` copy,
    /// `E` elementwise), the full shape, and a process-unique suffix on
    /// collision.
    pub fn name(&self) -> String {
        self.name_cell
            .get_or_init(|| {
                let kernel_type = if self.reduceop().is_some() {
                    "r"
                } else if self.ast.toposort().iter().all(|x| {
                    matches!(
                        x.op(),
                        Op::Sink
                            | Op::Load
                            | Op::Store
                            | Op::Const
                            | Op::Valid
                            | Op::View
                            | Op::DefineGlobal
                            | Op::DefineLocal
                    )
                }) {
                    "C"
                } else {
                    "E"
                };
                let multi = if self.ast.src().len() > 1 {
                    self.ast.src().len().to_string()
                } else {
                    String::new()
                };
                let suffix = self
                    .full_shape()
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join("_");
                let base = format!("{}{}_{}", kernel_type, multi, suffix);
                let mut cnt = kernel_cnt().lock().unwrap();
                let seen = cnt.entry(to_function_name(&base)).or_insert(0);
                *seen += 1;
                if *seen > 1 {
                    format!("{}n{}", base, *seen - 1)
                } else {
                    base
                }
            })
            .clone()
    }

    pub fn function_name(&self) -> String {
        to_function_name(&self.name())
    }

    /// Rebuilds the graph with the optimized shape-trackers, the
    /// tensor-core arrangement and the kernel-info record, then pushes
    /// views left.
    pub fn get_optimized_ast(&self, name_override: Option<&str>) -> UOp {
        let mut cache: HashMap<usize, UOp> = HashMap::new();
        let ast = self.ast.clone();
        let fixed = self.fixup_ast(&ast, name_override, &mut cache);
        view_left(&fixed)
    }

    fn fixup_ast(
        &self,
        op: &UOp,
        name_override: Option<&str>,
        cache: &mut HashMap<usize, UOp>,
    ) -> UOp {
        if let Some(hit) = cache.get(&op.id()) {
            return hit.clone();
        }
        let src: Vec<UOp> = op
            .src()
            .iter()
            .map(|s| self.fixup_ast(s, name_override, cache))
            .collect();
        let mut ret = op.replace_src(src);

        if op.op().is_buffer() {
            if let Some(idx) = self.buf_index(op) {
                let st = &self.sts[idx];
                if op.op() == Op::Const && st.views().iter().any(|v| v.mask().is_some()) {
                    // a constant masked by the new view needs a VALID
                    ret = op.masked_const(st);
                } else {
                    let st_uop = st.to_uop();
                    let mut new_src = ret.src().to_vec();
                    if op.src().len() == 1 {
                        new_src = vec![st_uop];
                    } else {
                        new_src[1] = st_uop;
                    }
                    ret = ret.replace_src(new_src);
                }
            }
        }

        if op.op() == Op::Sink {
            let name = match name_override {
                Some(n) => n.to_string(),
                None => self.function_name(),
            };
            ret = ret.replace_arg(Arg::Kernel(KernelInfo {
                name,
                local_dims: self.local_dims,
                upcasted: self.upcasted,
                dont_use_locals: self.dont_use_locals,
            }));
        }

        if op.op() == Op::ReduceAxis {
            ret = self.fixup_reduce(op, ret);
        }

        cache.insert(op.id(), ret.clone());
        ret
    }

    fn fixup_reduce(&self, op: &UOp, ret: UOp) -> UOp {
        let reduce_pos = self
            .reduceops
            .iter()
            .position(|r| r == op)
            .expect("reduce op belongs to this kernel");
        let reduce_idx = self.bufs.len() + reduce_pos * 2;
        let kind = op.reduce_arg().map(|(k, _)| k).unwrap_or(ReduceKind::Add);

        let reduced_axes = |start: usize, stop: usize| -> SmallVec<[usize; 4]> {
            (start..stop)
                .filter(|&i| {
                    self.sts[reduce_idx].shape()[i] != self.sts[reduce_idx + 1].shape()[i]
                })
                .collect()
        };
        let first_reduce = self.first_reduce();
        let axes = reduced_axes(first_reduce + self.group_for_reduces, self.shape_len());
        let grouped_axes = reduced_axes(first_reduce, first_reduce + self.group_for_reduces);

        if self.tensor_core.is_some()
            && (self.use_tensor_cores == 1 || self.use_tensor_cores == 3)
        {
            return self.fixup_tensor_core(op, &ret, &axes);
        }

        let ret = ret.replace_arg(Arg::Reduce(kind, axes));
        if self.group_for_reduces == 0 || grouped_axes.is_empty() {
            return ret;
        }

        // staged reduction: first stage lands in shared memory, the
        // second reduces the grouped axes out of it
        let mut local_shape: Shape = SmallVec::new();
        local_shape.extend(std::iter::repeat(1).take(self.global_dims()));
        local_shape
            .extend_from_slice(&self.full_shape()[self.global_dims()..self.global_dims() + self.local_dims]);
        for i in first_reduce..first_reduce + self.group_for_reduces {
            local_shape.push(
                if self.sts[reduce_idx].shape()[i] != self.sts[reduce_idx + 1].shape()[i] {
                    self.full_shape()[i]
                } else {
                    1
                },
            );
        }
        let plain_reduce =
            self.shape_len() - self.upcasted - self.group_for_reduces - first_reduce;
        local_shape.extend(std::iter::repeat(1).take(plain_reduce));
        local_shape.extend(self.upcasted_axis(0).iter().map(|&(s, _, _)| s));

        let st = ShapeTracker::from_shape(&local_shape);
        let local_size = st.real_size();
        let local_buffer = UOp::define_local(
            format!("temp{}", reduce_pos),
            op.dtype().ptr(local_size, true),
        );
        let local_store = UOp::store(local_buffer.clone(), st.clone(), ret);
        let local_load = UOp::load_after(
            local_buffer.clone(),
            st.clone(),
            op.dtype().clone(),
            local_store,
        );
        let grouped_reduce =
            UOp::reduce_axis(kind, grouped_axes.iter().copied(), local_load);
        if op == self.reduceops.last().unwrap() {
            return grouped_reduce;
        }
        // intermediate reduces round-trip through the local buffer so
        // later stages see the grouped result
        let collapsed: Shape = local_shape
            .iter()
            .enumerate()
            .map(|(i, &s)| if grouped_axes.contains(&i) { 1 } else { s })
            .collect();
        let st2 = ShapeTracker::from_shape(&collapsed);
        let store2 = UOp::store(local_buffer.clone(), st2.clone(), grouped_reduce);
        UOp::load_after(local_buffer, st2, op.dtype().clone(), store2)
    }

    fn fixup_tensor_core(&self, op: &UOp, ret: &UOp, axes: &[usize]) -> UOp {
        let tc = self.tensor_core.as_ref().unwrap();
        let (wd, tcd) = (self.global_dims(), self.first_upcast());
        let n_reduce = tc.get_reduce_axes().len();
        let n_upcast = tc.get_upcast_axes().len();

        let get_upcast_axes = |buf: usize| -> UpcastAxes {
            let count = tc.elements_per_thread[buf].ilog2() as usize;
            (0..count)
                .map(|i| (tcd + n_reduce + n_upcast - (i + 1), 2))
                .collect()
        };
        let swizzle_st = |shape: &[usize], sw: &Swizzle| -> ShapeTracker {
            let (local_perm, upcast_perm) = sw;
            let offset = tcd as isize - (wd + local_perm.len()) as isize;
            let shift = |x: usize| -> usize {
                if x >= local_perm.len() {
                    (wd as isize + x as isize + offset) as usize
                } else {
                    wd + x
                }
            };
            let mut permaxis: Vec<usize> = (0..wd).collect();
            permaxis.extend(local_perm.iter().map(|&x| shift(x)));
            permaxis.extend(wd + local_perm.len()..tcd);
            permaxis.extend(upcast_perm.iter().map(|&x| shift(x)));
            permaxis.extend(tcd + upcast_perm.len()..shape.len());
            ShapeTracker::from_shape(shape).permute(&permaxis)
        };

        let mul = if ret.src()[0].op() == Op::Cast {
            ret.src()[0].src()[0].clone()
        } else {
            ret.src()[0].clone()
        };
        let mut srcs: Vec<UOp> = mul.src().to_vec();
        for (i, swizzle) in tc.swizzle.iter().enumerate() {
            let src = srcs[i].clone();
            let src_st = if src.op() == Op::Load {
                src.st_arg().cloned()
            } else {
                src.src()[0].st_arg().cloned()
            }
            .expect("tensor core operand carries a tracker");

            if let Some(sw) = swizzle {
                srcs[i] = UOp::view_of(swizzle_st(src_st.shape(), sw), srcs[i].clone());
            }
            if self.use_tensor_cores == 3 {
                // emulate the warp addressing through a local buffer
                let strides = src_st.real_strides(false);
                let local_shape: Shape = src_st
                    .shape()
                    .iter()
                    .enumerate()
                    .map(|(ax, &s)| {
                        let broadcast = strides[ax] == Some(0);
                        if broadcast || ax < wd || (ax >= self.first_reduce() && ax < tcd) {
                            1
                        } else {
                            s
                        }
                    })
                    .collect();
                let st = ShapeTracker::from_shape(&local_shape);
                let mut store_st = st.clone();
                if let Some(sw) = swizzle {
                    store_st = swizzle_st(store_st.shape(), sw);
                }
                let local_buffer = UOp::define_local(
                    format!("temp{}", i),
                    tc.dtype_in.ptr(st.real_size(), true),
                );
                let local_store = UOp::store(local_buffer.clone(), store_st, srcs[i].clone());
                srcs[i] =
                    UOp::load_after(local_buffer, st, tc.dtype_in.clone(), local_store);
            }
        }

        let tc_reduce_axes: SmallVec<[usize; 4]> =
            tc.get_reduce_axes().iter().map(|&(ax, _)| tcd + ax).collect();
        let tc_uop = if self.use_tensor_cores == 1 {
            let upcast_axes = [get_upcast_axes(0), get_upcast_axes(1), get_upcast_axes(2)];
            let acc_dtype = tc.dtype_out.vec(tc.elements_per_thread[2]);
            let wmma_arg = WmmaArg {
                name: tc.to_string(),
                dims: tc.dims,
                dtype_in: tc.dtype_in.clone(),
                dtype_out: tc.dtype_out.clone(),
                device: self.renderer.device.clone(),
                threads: tc.threads,
                upcast_axes: upcast_axes.clone(),
                reduce_axes: tc_reduce_axes.clone(),
            };
            let contract_a = UOp::new(
                Op::Contract,
                srcs[0].dtype().vec(tc.elements_per_thread[0]),
                vec![srcs[0].clone()],
                Arg::Axes(upcast_axes[0].clone()),
            );
            let contract_b = UOp::new(
                Op::Contract,
                srcs[1].dtype().vec(tc.elements_per_thread[1]),
                vec![srcs[1].clone()],
                Arg::Axes(upcast_axes[1].clone()),
            );
            let acc = UOp::const_scalar(acc_dtype.clone(), ConstValue::zero(&acc_dtype));
            let wmma = UOp::new(
                Op::Wmma,
                acc_dtype,
                vec![contract_a, contract_b, acc],
                Arg::Wmma(Box::new(wmma_arg)),
            );
            UOp::new(
                Op::Unroll,
                tc.dtype_out.clone(),
                vec![wmma],
                Arg::Axes(upcast_axes[2].clone()),
            )
        } else {
            // emulated: plain multiply-accumulate over the tile axes
            let prod = UOp::mul(srcs[0].clone(), srcs[1].clone());
            UOp::reduce_axis(
                ReduceKind::Add,
                tc_reduce_axes.iter().copied(),
                UOp::cast(tc.dtype_out.clone(), prod),
            )
        };

        let new_axes: SmallVec<[usize; 4]> = axes
            .iter()
            .copied()
            .filter(|i| !tc_reduce_axes.contains(i))
            .collect();
        if new_axes.is_empty() {
            tc_uop
        } else {
            UOp::new(
                Op::ReduceAxis,
                op.dtype().clone(),
                vec![tc_uop],
                Arg::Reduce(ReduceKind::Add, new_axes),
            )
        }
    }

    /// The optimized graph as an ordered node list headed by a `NAME`
    /// node, ready for a backend.
    pub fn linearize(
        &self,
        name_override: Option<&str>,
        ast_transform: Option<&dyn Fn(&Kernel, UOp) -> UOp>,
    ) -> Vec<UOp> {
        let mut modified = self.get_optimized_ast(name_override);
        if let Some(f) = ast_transform {
            modified = f(self, modified);
        }
        if config().debug >= 3 {
            eprintln!("{}", self.name());
            eprintln!("{}", self.colored_shape());
            for opt in &self.applied_opts {
                eprintln!("  {}", opt);
            }
        }
        let fname = match name_override {
            Some(n) => n.to_string(),
            None => self.function_name(),
        };
        let mut uops = vec![UOp::name(fname)];
        uops.extend(modified.toposort());
        uops
    }

    /// Lowers and renders the kernel, returning the full program
    /// descriptor with the memory footprint estimate and default work
    /// sizes.
    pub fn to_program(
        &self,
        name_override: Option<&str>,
        ast_transform: Option<&dyn Fn(&Kernel, UOp) -> UOp>,
    ) -> ProgramSpec {
        let uops = self.linearize(name_override, ast_transform);
        let src = self.renderer.render(&uops);
        let name = match name_override {
            Some(n) => n.to_string(),
            None => self.name(),
        };

        if config().capture_process_replay {
            replay::capture(ReplayRecord {
                name: name.clone(),
                device: self.renderer.device.clone(),
                applied_opts: self.applied_opts.clone(),
                src: src.clone(),
            });
        }

        // sum over (op kind, buffer slot) of the largest access
        let mut groups: HashMap<(Op, usize), usize> = HashMap::new();
        for x in self.ast.toposort() {
            if !x.op().is_buffer() {
                continue;
            }
            let parent = match x.src().first() {
                Some(p) if p.op() == Op::DefineGlobal => p,
                _ => continue,
            };
            if let (Arg::Buffer(idx), Some(st)) = (parent.arg(), x.st_arg()) {
                let bytes = parent.dtype().itemsize() * st.real_size();
                let entry = groups.entry((x.op(), *idx)).or_insert(0);
                *entry = (*entry).max(bytes);
            }
        }
        let mem_estimate: usize = groups.values().sum();

        let work_size = if self.renderer.has_local {
            Some([1usize, 1, 1])
        } else {
            None
        };
        ProgramSpec {
            name,
            src,
            device: self.renderer.device.clone(),
            ast: self.ast.clone(),
            uops,
            applied_opts: self.applied_opts.clone(),
            mem_estimate,
            global_size: work_size,
            local_size: work_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{DType, ScalarKind};
    use crate::opt::Opt;
    use crate::renderer::{Renderer, TcAxis, TcStep, TensorCore};
    use crate::shape::View;

    fn f32() -> DType {
        DType::scalar(ScalarKind::F32)
    }
    fn f16() -> DType {
        DType::scalar(ScalarKind::F16)
    }

    fn matvec_kernel(m: usize, k: usize, renderer: Renderer) -> Kernel {
        let a = UOp::load(
            UOp::define_global(1, f32().ptr(m * k, false)),
            ShapeTracker::from_shape(&[m, k]),
        );
        let b = UOp::load(
            UOp::define_global(2, f32().ptr(k, false)),
            ShapeTracker::from_view(View::create(&[m, k], Some(&[0, 1]), 0, None)),
        );
        let red = UOp::reduce_axis(ReduceKind::Add, [1], UOp::mul(a, b));
        let out = UOp::store(
            UOp::define_global(0, f32().ptr(m, false)),
            ShapeTracker::from_view(View::create(&[m, 1], Some(&[1, 0]), 0, None)),
            red,
        );
        Kernel::new(UOp::sink(vec![out]), renderer).unwrap()
    }

    #[test]
    fn test_to_function_name_sanitizes() {
        assert_eq!(to_function_name("r_64 32!x"), "r_64_32_x");
    }

    #[test]
    fn test_name_prefix_and_counter() {
        let k = matvec_kernel(1021, 509, Renderer::cpu());
        let name = k.name();
        assert_eq!(name, "r_1021_509");
        // a second kernel with the same shape gets a suffix
        let k2 = matvec_kernel(1021, 509, Renderer::cpu());
        assert_eq!(k2.name(), "r_1021_509n1");
        // the name is cached per kernel
        assert_eq!(k.name(), "r_1021_509");
    }

    #[test]
    fn test_optimized_ast_carries_kernel_info() {
        let mut k = matvec_kernel(64, 32, Renderer::gpu());
        k.apply_opt(Opt::local(0, 4)).unwrap();
        let ast = k.get_optimized_ast(Some("kern"));
        match ast.arg() {
            Arg::Kernel(info) => {
                assert_eq!(info.name, "kern");
                assert_eq!(info.local_dims, 1);
                assert_eq!(info.upcasted, 0);
                assert!(!info.dont_use_locals);
            }
            other => panic!("expected kernel info, got {:?}", other),
        }
    }

    #[test]
    fn test_optimized_ast_swaps_trackers() {
        let mut k = matvec_kernel(64, 32, Renderer::gpu());
        k.apply_opt(Opt::upcast(0, 4)).unwrap();
        let ast = k.get_optimized_ast(None);
        // the store now sees the upcasted three-axis shape
        let store = &ast.src()[0];
        assert_eq!(store.st_arg().unwrap().shape(), &[16, 1, 4]);
    }

    #[test]
    fn test_reduce_axes_recomputed() {
        let mut k = matvec_kernel(64, 32, Renderer::gpu());
        k.apply_opt(Opt::unroll(0, 4)).unwrap();
        let ast = k.get_optimized_ast(None);
        let store = &ast.src()[0];
        let red = &store.src()[2];
        assert_eq!(red.op(), Op::ReduceAxis);
        // reduce covers the loop axis and the unrolled axis
        assert_eq!(red.reduce_arg().unwrap().1, &[1, 2]);
    }

    #[test]
    fn test_grouped_reduce_stages_through_local() {
        let mut k = matvec_kernel(64, 256, Renderer::gpu());
        k.apply_opt(Opt::group(0, 16)).unwrap();
        let ast = k.get_optimized_ast(None);
        let nodes = ast.toposort();
        let locals = nodes.iter().filter(|u| u.op() == Op::DefineLocal).count();
        let reduces = nodes.iter().filter(|u| u.op() == Op::ReduceAxis).count();
        assert_eq!(locals, 1);
        assert_eq!(reduces, 2);
    }

    #[test]
    fn test_program_spec_fields() {
        let mut k = matvec_kernel(1024, 1024, Renderer::gpu());
        k.hand_coded_optimizations().unwrap();
        let prog = k.to_program(None, None);
        assert!(!prog.src.is_empty());
        assert_eq!(prog.device, "GPU");
        assert_eq!(prog.global_size, Some([1, 1, 1]));
        assert_eq!(prog.local_size, Some([1, 1, 1]));
        assert_eq!(prog.applied_opts.len(), 3);
        // at least both input buffers and the output are counted
        let expect = 1024 * 1024 * 4 + 1024 * 4 + 1024 * 4;
        assert_eq!(prog.mem_estimate, expect);
        assert_eq!(prog.uops[0].op(), Op::Name);
    }

    #[test]
    fn test_program_spec_no_locals_on_cpu() {
        let k = matvec_kernel(64, 32, Renderer::cpu());
        let prog = k.to_program(None, None);
        assert!(!prog.src.is_empty());
        assert_eq!(prog.global_size, None);
        assert_eq!(prog.local_size, None);
    }

    fn simple_tc() -> TensorCore {
        TensorCore {
            dims: [16, 16, 16],
            threads: 32,
            elements_per_thread: [8, 4, 4],
            dtype_in: f16(),
            dtype_out: f32(),
            opts: vec![
                TcStep::Local(TcAxis::N),
                TcStep::Local(TcAxis::N),
                TcStep::Upcast(TcAxis::M),
                TcStep::Upcast(TcAxis::N),
            ],
            swizzle: [None, None],
        }
    }

    fn matmul_kernel(m: usize, n: usize, kdim: usize, use_tc: u8) -> Kernel {
        let a = UOp::load(
            UOp::define_global(1, f16().ptr(m * kdim, false)),
            ShapeTracker::from_view(View::create(
                &[m, n, kdim],
                Some(&[kdim as isize, 0, 1]),
                0,
                None,
            )),
        );
        let b = UOp::load(
            UOp::define_global(2, f16().ptr(n * kdim, false)),
            ShapeTracker::from_view(View::create(
                &[m, n, kdim],
                Some(&[0, kdim as isize, 1]),
                0,
                None,
            )),
        );
        let red = UOp::reduce_axis(
            ReduceKind::Add,
            [2],
            UOp::cast(f32(), UOp::mul(a, b)),
        );
        let out = UOp::store(
            UOp::define_global(0, f32().ptr(m * n, false)),
            ShapeTracker::from_view(View::create(
                &[m, n, 1],
                Some(&[n as isize, 1, 0]),
                0,
                None,
            )),
            red,
        );
        let renderer = Renderer::gpu().with_tensor_cores(vec![simple_tc()]);
        let mut k = Kernel::new(UOp::sink(vec![out]), renderer).unwrap();
        assert!(k.apply_tensor_cores(use_tc, None, 0, Some(0), Some(0)));
        k
    }

    #[test]
    fn test_tc_mode_one_emits_single_wmma() {
        let k = matmul_kernel(64, 64, 16, 1);
        let ast = k.get_optimized_ast(None);
        let nodes = ast.toposort();
        let wmmas = nodes.iter().filter(|u| u.op() == Op::Wmma).count();
        assert_eq!(wmmas, 1);
        // the WMMA sits under an UNROLL and over two CONTRACTs
        let unroll = nodes.iter().find(|u| u.op() == Op::Unroll).unwrap();
        assert_eq!(unroll.src()[0].op(), Op::Wmma);
        let wmma = &unroll.src()[0];
        assert_eq!(wmma.src()[0].op(), Op::Contract);
        assert_eq!(wmma.src()[1].op(), Op::Contract);
        assert_eq!(wmma.src()[2].op(), Op::Const);
    }

    #[test]
    fn test_tc_mode_two_shapes_without_wmma() {
        let k = matmul_kernel(64, 64, 16, 2);
        let ast = k.get_optimized_ast(None);
        let nodes = ast.toposort();
        assert!(nodes.iter().all(|u| u.op() != Op::Wmma));
        assert!(nodes.iter().any(|u| u.op() == Op::ReduceAxis));
    }

    #[test]
    fn test_tc_mode_three_spills_through_locals() {
        let k = matmul_kernel(64, 64, 16, 3);
        let ast = k.get_optimized_ast(None);
        let nodes = ast.toposort();
        assert!(nodes.iter().all(|u| u.op() != Op::Wmma));
        let locals = nodes.iter().filter(|u| u.op() == Op::DefineLocal).count();
        assert_eq!(locals, 2);
        // the emulation multiplies then reduces in the accumulator type
        assert!(nodes
            .iter()
            .any(|u| u.op() == Op::ReduceAxis && u.src()[0].op() == Op::Cast));
    }

    #[test]
    fn test_masked_const_gets_valid() {
        // a shaped constant picks up a mask from PADTO
        let c = UOp::const_(
            f32(),
            ConstValue::Float(1.0),
            ShapeTracker::from_shape(&[64, 20]),
        );
        let a = UOp::load(
            UOp::define_global(1, f32().ptr(64 * 20, false)),
            ShapeTracker::from_shape(&[64, 20]),
        );
        let red = UOp::reduce_axis(ReduceKind::Add, [1], UOp::mul(a, c));
        let out = UOp::store(
            UOp::define_global(0, f32().ptr(64, false)),
            ShapeTracker::from_view(View::create(&[64, 1], Some(&[1, 0]), 0, None)),
            red,
        );
        let mut k = Kernel::new(UOp::sink(vec![out]), Renderer::gpu()).unwrap();
        k.apply_opt(Opt::padto(1, 16)).unwrap();
        let ast = k.get_optimized_ast(None);
        assert!(ast.toposort().iter().any(|u| u.op() == Op::Valid));
    }
}
