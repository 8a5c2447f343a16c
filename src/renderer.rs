//! Descriptors exchanged with the device backend.
//!
//! The optimizer only reads capability flags and tensor-core shapes
//! from here; producing real device source is the backend's job. The
//! built-in `render` emits a deterministic pseudo-source listing so
//! drivers and tests have something to look at without a device.

use core::fmt;
use std::fmt::Write as _;

use smallvec::SmallVec;

use crate::dtype::DType;
use crate::graph::{Arg, UOp, UpcastAxes};
use crate::opt::Opt;

/// One step of a tensor core's canonical opt program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcStep {
    /// Upcast the selected axis by 2.
    Upcast(TcAxis),
    /// Make the selected axis a local (warp) dim of size 2.
    Local(TcAxis),
}

/// Which matrix axis a [`TcStep`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcAxis {
    N = 0,
    M = 1,
}

impl TcStep {
    #[inline]
    pub fn axis(&self) -> TcAxis {
        match self {
            TcStep::Upcast(a) | TcStep::Local(a) => *a,
        }
    }
}

/// Per-operand coordinate swizzle: a permutation of the local axes and
/// of the upcast axes, applied as a synthetic view during lowering.
pub type Swizzle = (Vec<usize>, Vec<usize>);

/// A hardware matrix instruction D = A·B + C over fixed (M, N, K)
/// tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorCore {
    /// Tile sizes (M, N, K).
    pub dims: [usize; 3],
    /// Threads cooperating on one tile.
    pub threads: usize,
    /// Elements each thread holds of A, B and the accumulator.
    pub elements_per_thread: [usize; 3],
    pub dtype_in: DType,
    pub dtype_out: DType,
    /// Canonical opt program run after matching.
    pub opts: Vec<TcStep>,
    /// Optional per-operand coordinate swizzles (A, B).
    pub swizzle: [Option<Swizzle>; 2],
}

impl TensorCore {
    /// The K-axis unrolls: `log2(K)` splits of size 2.
    pub fn get_reduce_axes(&self) -> Vec<(usize, usize)> {
        (0..self.dims[2].ilog2() as usize).map(|i| (i, 2)).collect()
    }

    /// Steps of the opt program that upcast.
    pub fn get_upcast_axes(&self) -> Vec<TcStep> {
        self.opts
            .iter()
            .copied()
            .filter(|o| matches!(o, TcStep::Upcast(_)))
            .collect()
    }

    /// Steps of the opt program that make locals.
    pub fn get_local_axes(&self) -> Vec<TcStep> {
        self.opts
            .iter()
            .copied()
            .filter(|o| matches!(o, TcStep::Local(_)))
            .collect()
    }
}

impl fmt::Display for TensorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wmma_{}x{}x{}_{}_{}",
            self.dims[0],
            self.dims[1],
            self.dims[2],
            self.dtype_in.base(),
            self.dtype_out.base()
        )
    }
}

/// The argument attached to a lowered `WMMA` node.
#[derive(Debug, Clone, PartialEq)]
pub struct WmmaArg {
    pub name: String,
    pub dims: [usize; 3],
    pub dtype_in: DType,
    pub dtype_out: DType,
    pub device: String,
    pub threads: usize,
    pub upcast_axes: [UpcastAxes; 3],
    pub reduce_axes: SmallVec<[usize; 4]>,
}

/// Kernel metadata embedded in the `SINK` argument after lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    pub name: String,
    pub local_dims: usize,
    pub upcasted: usize,
    pub dont_use_locals: bool,
}

/// Capabilities of the target the kernel is being shaped for.
#[derive(Debug, Clone)]
pub struct Renderer {
    pub device: String,
    pub has_local: bool,
    pub has_shared: bool,
    /// Shared-memory budget in bytes.
    pub shared_max: usize,
    pub tensor_cores: Vec<TensorCore>,
}

impl Renderer {
    /// A device with work groups and shared memory, no tensor cores.
    pub fn gpu() -> Renderer {
        Renderer {
            device: "GPU".into(),
            has_local: true,
            has_shared: true,
            shared_max: 32768,
            tensor_cores: Vec::new(),
        }
    }

    /// A plain single-threaded target.
    pub fn cpu() -> Renderer {
        Renderer {
            device: "CPU".into(),
            has_local: false,
            has_shared: false,
            shared_max: 0,
            tensor_cores: Vec::new(),
        }
    }

    pub fn with_tensor_cores(mut self, tensor_cores: Vec<TensorCore>) -> Renderer {
        self.tensor_cores = tensor_cores;
        self
    }

    /// Renders a linearized kernel as a pseudo-source listing, one line
    /// per node. Device backends replace this.
    pub fn render(&self, uops: &[UOp]) -> String {
        let mut out = String::new();
        let name = uops
            .first()
            .and_then(|u| match u.arg() {
                Arg::Name(n) => Some(n.as_str()),
                _ => None,
            })
            .unwrap_or("kernel");
        let _ = writeln!(out, "// {} for {}", name, self.device);
        for (i, u) in uops.iter().enumerate() {
            let _ = write!(out, "{:4} {:?}", i, u.op());
            match u.arg() {
                Arg::None => {}
                Arg::Buffer(idx) => {
                    let _ = write!(out, " buf{}", idx);
                }
                Arg::Name(n) => {
                    let _ = write!(out, " {}", n);
                }
                Arg::Const(c) => {
                    let _ = write!(out, " {}", c);
                }
                Arg::View(st) => {
                    let _ = write!(out, " {:?}", st.shape());
                }
                Arg::Reduce(kind, axes) => {
                    let _ = write!(out, " {:?}{:?}", kind, axes.as_slice());
                }
                Arg::Kernel(info) => {
                    let _ = write!(out, " {}", info.name);
                }
                Arg::Wmma(w) => {
                    let _ = write!(out, " {}", w.name);
                }
                Arg::Axes(axes) => {
                    let _ = write!(out, " {:?}", axes.as_slice());
                }
            }
            let _ = writeln!(out);
        }
        out
    }
}

/// Everything a driver needs to compile and launch the optimized
/// kernel.
#[derive(Debug, Clone)]
pub struct ProgramSpec {
    pub name: String,
    pub src: String,
    pub device: String,
    /// The original (pre-optimization) AST.
    pub ast: UOp,
    /// The linearized optimized kernel.
    pub uops: Vec<UOp>,
    pub applied_opts: Vec<Opt>,
    /// Lower bound on bytes moved, from buffer access footprints.
    pub mem_estimate: usize,
    pub global_size: Option<[usize; 3]>,
    pub local_size: Option<[usize; 3]>,
}
