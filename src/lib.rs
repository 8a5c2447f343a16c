//! # kernelopt
//!
//! A shape-space optimizer for fused reduction kernels over strided
//! buffers. It consumes an abstract computation graph describing one
//! fused kernel, rewrites the per-buffer shape views so a code
//! generator can emit efficient device code (work-group dims,
//! vectorized upcasts, loop unrolls, shared-memory grouping, tensor
//! cores), and lowers the result back to a graph with kernel metadata.
//!
//! ## Example
//!
//! ```ignore
//! use kernelopt::{Kernel, Opt, Renderer};
//!
//! let mut kernel = Kernel::new(ast, Renderer::gpu())?;
//! kernel.hand_coded_optimizations()?;           // or a search driver
//! let program = kernel.to_program(None, None);  // name, src, sizes
//! ```
//!
//! Search drivers clone the kernel with [`Kernel::copy`] before each
//! trial branch and apply enumerated [`Opt`]s through
//! [`Kernel::apply_opt`]; every failure is recoverable and leaves the
//! state untouched.

pub mod config;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod opt;
pub mod renderer;
pub mod replay;
pub mod shape;

pub use config::{config, Config};
pub use dtype::{ConstValue, DType, ScalarKind};
pub use error::{KernelOptError, OptResult};
pub use graph::{Arg, Op, ReduceKind, UOp};
pub use opt::{Kernel, Opt, OptArg, OptOps, TensorCoreOptions};
pub use renderer::{KernelInfo, ProgramSpec, Renderer, TcAxis, TcStep, TensorCore};
pub use shape::{ShapeTracker, View};
