//! Shared AST builders for the integration suite.

use kernelopt::dtype::{DType, ScalarKind};
use kernelopt::renderer::{TcAxis, TcStep};
use kernelopt::shape::View;
use kernelopt::{ReduceKind, Renderer, ShapeTracker, TensorCore, UOp};

pub fn f32() -> DType {
    DType::scalar(ScalarKind::F32)
}

pub fn f16() -> DType {
    DType::scalar(ScalarKind::F16)
}

/// An elementwise copy of a 1-d buffer.
pub fn copy_ast(n: usize) -> UOp {
    let st = ShapeTracker::from_shape(&[n]);
    let a = UOp::load(UOp::define_global(1, f32().ptr(n, false)), st.clone());
    let out = UOp::store(UOp::define_global(0, f32().ptr(n, false)), st, a);
    UOp::sink(vec![out])
}

/// out[m] = sum_k a[m, k] * b[k]
pub fn matvec_ast(m: usize, k: usize) -> UOp {
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
    UOp::sink(vec![out])
}

/// out[m, n] = sum_k a[m, k] * b[n, k], cast to f32 before the
/// accumulation, as a tensor core wants it.
pub fn matmul_tc_ast(m: usize, n: usize, k: usize) -> UOp {
    let a = UOp::load(
        UOp::define_global(1, f16().ptr(m * k, false)),
        ShapeTracker::from_view(View::create(
            &[m, n, k],
            Some(&[k as isize, 0, 1]),
            0,
            None,
        )),
    );
    let b = UOp::load(
        UOp::define_global(2, f16().ptr(n * k, false)),
        ShapeTracker::from_view(View::create(
            &[m, n, k],
            Some(&[0, k as isize, 1]),
            0,
            None,
        )),
    );
    let red = UOp::reduce_axis(ReduceKind::Add, [2], UOp::cast(f32(), UOp::mul(a, b)));
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
    UOp::sink(vec![out])
}

pub fn tc_16x16x16() -> TensorCore {
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

pub fn tc_renderer() -> Renderer {
    Renderer::gpu().with_tensor_cores(vec![tc_16x16x16()])
}

/// A convolution-shaped kernel on image buffers: the input view is
/// masked the way a VALID conv leaves it, the weight broadcasts over
/// the spatial axes.
pub fn conv_image_ast(cout: usize, spatial: usize, k: usize) -> UOp {
    let img = DType::image(ScalarKind::F32, [cout, spatial / 4, 4]);
    let x = UOp::load(
        UOp::define_global(1, img.clone()),
        ShapeTracker::from_view(View::create(
            &[cout, spatial, k],
            Some(&[0, k as isize, 1]),
            0,
            Some(&[(0, cout), (0, spatial), (0, k - 32)]),
        )),
    );
    let w = UOp::load(
        UOp::define_global(2, img.clone()),
        ShapeTracker::from_view(View::create(
            &[cout, spatial, k],
            Some(&[k as isize, 0, 1]),
            0,
            None,
        )),
    );
    let red = UOp::reduce_axis(ReduceKind::Add, [2], UOp::mul(x, w));
    let out = UOp::store(
        UOp::define_global(0, img),
        ShapeTracker::from_view(View::create(
            &[cout, spatial, 1],
            Some(&[spatial as isize, 1, 0]),
            0,
            None,
        )),
        red,
    );
    UOp::sink(vec![out])
}
