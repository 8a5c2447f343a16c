//! Opt catalogue behavior across the public API.

use kernelopt::{Kernel, KernelOptError, Opt, OptOps, Renderer};

use crate::common::matvec_ast;

fn matvec(m: usize, k: usize) -> Kernel {
    Kernel::new(matvec_ast(m, k), Renderer::gpu()).unwrap()
}

#[test]
fn test_failure_leaves_state_identical() {
    let mut k = matvec(64, 256);
    let snap = k.clone();
    let bad_opts = [
        Opt::upcast(9, 4),     // axis out of range
        Opt::upcast(0, 7),     // amount does not divide
        Opt::upcast(1, 4),     // reduce axis
        Opt::unroll(5, 4),     // resolved axis out of range
        Opt::local(1, 4),      // local must target a global axis
        Opt::group(0, 7),      // amount does not divide
        Opt::swap(0, 0),       // swap needs axis < other
        Opt::padto(0, 256),    // pad would quadruple the work
        Opt::tc(0, 0, 0),      // no tensor cores on this renderer
    ];
    for opt in bad_opts {
        assert!(k.apply_opt(opt).is_err(), "{:?} should fail", opt.op);
        assert_eq!(k, snap, "{:?} left residue", opt.op);
    }
}

#[test]
fn test_swap_roundtrip() {
    use kernelopt::shape::View;
    use kernelopt::{ReduceKind, ShapeTracker, UOp};
    use crate::common::f32;

    // two global axes that cannot merge (the store is column-major)
    let a = UOp::load(
        UOp::define_global(1, f32().ptr(8 * 16 * 32, false)),
        ShapeTracker::from_shape(&[8, 16, 32]),
    );
    let red = UOp::reduce_axis(ReduceKind::Add, [2], a);
    let out = UOp::store(
        UOp::define_global(0, f32().ptr(8 * 16, false)),
        ShapeTracker::from_view(View::create(&[8, 16, 1], Some(&[1, 8, 0]), 0, None)),
        red,
    );
    let mut k = Kernel::new(UOp::sink(vec![out]), Renderer::gpu()).unwrap();
    let original = k.clone();

    k.apply_opt(Opt::swap(0, 1)).unwrap();
    assert_eq!(k.full_shape(), &[16, 8, 32]);
    k.apply_opt(Opt::swap(0, 1)).unwrap();
    assert_eq!(k.sts(), original.sts());
    assert_eq!(k.applied_opts().len(), 2);
}

#[test]
fn test_copy_then_apply_matches_apply() {
    let mut a = matvec(256, 128);
    let mut b = a.copy();
    a.apply_opt(Opt::upcast(0, 4)).unwrap();
    b.apply_opt(Opt::upcast(0, 4)).unwrap();
    assert_eq!(a.sts(), b.sts());
    assert_eq!(a.applied_opts(), b.applied_opts());
    assert_eq!(a.upcasted(), b.upcasted());
    assert_eq!(a.local_dims(), b.local_dims());
}

#[test]
fn test_nolocals_guard() {
    let mut k = matvec(64, 256);
    k.apply_opt(Opt::nolocals()).unwrap();
    assert!(k.dont_use_locals());

    let err = k.apply_opt(Opt::local(0, 4)).unwrap_err();
    assert!(matches!(err, KernelOptError::OptRejected { .. }));
    assert!(k.dont_use_locals());
    assert_eq!(k.local_dims(), 0);
    assert_eq!(k.group_for_reduces(), 0);

    // NOLOCALS is not idempotent either
    assert!(k.apply_opt(Opt::nolocals()).is_err());
}

#[test]
fn test_padto_reduce_requires_add() {
    // covered positively: ADD reduce pads fine
    let mut k = matvec(64, 20);
    k.apply_opt(Opt::padto(1, 16)).unwrap();
    assert_eq!(k.full_shape(), &[64, 32]);
    assert_eq!(k.applied_opts()[0].op, OptOps::PadTo);
}

#[test]
fn test_applied_opts_append_only() {
    let mut k = matvec(256, 512);
    k.apply_opt(Opt::local(0, 4)).unwrap();
    k.apply_opt(Opt::unroll(0, 4)).unwrap();
    let _ = k.apply_opt(Opt::upcast(3, 4));
    assert_eq!(
        k.applied_opts(),
        &[Opt::local(0, 4), Opt::unroll(0, 4)]
    );
}

#[test]
fn test_group_then_grouptop_stack() {
    let mut k = matvec(4, 4096);
    k.apply_opt(Opt::group(0, 8)).unwrap();
    k.apply_opt(Opt::group_top(0, 16)).unwrap();
    assert_eq!(k.group_for_reduces(), 2);
    // both grouped axes sit between first_reduce and the loop reduce
    let fr = k.first_reduce();
    assert_eq!(k.full_shape()[fr], 8);
    assert_eq!(k.full_shape()[fr + 1], 16);
}
