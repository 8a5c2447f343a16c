//! Kernel construction and axis-model tests.

use kernelopt::{Kernel, KernelOptError, Renderer, UOp};

use crate::common::{copy_ast, f32, matvec_ast};
use kernelopt::ShapeTracker;

#[test]
fn test_copy_kernel_axis_model() {
    let k = Kernel::new(copy_ast(4), Renderer::cpu()).unwrap();
    assert_eq!(k.shape_len(), 1);
    assert_eq!(k.first_reduce(), k.shape_len());
    assert_eq!(k.global_dims(), 1);
    assert_eq!(k.full_shape(), &[4]);
    assert_eq!(k.colors(), vec!["blue"]);
}

#[test]
fn test_reduce_kernel_axis_model() {
    let k = Kernel::new(matvec_ast(1024, 1024), Renderer::gpu()).unwrap();
    assert_eq!(k.output_shape(), &[1024, 1]);
    assert_eq!(k.full_shape(), &[1024, 1024]);
    assert_eq!(k.first_reduce(), 1);
    assert_eq!(k.colors(), vec!["blue", "red"]);
}

#[test]
fn test_all_trackers_same_length() {
    let k = Kernel::new(matvec_ast(64, 32), Renderer::gpu()).unwrap();
    let len = k.shape_len();
    assert!(k.sts().iter().all(|st| st.len() == len));
    // output and full shape agree outside the reduce axes
    for i in 0..len {
        if k.output_shape()[i] != k.full_shape()[i] {
            assert_eq!(k.output_shape()[i], 1);
        }
    }
}

#[test]
fn test_invalid_root_is_fatal() {
    let st = ShapeTracker::from_shape(&[4]);
    let load = UOp::load(UOp::define_global(1, f32().ptr(4, false)), st);
    match Kernel::new(load, Renderer::cpu()) {
        Err(KernelOptError::InvalidAst { .. }) => {}
        other => panic!("expected InvalidAst, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_segmentation_invariant_under_opt_sequences() {
    use kernelopt::Opt;
    let mut k = Kernel::new(matvec_ast(256, 512), Renderer::gpu()).unwrap();
    let opts = [
        Opt::local(0, 4),
        Opt::group(0, 8),
        Opt::unroll(0, 4),
        Opt::upcast(0, 4),
    ];
    for opt in opts {
        k.apply_opt(opt).unwrap();
        // counters stay inside their segments
        assert!(k.local_dims() <= k.first_reduce());
        assert!(k.first_reduce() + k.group_for_reduces() <= k.first_upcast());
        assert!(k.first_upcast() <= k.shape_len());
        // colors partition the whole shape
        assert_eq!(k.colors().len(), k.shape_len());
        let len = k.shape_len();
        assert!(k.sts().iter().all(|st| st.len() == len));
    }
}

#[test]
fn test_construction_is_deterministic() {
    // two kernels built from equal graphs end up with equal trackers
    let a = Kernel::new(matvec_ast(128, 64), Renderer::gpu()).unwrap();
    let b = Kernel::new(matvec_ast(128, 64), Renderer::gpu()).unwrap();
    assert_eq!(a.sts(), b.sts());
    assert_eq!(a.full_shape(), b.full_shape());
    assert_eq!(a.first_reduce(), b.first_reduce());
}
