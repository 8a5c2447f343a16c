//! Hand-coded heuristic scenarios.

use kernelopt::{Kernel, Opt, OptOps, Renderer};

use crate::common::{conv_image_ast, copy_ast, matvec_ast};

#[test]
fn test_small_copy_program() {
    let mut k = Kernel::new(copy_ast(4), Renderer::cpu()).unwrap();
    assert_eq!(k.first_reduce(), k.shape_len());
    k.hand_coded_optimizations().unwrap();
    let prog = k.to_program(None, None);
    assert!(!prog.src.is_empty());
    assert!(prog.src.contains("Load"));
    assert!(prog.src.contains("Store"));
}

#[test]
fn test_matvec_1024_default_schedule() {
    let mut k = Kernel::new(matvec_ast(1024, 1024), Renderer::gpu()).unwrap();
    k.hand_coded_optimizations().unwrap();
    assert_eq!(
        k.applied_opts(),
        &[Opt::group(0, 8), Opt::local(0, 4), Opt::upcast(0, 4)]
    );
    assert_eq!(k.local_dims(), 1);
    assert_eq!(k.group_for_reduces(), 1);
    assert_eq!(k.upcasted(), 1);
}

#[test]
fn test_matvec_schedule_lowers() {
    let mut k = Kernel::new(matvec_ast(1024, 1024), Renderer::gpu()).unwrap();
    k.hand_coded_optimizations().unwrap();
    let prog = k.to_program(None, None);
    assert!(!prog.src.is_empty());
    // the grouped reduce stages through a local buffer
    assert!(prog.src.contains("DefineLocal"));
    assert_eq!(prog.applied_opts.len(), 3);
}

#[test]
fn test_conv_image_kernel() {
    let mut k = Kernel::new(conv_image_ast(1152, 784, 588), Renderer::gpu()).unwrap();
    k.hand_coded_optimizations().unwrap();
    // required_optimizations vectorized the image store, and the
    // image/unroll steps added more
    assert!(k.applied_opts().iter().any(|o| o.op == OptOps::Upcast));
    assert!(k.applied_opts().iter().any(|o| o.op == OptOps::Unroll));
    assert_eq!(k.applied_opts()[0], Opt::upcast(1, 4));

    let prog = k.to_program(None, None);
    // at least as many bytes as the largest input buffer
    assert!(prog.mem_estimate >= 1152 * 588 * 4);
}

#[test]
fn test_matvec_without_shared_memory_falls_back() {
    // shared memory off: the matvec branch cannot fire, but the
    // schedule still applies locals and upcasts without error
    let mut renderer = Renderer::gpu();
    renderer.has_shared = false;
    let mut k = Kernel::new(matvec_ast(1024, 1024), Renderer::cpu()).unwrap();
    k.hand_coded_optimizations().unwrap();
    assert!(k.applied_opts().iter().all(|o| o.op != OptOps::Group));
    let mut k2 = Kernel::new(matvec_ast(1024, 1024), renderer).unwrap();
    k2.hand_coded_optimizations().unwrap();
    assert!(k2
        .applied_opts()
        .iter()
        .all(|o| o.op != OptOps::Group && o.op != OptOps::GroupTop));
}
