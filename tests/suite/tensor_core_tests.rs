//! Tensor-core matching scenarios.

use kernelopt::{Kernel, Op, OptOps, Renderer};

use crate::common::{matmul_tc_ast, matvec_ast, tc_renderer};

#[test]
fn test_tc_applies_on_aligned_matmul() {
    let mut k = Kernel::new(matmul_tc_ast(64, 64, 16), tc_renderer()).unwrap();
    assert!(k.apply_tensor_cores(1, None, 0, Some(0), Some(0)));
    assert_eq!(k.applied_opts()[0].op, OptOps::TC);

    let ast = k.get_optimized_ast(None);
    let wmmas = ast
        .toposort()
        .iter()
        .filter(|u| u.op() == Op::Wmma)
        .count();
    assert_eq!(wmmas, 1);
}

#[test]
fn test_tc_k_pad_gated_by_opt_level() {
    // K=20 is not a multiple of the 16-wide tile
    let mut k = Kernel::new(matmul_tc_ast(64, 64, 20), tc_renderer()).unwrap();
    assert!(!k.apply_tensor_cores(1, None, 0, Some(0), Some(0)));
    assert!(k.applied_opts().is_empty());

    let mut k = Kernel::new(matmul_tc_ast(64, 64, 20), tc_renderer()).unwrap();
    assert!(k.apply_tensor_cores(1, None, 0, Some(0), Some(2)));
    let pads = &k.tensor_core_opts().unwrap().axis_pads;
    assert_eq!(pads.as_slice(), &[(2, 16)]);
}

#[test]
fn test_tc_mode_shapes() {
    // mode 1: WMMA + CONTRACT + UNROLL
    let mut k1 = Kernel::new(matmul_tc_ast(64, 64, 16), tc_renderer()).unwrap();
    assert!(k1.apply_tensor_cores(1, None, 0, Some(0), Some(0)));
    let nodes1 = k1.get_optimized_ast(None).toposort();
    assert!(nodes1.iter().any(|u| u.op() == Op::Wmma));
    assert!(nodes1.iter().any(|u| u.op() == Op::Contract));
    assert!(nodes1.iter().any(|u| u.op() == Op::Unroll));

    // mode 2: correct shape program, no WMMA
    let mut k2 = Kernel::new(matmul_tc_ast(64, 64, 16), tc_renderer()).unwrap();
    assert!(k2.apply_tensor_cores(2, None, 0, Some(0), Some(0)));
    let nodes2 = k2.get_optimized_ast(None).toposort();
    assert!(nodes2.iter().all(|u| u.op() != Op::Wmma));
    assert_eq!(k2.upcasted(), k1.upcasted());
    assert_eq!(k2.local_dims(), k1.local_dims());

    // mode 3: spilled locals, MUL + REDUCE_AXIS instead of WMMA
    let mut k3 = Kernel::new(matmul_tc_ast(64, 64, 16), tc_renderer()).unwrap();
    assert!(k3.apply_tensor_cores(3, None, 0, Some(0), Some(0)));
    let nodes3 = k3.get_optimized_ast(None).toposort();
    assert!(nodes3.iter().all(|u| u.op() != Op::Wmma));
    assert!(nodes3.iter().any(|u| u.op() == Op::DefineLocal));
    assert!(nodes3
        .iter()
        .any(|u| u.op() == Op::ReduceAxis && u.src()[0].op() == Op::Cast));
}

#[test]
fn test_tc_selection_is_first_opt_and_immutable() {
    let mut k = Kernel::new(matmul_tc_ast(64, 64, 16), tc_renderer()).unwrap();
    assert!(k.apply_tensor_cores(1, None, 0, Some(0), Some(0)));
    assert!(k.tensor_core().is_some());
    // grouping after a tensor core is rejected
    let before = k.applied_opts().len();
    assert!(k
        .apply_opt(kernelopt::Opt::group(0, 2))
        .is_err());
    assert_eq!(k.applied_opts().len(), before);
}

#[test]
fn test_no_tc_without_matching_reduce() {
    // a matvec's operands do not give both sides a broadcast axis
    let mut k = Kernel::new(matvec_ast(64, 64), tc_renderer()).unwrap();
    assert!(!k.apply_tensor_cores(1, None, 0, Some(0), Some(0)));
    assert!(k.applied_opts().is_empty());
    assert!(k.tensor_core().is_none());
}
