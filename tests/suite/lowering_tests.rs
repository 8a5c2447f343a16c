//! Lowering and program output tests.

use kernelopt::{Arg, Kernel, Op, Opt, Renderer};

use crate::common::{copy_ast, matvec_ast};

#[test]
fn test_kernel_info_round_trip() {
    let mut k = Kernel::new(matvec_ast(128, 64), Renderer::gpu()).unwrap();
    k.apply_opt(Opt::local(0, 4)).unwrap();
    k.apply_opt(Opt::unroll(0, 4)).unwrap();
    let ast = k.get_optimized_ast(Some("tkern"));
    match ast.arg() {
        Arg::Kernel(info) => {
            assert_eq!(info.name, "tkern");
            assert_eq!(info.local_dims, 1);
            assert_eq!(info.upcasted, 1);
            assert!(!info.dont_use_locals);
        }
        other => panic!("expected kernel info, got {:?}", other),
    }
}

#[test]
fn test_nolocals_reaches_kernel_info() {
    let mut k = Kernel::new(matvec_ast(128, 64), Renderer::gpu()).unwrap();
    k.apply_opt(Opt::nolocals()).unwrap();
    let ast = k.get_optimized_ast(Some("nl"));
    match ast.arg() {
        Arg::Kernel(info) => assert!(info.dont_use_locals),
        other => panic!("expected kernel info, got {:?}", other),
    }
}

#[test]
fn test_linearize_starts_with_name() {
    let k = Kernel::new(copy_ast(16), Renderer::cpu()).unwrap();
    let uops = k.linearize(Some("lin_head"), None);
    assert_eq!(uops[0].op(), Op::Name);
    assert!(matches!(uops[0].arg(), Arg::Name(n) if n == "lin_head"));
    assert_eq!(uops.last().unwrap().op(), Op::Sink);
}

#[test]
fn test_grouped_lowering_structure() {
    let mut k = Kernel::new(matvec_ast(64, 4096), Renderer::gpu()).unwrap();
    k.apply_opt(Opt::group(0, 16)).unwrap();
    let nodes = k.get_optimized_ast(None).toposort();

    let locals: Vec<_> = nodes.iter().filter(|u| u.op() == Op::DefineLocal).collect();
    assert_eq!(locals.len(), 1);
    // first stage stores into the local, second reduce drains it
    let reduces: Vec<_> = nodes.iter().filter(|u| u.op() == Op::ReduceAxis).collect();
    assert_eq!(reduces.len(), 2);
    let stores: Vec<_> = nodes.iter().filter(|u| u.op() == Op::Store).collect();
    assert_eq!(stores.len(), 2);
}

#[test]
fn test_program_of_unoptimized_kernel() {
    let k = Kernel::new(matvec_ast(33, 7), Renderer::cpu()).unwrap();
    let prog = k.to_program(None, None);
    assert!(!prog.src.is_empty());
    assert_eq!(prog.name, "r_33_7");
    assert_eq!(prog.device, "CPU");
    assert!(prog.global_size.is_none());
    assert_eq!(prog.mem_estimate, (33 * 7 + 7 + 33) * 4);
    assert!(prog.applied_opts.is_empty());
}

#[test]
fn test_program_work_sizes_with_locals() {
    let mut k = Kernel::new(matvec_ast(512, 256), Renderer::gpu()).unwrap();
    k.hand_coded_optimizations().unwrap();
    let prog = k.to_program(None, None);
    assert_eq!(prog.global_size, Some([1, 1, 1]));
    assert_eq!(prog.local_size, Some([1, 1, 1]));
}

#[test]
fn test_name_collision_suffix() {
    let a = Kernel::new(matvec_ast(37, 11), Renderer::cpu()).unwrap();
    let b = Kernel::new(matvec_ast(37, 11), Renderer::cpu()).unwrap();
    assert_eq!(a.name(), "r_37_11");
    assert_eq!(b.name(), "r_37_11n1");
    // cached after first computation
    assert_eq!(b.name(), "r_37_11n1");
}

#[test]
fn test_relinearize_is_stable() {
    let mut k = Kernel::new(matvec_ast(64, 128), Renderer::gpu()).unwrap();
    k.hand_coded_optimizations().unwrap();
    let first = k.linearize(Some("again"), None);
    let second = k.linearize(Some("again"), None);
    assert_eq!(first.len(), second.len());
    for (x, y) in first.iter().zip(second.iter()) {
        assert_eq!(x.op(), y.op());
    }
}
