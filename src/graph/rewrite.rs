//! The view-pushdown term rewriter run after AST fixup.
//!
//! Swizzles and staged reductions leave `VIEW` wrappers floating above
//! loads. This pass pushes them left toward the buffers: stacked views
//! merge, views hoist through `CAST`, and a view landing on a `LOAD` or
//! `STORE` folds into its tracker. The pass is pure and memoized by
//! node identity.

use hashbrown::HashMap;

use super::uop::{Arg, Op, UOp};

/// Rewrites `ast` bottom-up until no view can move further left.
pub fn view_left(ast: &UOp) -> UOp {
    let mut cache: HashMap<usize, UOp> = HashMap::new();
    rewrite(ast, &mut cache)
}

fn rewrite(op: &UOp, cache: &mut HashMap<usize, UOp>) -> UOp {
    if let Some(hit) = cache.get(&op.id()) {
        return hit.clone();
    }
    let src: Vec<UOp> = op.src().iter().map(|s| rewrite(s, cache)).collect();
    let unchanged = src.iter().zip(op.src()).all(|(a, b)| a == b);
    let mut ret = if unchanged {
        op.clone()
    } else {
        op.replace_src(src)
    };
    if ret.op() == Op::View && ret.src().len() == 1 {
        ret = push_view(&ret);
    }
    cache.insert(op.id(), ret.clone());
    ret
}

fn push_view(view: &UOp) -> UOp {
    let st = match view.arg() {
        Arg::View(st) => st.clone(),
        _ => return view.clone(),
    };
    let inner = &view.src()[0];
    match inner.op() {
        // VIEW(VIEW(x)) composes into one view
        Op::View if inner.src().len() == 1 => {
            let composed = match inner.arg() {
                Arg::View(inner_st) => inner_st.compose(&st),
                _ => return view.clone(),
            };
            push_view(&UOp::view_of(composed, inner.src()[0].clone()))
        }
        // VIEW(CAST(x)) hoists through the cast
        Op::Cast => {
            let pushed = push_view(&UOp::view_of(st, inner.src()[0].clone()));
            UOp::cast(inner.dtype().clone(), pushed)
        }
        // VIEW(LOAD/STORE) folds into the tracker
        Op::Load | Op::Store => {
            let buf_st = match inner.src()[1].arg() {
                Arg::View(buf_st) => buf_st.clone(),
                _ => return view.clone(),
            };
            let mut src = inner.src().to_vec();
            src[1] = UOp::view(buf_st.compose(&st));
            inner.replace_src(src)
        }
        _ => view.clone(),
    }
}
