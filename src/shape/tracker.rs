//! Shape trackers: lazy chains of strided views.
//!
//! A tracker composes one or more [`View`]s; the first view indexes the
//! underlying buffer and each later view indexes the logical space of
//! the one before it. Reshapes that no single view can represent push a
//! new view instead of failing, so permutes, pads and splits compose
//! freely. All operations are pure.

use smallvec::SmallVec;

use super::view::{strides_for_shape, View};
use crate::error::{KernelOptError, OptResult};

/// Per-axis stride, or `None` when the axis is masked or the chain is
/// not affine.
pub type RealStrides = SmallVec<[Option<isize>; 8]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeTracker {
    views: SmallVec<[View; 2]>,
}

impl ShapeTracker {
    /// A contiguous tracker over `shape`.
    pub fn from_shape(shape: &[usize]) -> ShapeTracker {
        ShapeTracker {
            views: [View::from_shape(shape)].into_iter().collect(),
        }
    }

    /// A tracker over a single explicit view.
    pub fn from_view(view: View) -> ShapeTracker {
        ShapeTracker {
            views: [view].into_iter().collect(),
        }
    }

    #[inline]
    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// The logical shape, i.e. the shape of the last view.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.views.last().map(|v| v.shape()).unwrap_or(&[])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shape().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shape().is_empty()
    }

    /// Number of logical elements.
    pub fn size(&self) -> usize {
        self.views.last().map(|v| v.size()).unwrap_or(1)
    }

    /// True when the whole chain is a plain row-major identity.
    pub fn contiguous(&self) -> bool {
        self.views.len() == 1 && self.views[0].contiguous()
    }

    /// Reorders the logical axes.
    pub fn permute(&self, perm: &[usize]) -> ShapeTracker {
        let mut views = self.views.clone();
        let last = views.last_mut().expect("tracker has at least one view");
        *last = last.permute(perm);
        ShapeTracker { views }
    }

    /// Pads each logical axis by `(left, right)`, masking the padding.
    pub fn pad(&self, arg: &[(usize, usize)]) -> ShapeTracker {
        let mut views = self.views.clone();
        let last = views.last_mut().expect("tracker has at least one view");
        *last = last.pad(arg);
        ShapeTracker { views }
    }

    /// Reshapes to `new_shape`. A shape with a different element count
    /// is an error; a shape the tail view cannot represent pushes a new
    /// view onto the chain.
    pub fn reshape(&self, new_shape: &[usize]) -> OptResult<ShapeTracker> {
        let new_size: usize = new_shape.iter().product();
        if new_size != self.size() {
            return Err(KernelOptError::shape(format!(
                "cannot reshape {:?} (size {}) to {:?} (size {})",
                self.shape(),
                self.size(),
                new_shape,
                new_size
            )));
        }
        let mut views = self.views.clone();
        let reshaped = views
            .last()
            .expect("tracker has at least one view")
            .reshape(new_shape);
        match reshaped {
            Some(v) => *views.last_mut().unwrap() = v,
            None => views.push(View::from_shape(new_shape)),
        }
        let mut st = ShapeTracker { views };
        st.simplify();
        Ok(st)
    }

    /// Appends `outer`'s views after this tracker's, re-merging where
    /// possible. `self` stays closest to the buffer.
    pub fn compose(&self, outer: &ShapeTracker) -> ShapeTracker {
        let mut views = self.views.clone();
        views.extend(outer.views.iter().cloned());
        let mut st = ShapeTracker { views };
        st.simplify();
        st
    }

    /// Folds a trailing identity view (contiguous, unmasked, offset 0)
    /// into the view below it when that view can absorb the reshape.
    fn simplify(&mut self) {
        while self.views.len() >= 2 {
            let last = self.views.last().unwrap();
            if !last.contiguous() {
                break;
            }
            let shape: SmallVec<[usize; 8]> = last.shape().iter().copied().collect();
            let below = &self.views[self.views.len() - 2];
            match below.reshape(&shape) {
                Some(merged) => {
                    self.views.pop();
                    *self.views.last_mut().unwrap() = merged;
                }
                None => break,
            }
        }
    }

    /// Per-axis strides of the composed chain, or `None` where the axis
    /// is masked (unless `ignore_valid`) or the chain is not affine.
    pub fn real_strides(&self, ignore_valid: bool) -> RealStrides {
        if self.views.len() != 1 {
            return self.shape().iter().map(|_| None).collect();
        }
        let v = &self.views[0];
        (0..v.shape().len())
            .map(|i| {
                if v.shape()[i] == 1 {
                    Some(0)
                } else if v.axis_is_masked(i) && !ignore_valid {
                    None
                } else {
                    Some(v.strides()[i])
                }
            })
            .collect()
    }

    /// Axes with unit stride, candidates for vectorized access.
    pub fn unit_stride_axes(&self, ignore_valid: bool) -> SmallVec<[usize; 8]> {
        self.real_strides(ignore_valid)
            .iter()
            .enumerate()
            .filter_map(|(i, s)| (*s == Some(1)).then_some(i))
            .collect()
    }

    /// True if the validity of an element depends on this axis.
    pub fn axis_is_masked(&self, axis: usize) -> bool {
        let n = self.views.len();
        if self.views[..n - 1].iter().any(|v| v.mask().is_some()) {
            return true;
        }
        self.views[n - 1].axis_is_masked(axis)
    }

    /// Smallest buffer element count the chain can address: the highest
    /// reachable flat index of the base view, plus one.
    pub fn real_size(&self) -> usize {
        let base = &self.views[0];
        if base.size() == 0 {
            return 0;
        }
        let mut max_index = base.offset();
        for i in 0..base.shape().len() {
            let (b, e) = base.axis_mask(i);
            if e <= b {
                return 0;
            }
            let stride = base.strides()[i];
            if stride > 0 {
                max_index += (e as isize - 1) * stride;
            } else if stride < 0 {
                max_index += b as isize * stride;
            }
        }
        if max_index < 0 {
            0
        } else {
            max_index as usize + 1
        }
    }

    /// Row-major strides of the logical shape, for synthetic trackers.
    pub fn canonical_strides(&self) -> SmallVec<[isize; 8]> {
        strides_for_shape(self.shape())
    }
}
