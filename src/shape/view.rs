//! A single strided view over a flat buffer.
//!
//! A view maps an n-dimensional coordinate to a flat index through
//! per-axis strides plus an offset, with an optional per-axis validity
//! mask for padded regions. Views are pure values; every operation
//! returns a new view.

use smallvec::{smallvec, SmallVec};

/// A kernel shape. Kernels are low-rank, so dims live inline.
pub type Shape = SmallVec<[usize; 8]>;
/// Per-axis strides, in elements.
pub type Strides = SmallVec<[isize; 8]>;
/// Per-axis valid coordinate range `[begin, end)`.
pub type Mask = SmallVec<[(usize, usize); 8]>;

/// Row-major strides for a shape, with size-1 axes canonicalized to 0.
pub fn strides_for_shape(shape: &[usize]) -> Strides {
    let mut strides: Strides = smallvec![0; shape.len()];
    let mut acc = 1isize;
    for i in (0..shape.len()).rev() {
        if shape[i] != 1 {
            strides[i] = acc;
            acc *= shape[i] as isize;
        }
    }
    strides
}

/// A strided, possibly masked window into a flat buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct View {
    shape: Shape,
    strides: Strides,
    offset: isize,
    mask: Option<Mask>,
    contiguous: bool,
}

impl View {
    /// Creates a canonical view. `strides == None` means row-major;
    /// size-1 axes get stride 0 and a mask covering the whole shape is
    /// dropped.
    pub fn create(
        shape: &[usize],
        strides: Option<&[isize]>,
        offset: isize,
        mask: Option<&[(usize, usize)]>,
    ) -> View {
        let canonical: Strides = match strides {
            Some(s) => shape
                .iter()
                .zip(s.iter())
                .map(|(&sh, &st)| if sh == 1 { 0 } else { st })
                .collect(),
            None => strides_for_shape(shape),
        };
        let mask: Option<Mask> = mask.and_then(|m| {
            if m.iter().zip(shape.iter()).all(|(&(b, e), &s)| (b, e) == (0, s)) {
                None
            } else {
                Some(m.iter().copied().collect())
            }
        });
        let contiguous =
            offset == 0 && mask.is_none() && canonical == strides_for_shape(shape);
        View {
            shape: shape.iter().copied().collect(),
            strides: canonical,
            offset,
            mask,
            contiguous,
        }
    }

    /// A contiguous row-major view of `shape`.
    pub fn from_shape(shape: &[usize]) -> View {
        View::create(shape, None, 0, None)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn offset(&self) -> isize {
        self.offset
    }

    #[inline]
    pub fn mask(&self) -> Option<&[(usize, usize)]> {
        self.mask.as_deref()
    }

    #[inline]
    pub fn contiguous(&self) -> bool {
        self.contiguous
    }

    /// Number of logical elements addressed by the view.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// The valid range of an axis, defaulting to the whole axis.
    #[inline]
    pub fn axis_mask(&self, axis: usize) -> (usize, usize) {
        match &self.mask {
            Some(m) => m[axis],
            None => (0, self.shape[axis]),
        }
    }

    /// True if the axis has a mask narrower than its full extent.
    pub fn axis_is_masked(&self, axis: usize) -> bool {
        self.axis_mask(axis) != (0, self.shape[axis])
    }

    /// Reorders the axes.
    pub fn permute(&self, perm: &[usize]) -> View {
        debug_assert_eq!(perm.len(), self.shape.len());
        let shape: Shape = perm.iter().map(|&i| self.shape[i]).collect();
        let strides: Strides = perm.iter().map(|&i| self.strides[i]).collect();
        let mask: Option<Mask> = self
            .mask
            .as_ref()
            .map(|m| perm.iter().map(|&i| m[i]).collect());
        View::create(&shape, Some(&strides), self.offset, mask.as_deref())
    }

    /// Pads each axis by `(left, right)` virtual elements, masking the
    /// padded region invalid.
    pub fn pad(&self, arg: &[(usize, usize)]) -> View {
        debug_assert_eq!(arg.len(), self.shape.len());
        if arg.iter().all(|&(l, r)| l == 0 && r == 0) {
            return self.clone();
        }
        let shape: Shape = self
            .shape
            .iter()
            .zip(arg.iter())
            .map(|(&s, &(l, r))| s + l + r)
            .collect();
        let offset = self.offset
            - arg
                .iter()
                .zip(self.strides.iter())
                .map(|(&(l, _), &st)| l as isize * st)
                .sum::<isize>();
        let mask: Mask = (0..self.shape.len())
            .map(|i| {
                let (b, e) = self.axis_mask(i);
                let (l, _) = arg[i];
                (b + l, e + l)
            })
            .collect();
        View::create(&shape, Some(&self.strides), offset, Some(&mask))
    }

    /// Reshapes without copying, if a single view can represent it.
    ///
    /// Handles unit-axis insertion/removal, factoring an axis into
    /// parts, and merging stride-contiguous (or all-broadcast) runs.
    /// Masks survive only when they stay axis-aligned through the
    /// regrouping. Returns `None` when no single view exists.
    pub fn reshape(&self, new_shape: &[usize]) -> Option<View> {
        if new_shape == self.shape.as_slice() {
            return Some(self.clone());
        }
        let new_size: usize = new_shape.iter().product();
        if new_size != self.size() {
            return None;
        }

        let groups = group_dims(&self.shape, new_shape)?;
        let mut strides: Strides = smallvec![0; new_shape.len()];
        let mut mask: Mask = smallvec![(0, 0); new_shape.len()];

        let mut old_cursor = 0usize;
        let mut new_cursor = 0usize;
        for (old_dims, new_dims) in &groups {
            let merged = self.merge_run(&self.shape, old_dims)?;
            split_run(merged, new_shape, new_dims, &mut strides, &mut mask)?;
            old_cursor = old_dims.last().map_or(old_cursor, |&i| i + 1);
            new_cursor = new_dims.last().map_or(new_cursor, |&i| i + 1);
        }
        // trailing unit axes outside any group
        for i in old_cursor..self.shape.len() {
            if self.shape[i] != 1 || self.axis_is_masked(i) {
                return None;
            }
        }
        for s in &mut mask[new_cursor..] {
            *s = (0, 1);
        }

        Some(View::create(
            new_shape,
            Some(&strides),
            self.offset,
            Some(&mask),
        ))
    }

    /// Collapses a run of old axes into one `(size, stride, mask)`.
    fn merge_run(
        &self,
        shape: &[usize],
        dims: &[usize],
    ) -> Option<(usize, isize, (usize, usize))> {
        let real: SmallVec<[usize; 8]> =
            dims.iter().copied().filter(|&i| shape[i] != 1).collect();
        for &i in dims {
            if shape[i] == 1 && self.axis_is_masked(i) {
                return None;
            }
        }
        if real.is_empty() {
            return Some((1, 0, (0, 1)));
        }
        if real.len() == 1 {
            let i = real[0];
            return Some((shape[i], self.strides[i], self.axis_mask(i)));
        }

        let broadcast = real.iter().all(|&i| self.strides[i] == 0);
        if !broadcast {
            for w in real.windows(2) {
                let (a, b) = (w[0], w[1]);
                if self.strides[a] != self.strides[b] * shape[b] as isize {
                    return None;
                }
            }
        }
        // only the outermost real axis may carry a mask
        for &i in &real[1..] {
            if self.axis_is_masked(i) {
                return None;
            }
        }
        let size: usize = real.iter().map(|&i| shape[i]).product();
        let stride = if broadcast {
            0
        } else {
            self.strides[*real.last().unwrap()]
        };
        let inner: usize = real[1..].iter().map(|&i| shape[i]).product();
        let (b, e) = self.axis_mask(real[0]);
        Some((size, stride, (b * inner, e * inner)))
    }
}

/// Pairs up runs of old and new axes with equal products, two-pointer
/// style. Unit axes fold into whichever run they sit in.
fn group_dims(
    old: &[usize],
    new: &[usize],
) -> Option<Vec<(SmallVec<[usize; 4]>, SmallVec<[usize; 4]>)>> {
    let mut groups = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < old.len() && j < new.len() {
        let mut old_dims: SmallVec<[usize; 4]> = smallvec![i];
        let mut new_dims: SmallVec<[usize; 4]> = smallvec![j];
        let mut po = old[i];
        let mut pn = new[j];
        i += 1;
        j += 1;
        while po != pn {
            if po < pn {
                if i >= old.len() {
                    return None;
                }
                po *= old[i];
                old_dims.push(i);
                i += 1;
            } else {
                if j >= new.len() {
                    return None;
                }
                pn *= new[j];
                new_dims.push(j);
                j += 1;
            }
        }
        groups.push((old_dims, new_dims));
    }
    Some(groups)
}

/// Distributes a merged `(size, stride, mask)` over a run of new axes,
/// row-major. Fails when the mask does not split axis-aligned.
fn split_run(
    merged: (usize, isize, (usize, usize)),
    new_shape: &[usize],
    new_dims: &[usize],
    strides: &mut Strides,
    mask: &mut Mask,
) -> Option<()> {
    let (size, stride, m) = merged;
    let mut rem_size = size;
    let mut rem_mask = m;
    for &d in new_dims {
        let ns = new_shape[d];
        if ns == 1 {
            strides[d] = 0;
            mask[d] = (0, 1);
            continue;
        }
        let inner = rem_size / ns;
        let (outer_m, inner_m) = split_mask(rem_mask, inner)?;
        strides[d] = stride * inner as isize;
        mask[d] = outer_m;
        rem_size = inner;
        rem_mask = inner_m;
    }
    Some(())
}

/// Splits a masked range over `outer * inner` into per-factor ranges.
/// Legal when the mask lands on inner boundaries, or fits inside one
/// inner stretch.
fn split_mask(
    m: (usize, usize),
    inner: usize,
) -> Option<((usize, usize), (usize, usize))> {
    let (b, e) = m;
    if e <= b {
        return Some(((0, 0), (0, inner)));
    }
    if b % inner == 0 && e % inner == 0 {
        Some(((b / inner, e / inner), (0, inner)))
    } else if b / inner == (e - 1) / inner {
        Some(((b / inner, b / inner + 1), (b % inner, (e - 1) % inner + 1)))
    } else {
        None
    }
}
