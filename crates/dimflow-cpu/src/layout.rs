use dimflow_core::{bail, Error, Result};

// Layout — How a kernel walks a row-major buffer
//
// CPU buffers are always stored contiguously in row-major order. A Layout
// describes a *view* of such a buffer without copying it:
//
// 1. **Permutation**: reorder shape and strides together.
//    [2,3] with strides [3,1] → permute [1,0] → [3,2] with strides [1,3]
//
// 2. **Broadcasting**: a size-1 axis (or a missing leading axis) gets stride
//    0, so the same element is read for every position along it.
//    [1,3] with strides [3,1] → broadcast to [4,3] → strides [0,1]
//
// 3. **Narrowing**: adjust offset and size along one axis.
//    narrow(axis=1, start=1, len=2) on [2,3] → [2,2], offset 1
//
// Kernels collect the flat storage indices of a view with `strided_indices`
// and read the buffer through them.

/// Row-major strides for `dims`.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// NumPy-style broadcast of two shapes: right-aligned, size 1 stretches.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let (lo, ro) = (rank - lhs.len(), rank - rhs.len());
    (0..rank)
        .map(|i| {
            let a = if i >= lo { lhs[i - lo] } else { 1 };
            let b = if i >= ro { rhs[i - ro] } else { 1 };
            match (a, b) {
                _ if a == b => Ok(a),
                (1, _) => Ok(b),
                (_, 1) => Ok(a),
                _ => Err(Error::msg(format!(
                    "cannot broadcast buffers of shape {lhs:?} and {rhs:?}"
                ))),
            }
        })
        .collect()
}

/// Convert a flat row-major index into a multi-index.
pub fn unravel(mut flat: usize, dims: &[usize], index: &mut [usize]) {
    for i in (0..dims.len()).rev() {
        let d = dims[i].max(1);
        index[i] = flat % d;
        flat /= d;
    }
}

/// Layout describes how a logical shape maps onto flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Offset into the storage buffer where this view starts.
    offset: usize,
}

impl Layout {
    /// Contiguous row-major layout for `dims`.
    pub fn contiguous(dims: &[usize]) -> Self {
        Layout {
            dims: dims.to_vec(),
            strides: contiguous_strides(dims),
            offset: 0,
        }
    }

    pub fn new(dims: Vec<usize>, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            dims,
            strides,
            offset,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn elem_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_contiguous(&self) -> bool {
        self.offset == 0 && self.strides == contiguous_strides(&self.dims)
    }

    /// Reorder axes: `result.dims[i] == self.dims[perm[i]]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Layout> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        for &p in perm {
            if p >= rank || seen[p] {
                bail!("invalid permutation {perm:?} for rank {rank}");
            }
            seen[p] = true;
        }
        if perm.len() != rank {
            bail!("invalid permutation {perm:?} for rank {rank}");
        }
        Ok(Layout::new(
            perm.iter().map(|&p| self.dims[p]).collect(),
            perm.iter().map(|&p| self.strides[p]).collect(),
            self.offset,
        ))
    }

    /// Narrow (slice) along an axis.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Layout> {
        let rank = self.rank();
        if axis >= rank {
            bail!("axis {axis} out of range for rank {rank}");
        }
        if start + len > self.dims[axis] {
            bail!(
                "slice {start}..{} out of bounds for axis {axis} of size {}",
                start + len,
                self.dims[axis]
            );
        }
        let mut dims = self.dims.clone();
        dims[axis] = len;
        Ok(Layout::new(
            dims,
            self.strides.clone(),
            self.offset + start * self.strides[axis],
        ))
    }

    /// View this layout as `target`, repeating size-1 and missing leading axes.
    pub fn broadcast_as(&self, target: &[usize]) -> Result<Layout> {
        if target.len() < self.rank() {
            bail!(
                "cannot broadcast shape {:?} to lower rank {target:?}",
                self.dims
            );
        }
        let lead = target.len() - self.rank();
        let mut strides = vec![0; target.len()];
        for (i, (&d, &s)) in self.dims.iter().zip(&self.strides).enumerate() {
            let t = target[lead + i];
            if d == t {
                strides[lead + i] = s;
            } else if d != 1 {
                bail!(
                    "cannot broadcast shape {:?} to {target:?}",
                    self.dims
                );
            }
        }
        Ok(Layout::new(target.to_vec(), strides, self.offset))
    }

    /// flat_index = offset + sum(index[i] * stride[i])
    pub fn flat_index(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (&i, &s)| acc + i * s)
    }

    /// Iterator over the flat storage indices of this view, in logical order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter — Flat storage indices of a Layout in row-major logical order
//
// For a contiguous layout this counts 0, 1, 2, ... For permuted or broadcast
// views it follows the strides (possibly revisiting elements).

/// Iterator that yields flat storage indices for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Flat index of `current`, updated incrementally.
    position: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims.clone(),
            strides: layout.strides.clone(),
            position: layout.offset,
            remaining: layout.elem_count(),
            started: false,
        }
    }

    /// Advance the multi-index by one (rightmost axis first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            self.position += self.strides[i];
            if self.current[i] < self.dims[i] {
                return;
            }
            self.position -= self.current[i] * self.strides[i];
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.position)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}
