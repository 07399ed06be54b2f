use std::any::Any;
use std::sync::Arc;

use num_complex::Complex64;
use rayon::prelude::*;

use dimflow_core::{DType, NativeArray};

use crate::kernels::PARALLEL_THRESHOLD;
use crate::layout::Layout;

/// A host buffer owned by a [`CpuBackend`](crate::CpuBackend).
///
/// Values of every dtype are held as `f64`, already rounded to the dtype.
/// Complex buffers keep their imaginary parts in a second buffer. Buffers
/// are shared between arrays, so reshapes never copy.
#[derive(Debug, Clone)]
pub struct CpuArray {
    re: Arc<Vec<f64>>,
    im: Option<Arc<Vec<f64>>>,
    shape: Vec<usize>,
    dtype: DType,
    backend: Arc<str>,
}

impl CpuArray {
    /// Wrap row-major values, rounding them to `dtype`. Real dtypes drop
    /// `im`; complex dtypes default it to zeros.
    pub(crate) fn new(
        backend: Arc<str>,
        mut re: Vec<f64>,
        im: Option<Vec<f64>>,
        shape: Vec<usize>,
        dtype: DType,
    ) -> Self {
        quantize(&mut re, dtype);
        let im = if dtype.is_complex() {
            let mut im = im.unwrap_or_else(|| vec![0.0; re.len()]);
            quantize(&mut im, dtype);
            Some(Arc::new(im))
        } else {
            None
        };
        CpuArray {
            re: Arc::new(re),
            im,
            shape,
            dtype,
            backend,
        }
    }

    /// Real parts in row-major order.
    pub fn re(&self) -> &[f64] {
        &self.re
    }

    /// Imaginary parts, present for complex dtypes only.
    pub fn im(&self) -> Option<&[f64]> {
        self.im.as_deref().map(Vec::as_slice)
    }

    pub fn is_complex(&self) -> bool {
        self.im.is_some()
    }

    pub fn elem_count(&self) -> usize {
        self.re.len()
    }

    pub fn layout(&self) -> Layout {
        Layout::contiguous(&self.shape)
    }

    pub(crate) fn complex_at(&self, i: usize) -> Complex64 {
        Complex64::new(self.re[i], self.im.as_ref().map_or(0.0, |im| im[i]))
    }

    /// Same buffers under a new shape with the same element count.
    pub(crate) fn with_shape(&self, shape: Vec<usize>) -> Self {
        CpuArray {
            shape,
            ..self.clone()
        }
    }

    /// Copy out the elements of a view, in the view's logical order.
    pub(crate) fn select(&self, layout: &Layout) -> (Vec<f64>, Option<Vec<f64>>) {
        let indices: Vec<usize> = layout.strided_indices().collect();
        self.take(&indices)
    }

    /// Copy out the elements at flat `indices`.
    pub(crate) fn take(&self, indices: &[usize]) -> (Vec<f64>, Option<Vec<f64>>) {
        let re = indices.iter().map(|&i| self.re[i]).collect();
        let im = self
            .im
            .as_ref()
            .map(|im| indices.iter().map(|&i| im[i]).collect());
        (re, im)
    }
}

fn quantize(values: &mut [f64], dtype: DType) {
    if matches!(dtype, DType::F64 | DType::Complex128) {
        return;
    }
    if values.len() >= PARALLEL_THRESHOLD {
        values.par_iter_mut().for_each(|v| *v = dtype.quantize(*v));
    } else {
        values.iter_mut().for_each(|v| *v = dtype.quantize(*v));
    }
}

impl NativeArray for CpuArray {
    fn backend_name(&self) -> &str {
        &self.backend
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(re: Vec<f64>, shape: Vec<usize>, dtype: DType) -> CpuArray {
        CpuArray::new(Arc::from("cpu"), re, None, shape, dtype)
    }

    #[test]
    fn test_values_rounded_to_dtype() {
        let a = array(vec![1.7, -2.2, 0.0], vec![3], DType::I32);
        assert_eq!(a.re(), &[1.0, -2.0, 0.0]);
        let b = array(vec![0.5, 0.0], vec![2], DType::Bool);
        assert_eq!(b.re(), &[1.0, 0.0]);
        assert!(!b.is_complex());
    }

    #[test]
    fn test_complex_defaults_imaginary_zero() {
        let a = array(vec![1.0, 2.0], vec![2], DType::Complex128);
        assert_eq!(a.im(), Some(&[0.0, 0.0][..]));
        assert_eq!(a.complex_at(1), Complex64::new(2.0, 0.0));
    }

    #[test]
    fn test_reshape_shares_buffer() {
        let a = array(vec![0.0, 1.0, 2.0, 3.0], vec![2, 2], DType::F64);
        let b = a.with_shape(vec![4]);
        assert!(Arc::ptr_eq(&a.re, &b.re));
        assert_eq!(b.shape(), &[4]);
    }

    #[test]
    fn test_select_transposed() {
        let a = array((0..6).map(f64::from).collect(), vec![2, 3], DType::F64);
        let (re, im) = a.select(&a.layout().permute(&[1, 0]).unwrap());
        assert_eq!(re, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(im.is_none());
    }
}
