use std::fmt;

use crate::backend::PadMode;
use crate::broadcast::broadcast_op;
use crate::error::Result;
use crate::registry::adopt;
use crate::tensor::Tensor;

/// Boundary policy deciding which values are added by padding.
pub trait Extrapolation: fmt::Debug + Send + Sync {
    fn mode(&self) -> PadMode;

    /// True if padding only adds zeros. Convolution then asks the backend
    /// for zero padding instead of padding the operand first.
    fn is_zero(&self) -> bool {
        matches!(self.mode(), PadMode::Constant(v) if v == 0.0)
    }

    fn pad(&self, value: &Tensor, widths: &[(&str, (usize, usize))]) -> Result<Tensor> {
        pad_with(value, widths, self.mode())
    }
}

/// Pads with a fixed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f64);

/// Zero padding.
pub const ZERO: Constant = Constant(0.0);

impl Extrapolation for Constant {
    fn mode(&self) -> PadMode {
        PadMode::Constant(self.0)
    }
}

/// Repeats the outermost values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge;

impl Extrapolation for Edge {
    fn mode(&self) -> PadMode {
        PadMode::Edge
    }
}

/// Wraps around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periodic;

impl Extrapolation for Periodic {
    fn mode(&self) -> PadMode {
        PadMode::Periodic
    }
}

/// Pad `value` by `(lower, upper)` cells along the named dims.
///
/// Dims not present in `value` are skipped.
pub fn pad(value: &Tensor, widths: &[(&str, (usize, usize))], extrapolation: &dyn Extrapolation) -> Result<Tensor> {
    extrapolation.pad(value, widths)
}

fn pad_with(value: &Tensor, widths: &[(&str, (usize, usize))], mode: PadMode) -> Result<Tensor> {
    broadcast_op(
        |ts| {
            let value = &ts[0];
            let shape = value.shape();
            let mut per_axis = vec![(0, 0); shape.rank()];
            let mut sizes = shape.sizes()?;
            for (name, w) in widths {
                if let Ok(i) = shape.index(name) {
                    per_axis[i] = *w;
                    sizes[i] += w.0 + w.1;
                }
            }
            if per_axis.iter().all(|w| *w == (0, 0)) {
                return Ok(value.clone());
            }
            let backend = value.backend()?;
            let native = adopt(backend.as_ref(), &value.native()?)?;
            let padded = backend.pad(&native, &per_axis, mode)?;
            Tensor::from_native(padded, shape.with_sizes(&sizes)?)
        },
        &[value.clone()],
    )
}
