use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::bail;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::gradient::CustomGradient;
use crate::tensor::Tensor;

// Backend — Capability interface of a native numeric runtime
//
// A backend owns native buffers and knows how to compute on them. dimflow
// never looks inside a buffer: it only asks the backend to reshape,
// transpose, tile, combine and reduce them, always with plain positional
// axes. All naming, broadcasting and batching logic lives above this trait.
//
// Buffers are passed around as `Arc<dyn NativeArray>`. Several backends can
// be registered at once; the registry decides which one runs an operation by
// looking at `NativeArray::backend_name` of the operands.
//
// Capabilities that a runtime does not have return
// `Error::UnsupportedOperation` (see the default methods below). Callers use
// that to fall back to generic implementations built from other primitives.

/// A native buffer owned by some backend.
pub trait NativeArray: fmt::Debug + Send + Sync + 'static {
    /// Name of the backend that owns this buffer.
    fn backend_name(&self) -> &str;

    fn dtype(&self) -> DType;

    /// Static shape (positional sizes).
    fn shape(&self) -> &[usize];

    /// True for symbolic buffers that hold no data (e.g. while tracing).
    fn is_placeholder(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a native buffer.
pub type NativeHandle = Arc<dyn NativeArray>;

/// Backend name reported by [`HostScalar`].
pub const HOST: &str = "host";

/// A backend-agnostic scalar constant.
///
/// Numbers combined with tensors are wrapped in a `HostScalar` so they do not
/// bind an operation to any particular backend. The backend chosen for the
/// operation converts them with [`Backend::from_f64`] / [`Backend::from_complex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostScalar {
    pub re: f64,
    pub im: f64,
    pub dtype: DType,
}

impl HostScalar {
    pub fn new(value: f64, dtype: DType) -> Self {
        HostScalar {
            re: value,
            im: 0.0,
            dtype,
        }
    }

    pub fn handle(self) -> NativeHandle {
        Arc::new(self)
    }
}

impl NativeArray for HostScalar {
    fn backend_name(&self) -> &str {
        HOST
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &[]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Downcast helper for host constants.
pub fn as_host_scalar(x: &dyn NativeArray) -> Option<&HostScalar> {
    x.as_any().downcast_ref::<HostScalar>()
}

// Operation enums
//
// One trait method per category, parameterized by these enums.

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Maximum,
    Minimum,
    /// Division returning 0 where the divisor is 0.
    DivNoNan,
    And,
    Or,
    Xor,
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Exp,
    Log,
    Log2,
    Log10,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Round,
    IsFinite,
    Real,
    Imag,
    Not,
}

/// Reductions over a set of axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Mean,
    Min,
    Max,
    Any,
    All,
    Std,
}

/// Comparison operations (produce boolean buffers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// How a backend combines scattered values with the base buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterOp {
    /// Overwrite. Which of several duplicates wins is unspecified.
    Update,
    /// Accumulate duplicates.
    Add,
}

/// Padding policy understood by [`Backend::pad`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PadMode {
    Constant(f64),
    /// Repeat the edge value.
    Edge,
    /// Wrap around.
    Periodic,
}

// Backend Trait

/// The capability interface every numeric runtime implements.
///
/// Layout conventions for the structured operations:
///
/// | Operation | Operands | Result |
/// |-----------|----------|--------|
/// | `batched_gather_nd` | values `(batch, spatial.., channel)`, indices `(batch, list.., coord)` | `(batch, list.., channel)` |
/// | `scatter` | base `(batch, spatial.., channel)`, indices `(batch, list, coord)`, values `(batch, list, channel)` | like base |
/// | `conv` | value `(batch, in, spatial..)`, kernel `(batch, out, in, spatial..)` | `(batch, out, spatial..)` |
/// | `grid_sample` | grid `(batch, spatial.., channel)`, coords `(batch, list.., coord)` | `(batch, list.., channel)` |
///
/// Binary, compare and where operations broadcast size-1 axes NumPy style.
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Unique name, matched against [`NativeArray::backend_name`].
    fn name(&self) -> &str;

    /// Whether structured calls should lay channels out last.
    fn prefers_channels_last(&self) -> bool {
        true
    }

    /// Whether [`Backend::custom_gradient`] records backward rules.
    fn supports_gradients(&self) -> bool {
        false
    }

    /// Whether buffers of backend `other` can be used without a copy.
    fn can_import(&self, _other: &str) -> bool {
        false
    }

    /// Zero-copy import of a foreign buffer (only called if `can_import`).
    fn import(&self, x: &NativeHandle) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), format!("import from {}", x.backend_name())))
    }

    /// Reset the random generator.
    fn seed(&self, seed: u64);

    //  Creation

    /// Create a buffer from row-major host data, rounding to `dtype`.
    fn from_f64(&self, data: &[f64], shape: &[usize], dtype: DType) -> Result<NativeHandle>;

    /// Create a complex buffer from real and imaginary parts.
    fn from_complex(
        &self,
        _re: &[f64],
        _im: &[f64],
        _shape: &[usize],
        _dtype: DType,
    ) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "from_complex"))
    }

    fn full(&self, shape: &[usize], value: f64, dtype: DType) -> Result<NativeHandle> {
        let n: usize = shape.iter().product();
        self.from_f64(&vec![value; n], shape, dtype)
    }

    /// Uniform random values in `[0, 1)`.
    fn random_uniform(&self, shape: &[usize], dtype: DType) -> Result<NativeHandle>;

    /// Standard normal random values.
    fn random_normal(&self, shape: &[usize], dtype: DType) -> Result<NativeHandle>;

    /// `start, start + step, ...` up to (excluding) `stop`.
    fn range(&self, start: i64, stop: i64, step: i64, dtype: DType) -> Result<NativeHandle> {
        if step == 0 {
            bail!("range step must not be zero");
        }
        let mut data = Vec::new();
        let mut v = start;
        while (step > 0 && v < stop) || (step < 0 && v > stop) {
            data.push(v as f64);
            v += step;
        }
        let n = data.len();
        self.from_f64(&data, &[n], dtype)
    }

    /// `n` evenly spaced values from `start` to `stop` inclusive.
    fn linspace(&self, start: f64, stop: f64, n: usize, dtype: DType) -> Result<NativeHandle> {
        let data: Vec<f64> = (0..n)
            .map(|i| {
                if n == 1 {
                    start
                } else {
                    start + (stop - start) * i as f64 / (n - 1) as f64
                }
            })
            .collect();
        self.from_f64(&data, &[n], dtype)
    }

    //  Introspection

    /// Copy the (real part of the) buffer to the host in row-major order.
    fn to_f64_vec(&self, x: &NativeHandle) -> Result<Vec<f64>>;

    //  Element-wise

    fn unary(&self, op: UnaryOp, x: &NativeHandle) -> Result<NativeHandle>;

    fn binary(&self, op: BinaryOp, lhs: &NativeHandle, rhs: &NativeHandle)
        -> Result<NativeHandle>;

    fn compare(&self, op: CmpOp, lhs: &NativeHandle, rhs: &NativeHandle) -> Result<NativeHandle>;

    /// `cond ? on_true : on_false`, element-wise.
    fn where_(
        &self,
        cond: &NativeHandle,
        on_true: &NativeHandle,
        on_false: &NativeHandle,
    ) -> Result<NativeHandle>;

    fn cast(&self, x: &NativeHandle, dtype: DType) -> Result<NativeHandle>;

    //  Reductions

    /// Reduce over `axes`, removing them from the result.
    fn reduce(&self, op: ReduceOp, x: &NativeHandle, axes: &[usize]) -> Result<NativeHandle>;

    //  Layout

    fn reshape(&self, x: &NativeHandle, shape: &[usize]) -> Result<NativeHandle>;

    /// `result.shape[i] == x.shape[perm[i]]`.
    fn transpose(&self, x: &NativeHandle, perm: &[usize]) -> Result<NativeHandle>;

    /// Repeat the buffer `multiples[i]` times along axis `i`.
    fn tile(&self, x: &NativeHandle, multiples: &[usize]) -> Result<NativeHandle>;

    fn concat(&self, xs: &[NativeHandle], axis: usize) -> Result<NativeHandle>;

    /// Stack equally shaped buffers along a new axis.
    fn stack(&self, xs: &[NativeHandle], axis: usize) -> Result<NativeHandle> {
        let expanded = xs
            .iter()
            .map(|x| {
                let mut shape = x.shape().to_vec();
                shape.insert(axis.min(shape.len()), 1);
                self.reshape(x, &shape)
            })
            .collect::<Result<Vec<_>>>()?;
        self.concat(&expanded, axis)
    }

    fn unstack(&self, x: &NativeHandle, axis: usize) -> Result<Vec<NativeHandle>>;

    fn flip(&self, _x: &NativeHandle, _axes: &[usize]) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "flip"))
    }

    /// Pad each axis by `(lower, upper)` elements.
    fn pad(&self, _x: &NativeHandle, _widths: &[(usize, usize)], _mode: PadMode) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "pad"))
    }

    //  Indexing

    /// Coordinates of non-zero elements as an `(count, rank)` integer buffer.
    fn nonzero(&self, _x: &NativeHandle) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "nonzero"))
    }

    /// Keep the slices along `axis` where the 1-D `mask` is true.
    fn boolean_mask(&self, _x: &NativeHandle, _mask: &NativeHandle, _axis: usize) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "boolean_mask"))
    }

    fn batched_gather_nd(&self, _values: &NativeHandle, _indices: &NativeHandle) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "batched_gather_nd"))
    }

    fn scatter(
        &self,
        _base: &NativeHandle,
        _indices: &NativeHandle,
        _values: &NativeHandle,
        _op: ScatterOp,
    ) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "scatter"))
    }

    //  Structured

    /// Cross-correlation. With `zero_padding` the spatial size is kept,
    /// otherwise only fully overlapping positions are computed.
    fn conv(&self, _value: &NativeHandle, _kernel: &NativeHandle, _zero_padding: bool) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "conv"))
    }

    /// Complex DFT over `axes`. The inverse is normalized by the element count.
    fn fft(&self, _x: &NativeHandle, _axes: &[usize], _inverse: bool) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "fft"))
    }

    /// Multilinear interpolation of `grid` at `coords` (clamped to the grid).
    fn grid_sample(&self, _grid: &NativeHandle, _coords: &NativeHandle) -> Result<NativeHandle> {
        Err(Error::unsupported(self.name(), "grid_sample"))
    }

    //  Gradients

    /// Evaluate `rule.forward` on `inputs`, recording `rule.backward` as its
    /// gradient with the runtime's autodiff mechanism.
    fn custom_gradient(&self, _rule: &CustomGradient, _inputs: &[Tensor]) -> Result<Tensor> {
        Err(Error::unsupported(self.name(), "custom_gradient"))
    }

    /// Block gradient flow. Identity for runtimes without autodiff.
    fn stop_gradient(&self, x: &NativeHandle) -> Result<NativeHandle> {
        Ok(x.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_scalar_is_rank_zero() {
        let s = HostScalar::new(2.5, DType::F32).handle();
        assert_eq!(s.backend_name(), HOST);
        assert!(s.shape().is_empty());
        assert!(!s.is_placeholder());
        assert_eq!(as_host_scalar(s.as_ref()).map(|h| h.re), Some(2.5));
    }
}
