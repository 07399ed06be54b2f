use std::sync::Arc;

use crate::backend::{as_host_scalar, Backend, UnaryOp};
use crate::bail;
use crate::broadcast::{broadcast_op, broadcast_op_over};
use crate::config;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::registry;
use crate::reshape::split_dimension;
use crate::shape::{Dim, DimKind, DimNames, Shape};
use crate::tensor::{Repr, Tensor};

// Factories and structural helpers
//
// Constant tensors are lazy: a host scalar collapsed to the requested shape.
// Factories over a non-uniform shape build a stack of uniform parts along
// the first varying stack dim.

/// Build `shape` from `make`, stacking uniform parts if `shape` is non-uniform.
fn build<F>(shape: &Shape, make: &F) -> Result<Tensor>
where
    F: Fn(&Shape) -> Result<Tensor>,
{
    let Some(along) = shape.non_uniform_dims().into_iter().next() else {
        return make(shape);
    };
    let dim = shape
        .get(&along)
        .cloned()
        .ok_or_else(|| Error::dimension_not_found(along.as_str(), shape))?;
    let count = shape.size(&along)?;
    let parts = (0..count)
        .map(|i| build(&shape.after_slice(&along, i), make))
        .collect::<Result<Vec<_>>>()?;
    Tensor::stacked(parts, &dim)
}

/// Wrap row-major host values in the configured float precision.
pub fn wrap(data: &[f64], shape: &Shape) -> Result<Tensor> {
    Tensor::from_f64(data, shape, DType::float(config::precision()))
}

/// `value` everywhere, without allocating a buffer of the full size.
pub fn full(shape: &Shape, value: f64, dtype: DType) -> Result<Tensor> {
    build(shape, &|s| {
        s.sizes()?;
        Tensor::collapsed(Tensor::scalar_typed(value, dtype), s.clone())
    })
}

pub fn zeros(shape: &Shape) -> Result<Tensor> {
    full(shape, 0.0, DType::float(config::precision()))
}

pub fn ones(shape: &Shape) -> Result<Tensor> {
    full(shape, 1.0, DType::float(config::precision()))
}

pub fn zeros_like(value: &Tensor) -> Result<Tensor> {
    full(value.shape(), 0.0, value.dtype())
}

pub fn ones_like(value: &Tensor) -> Result<Tensor> {
    full(value.shape(), 1.0, value.dtype())
}

/// Standard normal samples from the default backend's generator.
pub fn random_normal(shape: &Shape) -> Result<Tensor> {
    let dtype = DType::float(config::precision());
    build(shape, &|s| {
        let backend = registry::default_backend()?;
        Tensor::from_native(backend.random_normal(&s.sizes()?, dtype)?, s.clone())
    })
}

/// Uniform samples in `[low, high)`.
pub fn random_uniform(shape: &Shape, low: f64, high: f64) -> Result<Tensor> {
    let dtype = DType::float(config::precision());
    let unit = build(shape, &|s| {
        let backend = registry::default_backend()?;
        Tensor::from_native(backend.random_uniform(&s.sizes()?, dtype)?, s.clone())
    })?;
    if low == 0.0 && high == 1.0 {
        return Ok(unit);
    }
    unit.mul_scalar(high - low)?.add_scalar(low)
}

/// `dim.size` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, dim: &Dim) -> Result<Tensor> {
    let n = dim
        .fixed_size()
        .ok_or_else(|| Error::msg(format!("linspace needs a fixed size for '{}'", dim.name())))?;
    let backend = registry::default_backend()?;
    let native = backend.linspace(start, stop, n, DType::float(config::precision()))?;
    Tensor::from_native(native, Shape::from(dim.clone()))
}

/// Integers `start, start + step, ...` below `stop` along `dim` (size inferred).
pub fn arange(dim: &Dim, start: i64, stop: i64, step: i64) -> Result<Tensor> {
    let backend = registry::default_backend()?;
    let native = backend.range(start, stop, step, DType::int(config::precision()))?;
    Tensor::from_native(native, Shape::from(Dim::unresolved(dim.name(), dim.kind())))
}

/// `0, 1, ..` in row-major order over `shape`.
pub fn range_tensor(shape: &Shape) -> Result<Tensor> {
    let volume = shape.volume()?;
    let flat = arange(&Dim::unresolved("range", DimKind::Instance), 0, volume as i64, 1)?;
    split_dimension(&flat, "range", shape)
}

/// Coordinate grid over `dims`, with components listed along channel `vector`.
pub fn meshgrid(dims: &Shape) -> Result<Tensor> {
    let components = dims
        .dims()
        .iter()
        .map(|d| {
            let axis = arange(d, 0, d.fixed_size().unwrap_or(0) as i64, 1)?;
            axis.expand(dims)
        })
        .collect::<Result<Vec<_>>>()?;
    let vector = Dim::channel("vector", dims.rank());
    stack(&components, &vector)
}

/// Lazy stack along the new dim `dim`.
///
/// Dims missing from some values are broadcast in; sizes that differ between
/// values make the result non-uniform. All values are cast to a common dtype.
pub fn stack(values: &[Tensor], dim: &Dim) -> Result<Tensor> {
    let first = values
        .first()
        .ok_or_else(|| Error::msg(format!("cannot stack zero tensors along '{}'", dim.name())))?;
    let mut union: Vec<Dim> = Vec::new();
    for v in values {
        for d in v.shape().dims() {
            if !union.iter().any(|u| u.name() == d.name()) {
                union.push(d.clone());
            }
        }
    }
    let dtype = values.iter().map(|v| v.dtype()).fold(first.dtype(), DType::combine);
    let children = values
        .iter()
        .map(|v| {
            let missing: Vec<Dim> = union
                .iter()
                .filter(|u| !v.shape().contains(u.name()))
                .cloned()
                .collect();
            let v = if missing.is_empty() {
                v.clone()
            } else {
                v.expand(&Shape::new(missing)?)?
            };
            v.cast(dtype)
        })
        .collect::<Result<Vec<_>>>()?;
    Tensor::stacked(children, dim)
}

/// Concatenate along the existing dim `dim`.
pub fn concat(values: &[Tensor], dim: &str) -> Result<Tensor> {
    if values.is_empty() {
        bail!("cannot concatenate zero tensors along '{dim}'");
    }
    for v in values {
        if !v.shape().contains(dim) {
            return Err(Error::dimension_not_found(dim, v.shape()));
        }
    }
    let stacks: Option<Vec<&[Tensor]>> = values
        .iter()
        .map(|v| match v.repr() {
            Repr::Stack(s) if s.dim().name() == dim => Some(s.tensors()),
            _ => None,
        })
        .collect();
    if let Some(stacks) = stacks {
        let children: Vec<Tensor> = stacks.into_iter().flatten().cloned().collect();
        let d = values[0]
            .shape()
            .get(dim)
            .cloned()
            .ok_or_else(|| Error::dimension_not_found(dim, values[0].shape()))?;
        return Tensor::stacked(children, &d);
    }
    broadcast_op(|ts| concat_uniform(ts, dim), values)
}

fn concat_uniform(values: &[Tensor], dim: &str) -> Result<Tensor> {
    let others: Vec<Shape> = values.iter().map(|v| v.shape().without(dim)).collect();
    let refs: Vec<&Shape> = others.iter().collect();
    let rest = crate::shape::merge_shapes(&refs)?;
    let template = values[0].shape();
    let axis = template.index(dim)?.min(rest.rank());
    let refs: Vec<&Tensor> = values.iter().collect();
    let backend = crate::tensor::backend_for(&refs)?;
    let mut order = rest.names();
    order.insert(axis, dim.to_string());
    let mut total = 0;
    let natives = values
        .iter()
        .map(|v| {
            total += v.shape().size(dim)?;
            v.expand(&rest)?.native_in(&order)
        })
        .collect::<Result<Vec<_>>>()?;
    let natives = natives
        .iter()
        .map(|n| registry::adopt(backend.as_ref(), n))
        .collect::<Result<Vec<_>>>()?;
    let joined = template
        .get(dim)
        .ok_or_else(|| Error::dimension_not_found(dim, template))?
        .with_size(total);
    log::trace!("concatenating {} tensors along '{}'", values.len(), dim);
    Tensor::from_native(backend.concat(&natives, axis)?, rest.expand(joined, axis)?)
}

/// Lazy broadcast of `value` to include `dims`.
pub fn expand(value: &Tensor, dims: &Shape) -> Result<Tensor> {
    value.expand(dims)
}

/// Slices of `value` along `dim`, in order.
pub fn unstack(value: &Tensor, dim: &str) -> Result<Vec<Tensor>> {
    value.unstack(dim)
}

/// A tensor backed by one freshly materialized buffer.
pub fn copy(value: &Tensor) -> Result<Tensor> {
    Tensor::from_native(value.native()?, value.shape().clone())
}

/// Move every buffer of `value` to `backend` through host memory.
///
/// This is the explicit conversion that operations never perform implicitly.
pub fn convert(value: &Tensor, backend: &Arc<dyn Backend>) -> Result<Tensor> {
    match value.repr() {
        Repr::Native(n) => {
            let native = n.native();
            if native.backend_name() == backend.name() || as_host_scalar(native.as_ref()).is_some() {
                return Ok(value.clone());
            }
            let source = registry::backend(native.backend_name())?;
            let re = source.to_f64_vec(native)?;
            let converted = if native.dtype().is_complex() {
                let im = source.to_f64_vec(&source.unary(UnaryOp::Imag, native)?)?;
                backend.from_complex(&re, &im, native.shape(), native.dtype())?
            } else {
                backend.from_f64(&re, native.shape(), native.dtype())?
            };
            log::debug!("converted {} from '{}' to '{}'", n.shape(), source.name(), backend.name());
            Tensor::from_native(converted, n.shape().clone())
        }
        Repr::Collapsed(c) => Tensor::collapsed(convert(c.inner(), backend)?, c.shape().clone()),
        Repr::Stack(s) => {
            let children = s
                .tensors()
                .iter()
                .map(|t| convert(t, backend))
                .collect::<Result<Vec<_>>>()?;
            Tensor::stacked(children, s.dim())
        }
    }
}

/// False if any value references a placeholder buffer.
pub fn all_available(values: &[Tensor]) -> bool {
    values.iter().all(|v| v.is_available())
}

/// Apply `f` to every slice of `values` along `dims` (and along every
/// non-uniform stack dim), re-stacking the results.
pub fn map_<F, D>(f: F, values: &[Tensor], dims: &D) -> Result<Tensor>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
    D: DimNames + ?Sized,
{
    broadcast_op_over(f, values, &dims.dim_names())
}
