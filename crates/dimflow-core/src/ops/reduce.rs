use crate::backend::ReduceOp;
use crate::broadcast::broadcast_op;
use crate::error::{Error, Result};
use crate::shape::{Dim, DimNames, Shape};
use crate::tensor::{CollapsedTensor, Repr, Tensor};

use super::factory::ones_like;

// Reductions
//
// Dims absent from the operand are treated as implicit singletons: reducing
// over them is the identity, except `std`, which yields zero. Collapsed dims
// are reduced analytically from the inner tensor. Non-uniform stacks are
// reduced slice by slice; mean and std are derived from sums so every element
// carries the same weight.

/// Which dims a reduction runs over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimSelection {
    All,
    Named(Vec<String>),
}

impl DimSelection {
    fn resolve(&self, shape: &Shape) -> Vec<String> {
        match self {
            DimSelection::All => shape.names(),
            DimSelection::Named(names) => names.clone(),
        }
    }
}

impl<D: DimNames + ?Sized> From<&D> for DimSelection {
    fn from(dims: &D) -> Self {
        DimSelection::Named(dims.dim_names())
    }
}

/// Reduce `value` over `dims` with `op`.
pub fn reduce(value: &Tensor, dims: impl Into<DimSelection>, op: ReduceOp) -> Result<Tensor> {
    let names = dims.into().resolve(value.shape());
    if names.is_empty() {
        return Ok(value.clone());
    }
    let present: Vec<String> = names
        .into_iter()
        .filter(|n| value.shape().contains(n))
        .collect();
    if present.is_empty() {
        return match op {
            ReduceOp::Std => value.mul_scalar(0.0),
            _ => Ok(value.clone()),
        };
    }
    reduce_present(value, &present, op)
}

fn reduce_present(value: &Tensor, present: &[String], op: ReduceOp) -> Result<Tensor> {
    if value.shape().is_non_uniform() {
        return reduce_non_uniform(value, present, op);
    }
    match value.repr() {
        Repr::Collapsed(c) => reduce_collapsed(c, present, op),
        Repr::Stack(s) if !present.iter().any(|n| n == s.dim().name()) => {
            let children = s
                .tensors()
                .iter()
                .map(|t| reduce_present(t, present, op))
                .collect::<Result<Vec<_>>>()?;
            Tensor::stacked(children, s.dim())
        }
        _ => reduce_native(value, present, op),
    }
}

fn reduce_collapsed(c: &CollapsedTensor, present: &[String], op: ReduceOp) -> Result<Tensor> {
    let mut inner_dims = Vec::new();
    let mut repeats = 1usize;
    for name in present {
        if c.inner().shape().contains(name) {
            inner_dims.push(name.clone());
        } else {
            repeats *= c.shape().size(name)?;
        }
    }
    let inner = if inner_dims.is_empty() {
        c.inner().clone()
    } else {
        reduce_present(c.inner(), &inner_dims, op)?
    };
    let reduced = match op {
        ReduceOp::Sum if repeats != 1 => inner.mul_scalar(repeats as f64)?,
        ReduceOp::Prod if repeats != 1 => inner.powf(repeats as f64)?,
        ReduceOp::Std if inner_dims.is_empty() => inner.mul_scalar(0.0)?,
        _ => inner,
    };
    Tensor::collapsed(reduced, c.shape().without(present))
}

fn reduce_non_uniform(value: &Tensor, present: &[String], op: ReduceOp) -> Result<Tensor> {
    let varying = value.shape().non_uniform_dims();
    let Some(along) = varying.iter().find(|d| present.contains(d)) else {
        return broadcast_op(|ts| reduce_present(&ts[0], present, op), &[value.clone()]);
    };
    match op {
        ReduceOp::Mean => {
            let total = reduce_present(value, present, ReduceOp::Sum)?;
            let count = reduce_present(&ones_like(value)?, present, ReduceOp::Sum)?;
            total.to_float()?.div(&count)
        }
        ReduceOp::Std => {
            let mean = reduce_present(value, present, ReduceOp::Mean)?;
            let dev = value.sub(&mean)?;
            reduce_present(&dev.mul(&dev)?, present, ReduceOp::Mean)?.sqrt()
        }
        _ => {
            let rest: Vec<String> = present.iter().filter(|n| *n != along).cloned().collect();
            let children = value
                .unstack(along)?
                .iter()
                .map(|t| {
                    if rest.is_empty() {
                        Ok(t.clone())
                    } else {
                        reduce_present(t, &rest, op)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            let dim = value
                .shape()
                .get(along)
                .cloned()
                .ok_or_else(|| Error::dimension_not_found(along.as_str(), value.shape()))?;
            let stacked = Tensor::stacked(children, &dim)?;
            reduce_native(&stacked, &[along.clone()], op)
        }
    }
}

fn reduce_native(value: &Tensor, present: &[String], op: ReduceOp) -> Result<Tensor> {
    let backend = value.backend()?;
    let native = value.native()?;
    let axes = value.shape().indices(present)?;
    log::trace!("reducing {} over {:?} ({:?})", value.shape(), present, op);
    let reduced = backend.reduce(op, &native, &axes)?;
    Tensor::from_native(reduced, value.shape().without(present))
}

impl Tensor {
    pub fn sum(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Sum)
    }

    pub fn prod(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Prod)
    }

    pub fn mean(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Mean)
    }

    pub fn min(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Min)
    }

    pub fn max(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Max)
    }

    pub fn any(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Any)
    }

    pub fn all(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::All)
    }

    /// Population standard deviation.
    pub fn std(&self, dims: impl Into<DimSelection>) -> Result<Tensor> {
        reduce(self, dims, ReduceOp::Std)
    }
}

/// Contract `x_dims` of `x` with `y_dims` of `y`, pairwise in order.
pub fn dot<A, B>(x: &Tensor, x_dims: &A, y: &Tensor, y_dims: &B) -> Result<Tensor>
where
    A: DimNames + ?Sized,
    B: DimNames + ?Sized,
{
    let x_names = x_dims.dim_names();
    let y_names = y_dims.dim_names();
    if x_names.len() != y_names.len() {
        return Err(Error::shape_mismatch(
            &x.shape().only(&x_names),
            &y.shape().only(&y_names),
            "dot requires the same number of dims on both sides",
        ));
    }
    let mut y = y.clone();
    // Two passes so swapped names never collide.
    for (i, yn) in y_names.iter().enumerate() {
        let d = y
            .shape()
            .get(yn)
            .ok_or_else(|| Error::dimension_not_found(yn.as_str(), y.shape()))?
            .clone();
        y = y.rename_dim(yn, &d.with_name(format!("__dot{i}")))?;
    }
    for (i, xn) in x_names.iter().enumerate() {
        let d: Dim = x
            .shape()
            .get(xn)
            .ok_or_else(|| Error::dimension_not_found(xn.as_str(), x.shape()))?
            .clone();
        y = y.rename_dim(&format!("__dot{i}"), &d)?;
    }
    x.mul(&y)?.sum(&x_names)
}
