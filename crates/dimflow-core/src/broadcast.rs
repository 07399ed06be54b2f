use std::sync::Arc;

use crate::backend::{Backend, NativeHandle};
use crate::error::{Error, Result};
use crate::shape::{merge_shapes, Dim, Shape};
use crate::tensor::{backend_for, Repr, Tensor};

// Broadcasting engine
//
// Every element-wise, comparison and reduction operation goes through
// `broadcast_op`. Operands with uniform shapes are handed to the operation
// directly and rely on native size-1 broadcasting. A stack whose children
// differ in shape cannot be materialized, so the operation is distributed:
//
//   1. Collect the stack dims along which some operand's sizes vary.
//   2. Take the first one, unstack every operand along it (operands without
//      it, or with it at size 1, are repeated), recurse on each slice in order.
//   3. Re-stack the results along that dim.
//
// Each recursion removes one dim, so the recursion terminates. Slices are
// processed and re-assembled in stack order.

/// Stack dims that require distribution, first encountered first.
pub fn iteration_dims(operands: &[Tensor]) -> Vec<String> {
    let mut dims: Vec<String> = Vec::new();
    for t in operands {
        for d in t.shape().non_uniform_dims() {
            if !dims.contains(&d) {
                dims.push(d);
            }
        }
    }
    dims
}

/// Apply `op` to `operands`, distributing over non-uniform stack dims.
pub fn broadcast_op<F>(op: F, operands: &[Tensor]) -> Result<Tensor>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    distribute(&op, operands)
}

fn distribute<F>(op: &F, operands: &[Tensor]) -> Result<Tensor>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    let dims = iteration_dims(operands);
    let Some(dim_name) = dims.first() else {
        return op(operands);
    };
    let (dim, size) = stack_dim(operands, dim_name)?;
    log::trace!("distributing over '{}' ({} slices)", dim_name, size);
    let slices = operands
        .iter()
        .map(|t| t.unstack_or_repeat(dim_name, size))
        .collect::<Result<Vec<_>>>()?;
    let results = (0..size)
        .map(|i| {
            let slice: Vec<Tensor> = slices.iter().map(|s| s[i].clone()).collect();
            distribute(op, &slice)
        })
        .collect::<Result<Vec<_>>>()?;
    Tensor::stacked(results, &dim)
}

/// Like [`broadcast_op`] for operations without a tensor result.
pub fn broadcast_each<F>(op: F, operands: &[Tensor]) -> Result<()>
where
    F: Fn(&[Tensor]) -> Result<()>,
{
    each(&op, operands)
}

fn each<F>(op: &F, operands: &[Tensor]) -> Result<()>
where
    F: Fn(&[Tensor]) -> Result<()>,
{
    let dims = iteration_dims(operands);
    let Some(dim_name) = dims.first() else {
        return op(operands);
    };
    let (_, size) = stack_dim(operands, dim_name)?;
    let slices = operands
        .iter()
        .map(|t| t.unstack_or_repeat(dim_name, size))
        .collect::<Result<Vec<_>>>()?;
    for i in 0..size {
        let slice: Vec<Tensor> = slices.iter().map(|s| s[i].clone()).collect();
        each(op, &slice)?;
    }
    Ok(())
}

/// Distribute over explicitly named dims (in addition to non-uniform ones).
pub fn broadcast_op_over<F>(op: F, operands: &[Tensor], dims: &[String]) -> Result<Tensor>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    over(&op, operands, dims)
}

fn over<F>(op: &F, operands: &[Tensor], dims: &[String]) -> Result<Tensor>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    let Some((dim_name, rest)) = dims.split_first() else {
        return distribute(op, operands);
    };
    if !operands.iter().any(|t| t.shape().contains(dim_name)) {
        return over(op, operands, rest);
    }
    let (dim, size) = stack_dim(operands, dim_name)?;
    let slices = operands
        .iter()
        .map(|t| t.unstack_or_repeat(dim_name, size))
        .collect::<Result<Vec<_>>>()?;
    let results = (0..size)
        .map(|i| {
            let slice: Vec<Tensor> = slices.iter().map(|s| s[i].clone()).collect();
            over(op, &slice, rest)
        })
        .collect::<Result<Vec<_>>>()?;
    Tensor::stacked(results, &dim)
}

fn stack_dim(operands: &[Tensor], name: &str) -> Result<(Dim, usize)> {
    let mut found: Option<(Dim, usize)> = None;
    for t in operands {
        let Some(d) = t.shape().get(name) else {
            continue;
        };
        let size = d.fixed_size().ok_or_else(|| Error::NonUniformMaterialization {
            shape: t.shape().clone(),
            dims: vec![name.to_string()],
        })?;
        let current = found.as_ref().map(|(_, s)| *s);
        match current {
            None | Some(1) => found = Some((d.clone(), size)),
            Some(s) if s == size || size == 1 => {}
            Some(_) => {
                return Err(Error::shape_mismatch(
                    operands[0].shape(),
                    t.shape(),
                    format!("incompatible sizes for '{}'", name),
                ))
            }
        }
    }
    match found {
        Some(f) => Ok(f),
        None => Err(Error::dimension_not_found(name, &Shape::scalar())),
    }
}

/// Merge operand shapes and materialize each operand in the merged order.
///
/// Collapsed dims are left as size-1 axes for the backend to broadcast.
pub fn broadcastable_natives(
    operands: &[&Tensor],
) -> Result<(Shape, Vec<NativeHandle>, Arc<dyn Backend>)> {
    let shapes: Vec<&Shape> = operands.iter().map(|t| t.shape()).collect();
    let shape = merge_shapes(&shapes)?;
    if !shape.is_uniform() {
        return Err(Error::NonUniformMaterialization {
            dims: shape.non_uniform_dims(),
            shape,
        });
    }
    let backend = backend_for(operands)?;
    let order = shape.names();
    let natives = operands
        .iter()
        .map(|t| t.materialize(&order, backend.as_ref(), false))
        .collect::<Result<Vec<_>>>()?;
    Ok((shape, natives, backend))
}

/// Run a native n-ary element-wise function on uniform operands.
///
/// When every operand is collapsed over a common set of broadcast dims, the
/// function runs on the inner tensors only and the result stays collapsed.
pub(crate) fn elementwise<F>(operands: &[Tensor], f: &F) -> Result<Tensor>
where
    F: Fn(&dyn Backend, &[NativeHandle]) -> Result<NativeHandle>,
{
    let outer_shapes: Vec<&Shape> = operands.iter().map(|t| t.shape()).collect();
    let outer = merge_shapes(&outer_shapes)?;
    let cores: Vec<&Tensor> = operands.iter().map(|t| t.collapsed_core()).collect();
    let any_collapsed = operands
        .iter()
        .any(|t| matches!(t.repr(), Repr::Collapsed(_)));
    if any_collapsed {
        let core_shapes: Vec<&Shape> = cores.iter().map(|t| t.shape()).collect();
        let inner = merge_shapes(&core_shapes)?;
        let same_sizes = inner
            .dims()
            .iter()
            .all(|d| outer.get(d.name()).map(|o| o.size()) == Some(d.size()));
        if inner.rank() < outer.rank() && same_sizes {
            let (shape, natives, backend) = broadcastable_natives(&cores)?;
            let result = Tensor::from_native(f(backend.as_ref(), &natives)?, shape)?;
            return Tensor::collapsed(result, outer);
        }
    }
    let refs: Vec<&Tensor> = operands.iter().collect();
    let (shape, natives, backend) = broadcastable_natives(&refs)?;
    Tensor::from_native(f(backend.as_ref(), &natives)?, shape)
}
