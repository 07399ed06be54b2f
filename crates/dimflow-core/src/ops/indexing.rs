use crate::backend::{BinaryOp, CmpOp, ScatterOp};
use crate::broadcast::{broadcast_op, broadcast_op_over};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::gradient::{CustomGradient, GradientContext};
use crate::registry::adopt;
use crate::reshape::{reshaped_native, reshaped_tensor};
use crate::shape::{merge_shapes, Dim, Shape};
use crate::tensor::{backend_for, Tensor};

use super::conv::convolve;
use super::factory::{full, stack};
use super::pad::{Edge, Extrapolation};

// Gather / scatter / masking
//
// Index tensors carry one channel dim listing the coordinate of each indexed
// spatial dim (optional when a single dim is indexed). Their instance dims
// list the points. Both operations lay operands out as
//
//   grid     (batch, spatial.., channel)
//   indices  (batch, list, coord)
//   values   (batch, list, channel)
//
// and let the backend do the positional work.

/// Integer coordinates: floats are rounded to the nearest index.
fn as_index(indices: &Tensor) -> Result<Tensor> {
    let dtype = indices.dtype();
    if dtype == DType::I64 {
        Ok(indices.clone())
    } else if dtype.is_int() || dtype.is_bool() {
        indices.cast(DType::I64)
    } else {
        indices.round()?.cast(DType::I64)
    }
}

/// The coordinate dim of `indices`, checked against the indexed `spatial` dims.
fn coordinate_dim(indices: &Tensor, spatial: &Shape) -> Result<Shape> {
    let coords = indices.shape().channel();
    let count = match coords.rank() {
        0 => 1,
        1 => coords.volume()?,
        _ => {
            return Err(Error::shape_mismatch(
                indices.shape(),
                spatial,
                "indices must have at most one channel dim",
            ))
        }
    };
    if count != spatial.rank() {
        return Err(Error::shape_mismatch(
            indices.shape(),
            spatial,
            format!("{count} coordinates given for {} indexed dims", spatial.rank()),
        ));
    }
    Ok(coords)
}

/// Values of `values` at the coordinates in `indices`.
///
/// The spatial dims of `values` are indexed; its other non-batch dims are
/// carried along. The result has the batch dims of both operands, the
/// non-channel dims of `indices` and the carried dims of `values`.
pub fn gather(values: &Tensor, indices: &Tensor) -> Result<Tensor> {
    broadcast_op(|ts| gather_uniform(&ts[0], &ts[1]), &[values.clone(), indices.clone()])
}

fn gather_uniform(values: &Tensor, indices: &Tensor) -> Result<Tensor> {
    let batch = values.shape().batch().merge(&indices.shape().batch())?;
    let spatial = values.shape().spatial();
    let carried = values.shape().non_batch().non_spatial();
    let coords = coordinate_dim(indices, &spatial)?;
    let list = indices.shape().non_batch().non_channel();
    let indices = as_index(indices)?;

    let mut value_groups = vec![batch.clone()];
    value_groups.extend(spatial.dims().iter().cloned().map(Shape::from));
    value_groups.push(carried.clone());
    let backend = backend_for(&[values, &indices])?;
    let native_values = adopt(backend.as_ref(), &reshaped_native(values, &value_groups, true)?)?;
    let native_indices = adopt(
        backend.as_ref(),
        &reshaped_native(&indices, &[batch.clone(), list.clone(), coords], true)?,
    )?;
    let result = backend.batched_gather_nd(&native_values, &native_indices)?;
    reshaped_tensor(result, &[batch, list, carried], false)
}

/// How scattered values combine with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScatterMode {
    /// Overwrite; with duplicate indices, which value wins is unspecified.
    #[default]
    Update,
    /// Accumulate.
    Add,
    /// Average all values with the same index. Untouched cells keep the base value.
    Mean,
}

/// Treatment of indices outside the target grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfBounds {
    /// Drop the points before scattering.
    #[default]
    Discard,
    /// Project onto the nearest valid cell.
    Clamp,
    /// Caller guarantees all indices are valid.
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScatterOptions {
    pub mode: ScatterMode,
    pub outside: OutOfBounds,
    /// Record a backward rule that also yields a gradient for the indices.
    pub indices_gradient: bool,
}

impl ScatterOptions {
    pub fn new(mode: ScatterMode) -> Self {
        ScatterOptions {
            mode,
            ..Default::default()
        }
    }

    pub fn with_outside(mut self, outside: OutOfBounds) -> Self {
        self.outside = outside;
        self
    }

    pub fn with_indices_gradient(mut self, enabled: bool) -> Self {
        self.indices_gradient = enabled;
        self
    }
}

/// Scatter target: an existing grid, or just its shape.
#[derive(Debug, Clone)]
pub enum ScatterTarget {
    Grid(Tensor),
    Shape(Shape),
}

impl From<&Tensor> for ScatterTarget {
    fn from(t: &Tensor) -> Self {
        ScatterTarget::Grid(t.clone())
    }
}

impl From<&Shape> for ScatterTarget {
    fn from(s: &Shape) -> Self {
        ScatterTarget::Shape(s.clone())
    }
}

/// Write `values` into `target` at `indices`.
///
/// Instance dims of `indices` and `values` list the points and are consumed.
/// A target given as a shape starts as zeros for `Add` and as NaN otherwise.
pub fn scatter(
    target: impl Into<ScatterTarget>,
    indices: &Tensor,
    values: &Tensor,
    options: ScatterOptions,
) -> Result<Tensor> {
    let target = target.into();
    let grid_shape = match &target {
        ScatterTarget::Grid(g) => g.shape().clone(),
        ScatterTarget::Shape(s) => s.clone(),
    };
    let spatial = grid_shape.spatial();
    coordinate_dim(indices, &spatial)?;

    let base = match target {
        ScatterTarget::Grid(g) => g,
        ScatterTarget::Shape(s) => {
            let batches = point_batches(indices, values)?;
            let shape = merge_shapes(&[&s, &batches, &values.shape().channel()])?;
            let fill = if options.mode == ScatterMode::Add { 0.0 } else { f64::NAN };
            full(&shape, fill, values.dtype())?
        }
    };

    let mut indices = indices.clone();
    let mut values = values.clone();
    match options.outside {
        OutOfBounds::Clamp => {
            let upper = grid_upper_bound(&indices, &spatial)?;
            indices = indices.clip(&indices.scalar_like(0.0), &upper)?;
        }
        OutOfBounds::Discard => {
            let lists = indices.shape().instance();
            if lists.rank() != 1 {
                return Err(Error::shape_mismatch(
                    indices.shape(),
                    &lists,
                    "discarding outside indices requires exactly one instance dim",
                ));
            }
            let list = lists.dims()[0].name().to_string();
            let coords = indices.shape().channel();
            let rounded = as_index(&indices)?;
            let upper = grid_upper_bound(&indices, &spatial)?;
            let inside = rounded
                .ge(&rounded.scalar_like(0.0))?
                .logical_and(&rounded.le(&upper)?)?
                .all(&coords)?;
            indices = boolean_mask(&indices, &list, &inside)?;
            if values.shape().contains(&list) {
                values = boolean_mask(&values, &list, &inside)?;
            }
        }
        OutOfBounds::Undefined => {}
    }

    let inputs = [base, indices, values];
    if options.indices_gradient {
        scatter_rule(options.mode).apply(&inputs)
    } else {
        broadcast_op(|ts| scatter_forward(&ts[0], &ts[1], &ts[2], options.mode), &inputs)
    }
}

/// Largest valid index per coordinate, laid out along the coordinate dim.
fn grid_upper_bound(indices: &Tensor, spatial: &Shape) -> Result<Tensor> {
    let last: Vec<f64> = spatial
        .sizes()?
        .iter()
        .map(|&n| n.saturating_sub(1) as f64)
        .collect();
    let coords = indices.shape().channel();
    if coords.rank() == 0 {
        return Ok(Tensor::scalar_typed(last.first().copied().unwrap_or(0.0), DType::I64));
    }
    Tensor::from_f64(&last, &coords, indices.dtype())
}

fn point_batches(indices: &Tensor, values: &Tensor) -> Result<Shape> {
    values
        .shape()
        .non_channel()
        .without(&values.shape().instance())
        .merge(&indices.shape().non_channel().without(&indices.shape().instance()))
}

fn scatter_forward(base: &Tensor, indices: &Tensor, values: &Tensor, mode: ScatterMode) -> Result<Tensor> {
    let spatial = base.shape().spatial();
    let coords = coordinate_dim(indices, &spatial)?;
    let batches = merge_shapes(&[
        &point_batches(indices, values)?,
        &base.shape().non_spatial().non_channel(),
    ])?;
    let channels = base.shape().channel().merge(&values.shape().channel())?;
    let lists = indices.shape().instance().merge(&values.shape().instance())?;
    let indices = as_index(indices)?;

    let mut grid_groups = vec![batches.clone()];
    grid_groups.extend(spatial.dims().iter().cloned().map(Shape::from));
    grid_groups.push(channels.clone());

    let backend = backend_for(&[base, &indices, values])?;
    let b = backend.as_ref();
    let grid = adopt(b, &reshaped_native(base, &grid_groups, true)?)?;
    let native_values = adopt(
        b,
        &reshaped_native(values, &[batches.clone(), lists.clone(), channels.clone()], true)?,
    )?;
    let native_indices = adopt(b, &reshaped_native(&indices, &[batches, lists, coords], true)?)?;

    let result = match mode {
        ScatterMode::Update => b.scatter(&grid, &native_indices, &native_values, ScatterOp::Update)?,
        ScatterMode::Add => b.scatter(&grid, &native_indices, &native_values, ScatterOp::Add)?,
        ScatterMode::Mean => {
            let zeros = b.full(grid.shape(), 0.0, grid.dtype())?;
            let ones = b.full(native_values.shape(), 1.0, native_values.dtype())?;
            let summed = b.scatter(&zeros, &native_indices, &native_values, ScatterOp::Add)?;
            let count = b.scatter(&zeros, &native_indices, &ones, ScatterOp::Add)?;
            let at_least_one = b.binary(
                BinaryOp::Maximum,
                &count,
                &b.full(count.shape(), 1.0, count.dtype())?,
            )?;
            let mean = b.binary(BinaryOp::Div, &summed, &at_least_one)?;
            let untouched = b.compare(CmpOp::Eq, &count, &zeros)?;
            b.where_(&untouched, &grid, &mean)?
        }
    };
    reshaped_tensor(result, &grid_groups, true)
}

/// Forward/backward pair of a scatter with respect to grid, indices and values.
///
/// The values gradient gathers the output gradient at the indices. The
/// indices gradient weighs the central-difference spatial gradient of the
/// output gradient at the indices by the scattered values and averages over
/// the value channels.
pub fn scatter_rule(mode: ScatterMode) -> CustomGradient {
    CustomGradient::new(
        "scatter",
        move |inputs: &[Tensor]| {
            broadcast_op(|ts| scatter_forward(&ts[0], &ts[1], &ts[2], mode), inputs)
        },
        |ctx: &GradientContext<'_>| {
            let indices = &ctx.inputs[1];
            let values = &ctx.inputs[2];
            let values_grad = gather(ctx.grad_output, indices)?;
            let coords = indices.shape().channel();
            let coord_dim = coords
                .dims()
                .first()
                .cloned()
                .unwrap_or_else(|| Dim::channel("vector", 1));
            let gradient = spatial_gradient(ctx.grad_output, &coord_dim)?;
            let at_points = gather(&gradient, indices)?;
            let weighted = at_points.mul(values)?;
            let indices_grad = weighted.mean(&values.shape().channel().without(coord_dim.name()))?;
            Ok(vec![None, Some(indices_grad), Some(values_grad)])
        },
    )
}

/// Central differences along every spatial dim, stacked along `components`.
///
/// Channels are differentiated independently.
fn spatial_gradient(value: &Tensor, components: &Dim) -> Result<Tensor> {
    let channels = value.shape().channel().names();
    let parts = value
        .shape()
        .spatial()
        .dims()
        .iter()
        .map(|d| {
            let kernel = Tensor::from_f64(
                &[-0.5, 0.0, 0.5],
                &Shape::from(d.with_size(3)),
                value.dtype(),
            )?;
            broadcast_op_over(
                |ts| convolve(&ts[0], &kernel, Some(&Edge as &dyn Extrapolation)),
                &[value.clone()],
                &channels,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    stack(&parts, &components.with_size(parts.len()))
}

/// Coordinates of the non-zero entries of `value`, per batch entry.
///
/// The result lists points along `list_dim` and their coordinates along
/// `index_dim`. Channel dims count as non-zero if any component is.
pub fn nonzero(value: &Tensor, list_dim: &Dim, index_dim: &Dim) -> Result<Tensor> {
    let value = if value.shape().channel().rank() > 0 {
        value.abs()?.sum(&value.shape().channel())?
    } else {
        value.clone()
    };
    let batch = value.shape().batch().names();
    broadcast_op_over(
        |ts| {
            let v = &ts[0];
            let backend = v.backend()?;
            let native = adopt(backend.as_ref(), &v.native()?)?;
            let found = backend.nonzero(&native)?;
            let shape = Shape::new(vec![
                Dim::unresolved(list_dim.name(), list_dim.kind()),
                Dim::unresolved(index_dim.name(), index_dim.kind()),
            ])?;
            Tensor::from_native(found, shape)
        },
        &[value],
        &batch,
    )
}

/// Keep the slices of `x` along `dim` where `mask` is true.
///
/// Other dims of `mask` act as batch dims; differing counts per batch entry
/// produce a non-uniform result.
pub fn boolean_mask(x: &Tensor, dim: &str, mask: &Tensor) -> Result<Tensor> {
    if !mask.shape().contains(dim) {
        return Err(Error::dimension_not_found(dim, mask.shape()));
    }
    let iter = mask.shape().without(dim).names();
    broadcast_op_over(
        |ts| {
            let (x, mask) = (&ts[0], &ts[1]);
            if x.shape().contains(dim) {
                let backend = backend_for(&[x, mask])?;
                let native = adopt(backend.as_ref(), &x.native()?)?;
                let mask_native = adopt(backend.as_ref(), &mask.native()?)?;
                let kept = backend.boolean_mask(&native, &mask_native, x.shape().index(dim)?)?;
                let shape = x.shape().with_sizes(kept.shape())?;
                Tensor::from_native(kept, shape)
            } else {
                let total = mask.to_int64()?.sum(mask.shape())?.to_scalar()? as usize;
                x.expand(&mask.shape().with_size(dim, total)?)
            }
        },
        &[x.clone(), mask.clone()],
        &iter,
    )
}
