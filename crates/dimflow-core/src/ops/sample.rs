use crate::broadcast::broadcast_op;
use crate::dtype::DType;
use crate::error::Result;
use crate::registry::adopt;
use crate::reshape::{reshaped_native, reshaped_tensor};
use crate::shape::{Dim, Shape};
use crate::tensor::{backend_for, Tensor};

use super::factory::stack;
use super::indexing::gather;
use super::math::where_;

// Grid sampling
//
// Coordinates are in index space of the grid's spatial dims, listed along
// the channel dim of `coordinates`, and clamped to the grid. The backend's
// native sampler is used when available; otherwise the 2^d neighbors are
// gathered and weighted.

/// Multilinear interpolation of `grid` at `coordinates`.
pub fn grid_sample(grid: &Tensor, coordinates: &Tensor) -> Result<Tensor> {
    broadcast_op(
        |ts| grid_sample_uniform(&ts[0], &ts[1]),
        &[grid.clone(), coordinates.clone()],
    )
}

fn grid_sample_uniform(grid: &Tensor, coordinates: &Tensor) -> Result<Tensor> {
    let batch = grid.shape().batch().merge(&coordinates.shape().batch())?;
    let carried = grid.shape().non_batch().non_spatial();
    let list = coordinates.shape().non_batch().non_channel();
    let mut grid_groups = vec![batch.clone()];
    grid_groups.extend(grid.shape().spatial().dims().iter().cloned().map(Shape::from));
    grid_groups.push(carried.clone());

    let backend = backend_for(&[grid, coordinates])?;
    let native_grid = adopt(backend.as_ref(), &reshaped_native(grid, &grid_groups, true)?)?;
    let native_coords = adopt(
        backend.as_ref(),
        &reshaped_native(
            coordinates,
            &[batch.clone(), list.clone(), coordinates.shape().channel()],
            true,
        )?,
    )?;
    match backend.grid_sample(&native_grid, &native_coords) {
        Ok(result) => reshaped_tensor(result, &[batch, list, carried], false),
        Err(e) if e.is_unsupported() => {
            log::warn!(
                "backend '{}' has no grid_sample, interpolating from gathered neighbors",
                backend.name()
            );
            linear_fallback(grid, coordinates)
        }
        Err(e) => Err(e),
    }
}

fn linear_fallback(grid: &Tensor, coordinates: &Tensor) -> Result<Tensor> {
    let spatial = grid.shape().spatial();
    let coordinates = clamp_to_grid(coordinates, &spatial)?;
    let neighbors = closest_grid_values(grid, &coordinates)?;
    let frac = coordinates.sub(&coordinates.floor()?)?;
    let components = split_components(&frac, spatial.rank())?;
    let mut weighted = neighbors;
    let mut summed = Vec::with_capacity(spatial.rank());
    for (d, f) in spatial.dims().iter().zip(components) {
        let name = format!("closest_{}", d.name());
        let one_minus = f.neg()?.add_scalar(1.0)?;
        let weight = stack(&[one_minus, f], &Dim::channel(name.clone(), 2))?;
        weighted = weighted.mul(&weight)?;
        summed.push(name);
    }
    weighted.sum(&summed)
}

/// One tensor per coordinate component, in spatial order.
fn split_components(coordinates: &Tensor, rank: usize) -> Result<Vec<Tensor>> {
    match coordinates.shape().channel().dims().first() {
        Some(c) => coordinates.unstack(c.name()),
        None => Ok(vec![coordinates.clone(); rank.min(1)]),
    }
}

fn clamp_to_grid(coordinates: &Tensor, spatial: &Shape) -> Result<Tensor> {
    let last: Vec<f64> = spatial
        .sizes()?
        .iter()
        .map(|&n| n.saturating_sub(1) as f64)
        .collect();
    let coords = coordinates.shape().channel();
    let upper = if coords.rank() == 0 {
        coordinates.scalar_like(last.first().copied().unwrap_or(0.0))
    } else {
        Tensor::from_f64(&last, &coords, coordinates.dtype())?
    };
    coordinates.clip(&coordinates.scalar_like(0.0), &upper)
}

/// Values of the 2^d grid points surrounding each coordinate.
///
/// Lower and upper neighbors along spatial dim `x` are listed along channel
/// dim `closest_x`. Neighbors outside the grid are clamped to the edge.
pub fn closest_grid_values(grid: &Tensor, coordinates: &Tensor) -> Result<Tensor> {
    broadcast_op(
        |ts| closest_uniform(&ts[0], &ts[1]),
        &[grid.clone(), coordinates.clone()],
    )
}

fn closest_uniform(grid: &Tensor, coordinates: &Tensor) -> Result<Tensor> {
    let spatial = grid.shape().spatial();
    let lower = clamp_to_grid(&coordinates.floor()?, &spatial)?.cast(DType::I64)?;
    let upper = clamp_to_grid(&coordinates.floor()?.add_scalar(1.0)?, &spatial)?.cast(DType::I64)?;
    let names: Vec<String> = spatial.names();
    let coords = coordinates.shape().channel();
    let mut is_hi = vec![false; names.len()];
    neighbors(grid, &lower, &upper, &coords, &names, &mut is_hi, 0)
}

fn neighbors(
    grid: &Tensor,
    lower: &Tensor,
    upper: &Tensor,
    coords: &Shape,
    names: &[String],
    is_hi: &mut [bool],
    axis: usize,
) -> Result<Tensor> {
    let Some(name) = names.get(axis) else {
        let selected = if coords.rank() == 0 {
            if is_hi.first().copied().unwrap_or(false) {
                upper.clone()
            } else {
                lower.clone()
            }
        } else {
            let mask: Vec<f64> = is_hi.iter().map(|&h| if h { 1.0 } else { 0.0 }).collect();
            let mask = Tensor::from_f64(&mask, coords, DType::Bool)?;
            where_(&mask, upper, lower)?
        };
        return gather(grid, &selected);
    };
    is_hi[axis] = false;
    let lo = neighbors(grid, lower, upper, coords, names, is_hi, axis + 1)?;
    is_hi[axis] = true;
    let hi = neighbors(grid, lower, upper, coords, names, is_hi, axis + 1)?;
    is_hi[axis] = false;
    stack(&[lo, hi], &Dim::channel(format!("closest_{name}"), 2))
}
