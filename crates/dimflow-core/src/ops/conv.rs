use crate::broadcast::broadcast_op;
use crate::error::{Error, Result};
use crate::registry::adopt;
use crate::reshape::{reshaped_native, reshaped_tensor};
use crate::shape::Shape;
use crate::tensor::{backend_for, Tensor};

use super::pad::Extrapolation;

/// Cross-correlate `value` with `kernel` along the spatial dims of `kernel`.
///
/// Channel dims of `value` are contracted with the equally named dims of
/// `kernel`; the remaining channel dims of `kernel` are the output channels.
/// Spatial dims of `value` not in `kernel` are treated like batch dims.
///
/// With an extrapolation the result keeps the spatial size of `value`;
/// without one only fully overlapping positions are kept.
pub fn convolve(value: &Tensor, kernel: &Tensor, extrapolation: Option<&dyn Extrapolation>) -> Result<Tensor> {
    let conv_shape = kernel.shape().spatial();
    for d in conv_shape.dims() {
        if !value.shape().contains(d.name()) {
            return Err(Error::dimension_not_found(d.name(), value.shape()));
        }
    }
    let mut value = value.clone();
    let zero_padding = match extrapolation {
        Some(e) if e.is_zero() => true,
        Some(e) => {
            let widths: Vec<(&str, (usize, usize))> = conv_shape
                .dims()
                .iter()
                .map(|d| {
                    let k = d.fixed_size().unwrap_or(1);
                    (d.name(), (k / 2, k.saturating_sub(1) / 2))
                })
                .collect();
            value = e.pad(&value, &widths)?;
            false
        }
        None => false,
    };
    broadcast_op(
        |ts| convolve_uniform(&ts[0], &ts[1], &conv_shape, zero_padding),
        &[value, kernel.clone()],
    )
}

fn convolve_uniform(value: &Tensor, kernel: &Tensor, conv_shape: &Shape, zero_padding: bool) -> Result<Tensor> {
    let in_channels = value.shape().channel();
    let out_channels = kernel.shape().channel().without(&in_channels);
    let batch = value
        .shape()
        .non_channel()
        .without(conv_shape)
        .merge(&kernel.shape().batch())?;
    let value_spatial: Vec<Shape> = conv_shape
        .names()
        .iter()
        .filter_map(|n| value.shape().get(n).cloned().map(Shape::from))
        .collect();
    let kernel_spatial: Vec<Shape> = conv_shape.dims().iter().cloned().map(Shape::from).collect();

    let mut kernel_groups = vec![batch.clone(), out_channels.clone(), in_channels.clone()];
    kernel_groups.extend(kernel_spatial);
    let mut value_groups = vec![batch.clone(), in_channels];
    value_groups.extend(value_spatial.iter().cloned());

    let backend = backend_for(&[value, kernel])?;
    let native_kernel = adopt(backend.as_ref(), &reshaped_native(kernel, &kernel_groups, true)?)?;
    let native_value = adopt(backend.as_ref(), &reshaped_native(value, &value_groups, true)?)?;
    log::trace!("convolving {} with {}", value.shape(), kernel.shape());
    let result = backend.conv(&native_value, &native_kernel, zero_padding)?;

    let mut result_groups = vec![batch, out_channels];
    result_groups.extend(value_spatial);
    reshaped_tensor(result, &result_groups, false)
}
