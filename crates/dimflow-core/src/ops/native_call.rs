use crate::backend::{Backend, NativeHandle};
use crate::error::{Error, Result};
use crate::registry::adopt;
use crate::reshape::{reshaped_native, reshaped_tensor};
use crate::shape::{merge_shapes, Dim, DimKind, Shape};
use crate::tensor::{backend_for, Tensor};

/// Call `f` on the natives of `inputs` in a canonical layout and wrap its
/// single result.
///
/// Every input is laid out as `(batch, spatial.., channel)` or, with
/// `channels_last == Some(false)`, as `(batch, channel, spatial..)`. All
/// non-spatial, non-channel dims are folded into the batch axis and all channel
/// dims into the channel axis. Missing batch and spatial dims are broadcast so
/// every input has the same batch and spatial sizes. By default the layout
/// follows [`Backend::prefers_channels_last`].
///
/// The result must have the same layout; its channel axis becomes
/// `channel_dim`. Functions returning more than one buffer are rejected.
pub fn native_call<F>(
    f: F,
    inputs: &[Tensor],
    channels_last: Option<bool>,
    channel_dim: &str,
) -> Result<Tensor>
where
    F: FnOnce(&dyn Backend, &[NativeHandle]) -> Result<Vec<NativeHandle>>,
{
    let refs: Vec<&Tensor> = inputs.iter().collect();
    let backend = backend_for(&refs)?;
    let channels_last = channels_last.unwrap_or_else(|| backend.prefers_channels_last());

    let batch_shapes: Vec<Shape> = inputs
        .iter()
        .map(|t| t.shape().non_spatial().non_channel())
        .collect();
    let spatial_shapes: Vec<Shape> = inputs.iter().map(|t| t.shape().spatial()).collect();
    let batch = merge_shapes(&batch_shapes.iter().collect::<Vec<_>>())?;
    let spatial = merge_shapes(&spatial_shapes.iter().collect::<Vec<_>>())?;
    let spatial_groups: Vec<Shape> = spatial.dims().iter().cloned().map(Shape::from).collect();

    let layout = |channel: Shape| -> Vec<Shape> {
        let mut groups = vec![batch.clone()];
        if channels_last {
            groups.extend(spatial_groups.iter().cloned());
            groups.push(channel);
        } else {
            groups.push(channel);
            groups.extend(spatial_groups.iter().cloned());
        }
        groups
    };

    let natives = inputs
        .iter()
        .map(|t| adopt(backend.as_ref(), &reshaped_native(t, &layout(t.shape().channel()), true)?))
        .collect::<Result<Vec<_>>>()?;
    let mut outputs = f(backend.as_ref(), &natives)?;
    if outputs.len() != 1 {
        return Err(Error::unsupported(
            backend.name(),
            format!("native_call returning {} outputs", outputs.len()),
        ));
    }
    let output = outputs.remove(0);
    let channel = Shape::from(Dim::unresolved(channel_dim, DimKind::Channel));
    reshaped_tensor(output, &layout(channel), false)
}
