use crate::broadcast::broadcast_op;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::registry::adopt;
use crate::shape::{Dim, Shape};
use crate::tensor::Tensor;

use super::factory::stack;

/// Discrete Fourier transform over all spatial dims. The result is complex.
pub fn fft(x: &Tensor) -> Result<Tensor> {
    broadcast_op(|ts| transform(&ts[0], false), &[x.clone()])
}

/// Inverse of [`fft`].
pub fn ifft(k: &Tensor) -> Result<Tensor> {
    broadcast_op(|ts| transform(&ts[0], true), &[k.clone()])
}

// The backend sees (batch, spatial.., channel) with all non-spatial dims
// folded into the first and last axis, then the result is unfolded again.
fn transform(x: &Tensor, inverse: bool) -> Result<Tensor> {
    let spatial = x.shape().spatial();
    if spatial.rank() == 0 {
        return Err(Error::shape_mismatch(
            x.shape(),
            &spatial,
            "Fourier transforms need at least one spatial dim",
        ));
    }
    let x = x.to_complex()?;
    let normal = x.shape().normal_order();
    let backend = x.backend()?;
    let native = adopt(backend.as_ref(), &x.native_in(&normal.names())?)?;
    let mut standard = vec![normal.batch().volume()? * normal.instance().volume()?];
    standard.extend(spatial.sizes()?);
    standard.push(normal.channel().volume()?);
    let reshaped = backend.reshape(&native, &standard)?;
    let axes: Vec<usize> = (1..=spatial.rank()).collect();
    let transformed = backend.fft(&reshaped, &axes, inverse)?;
    let restored = backend.reshape(&transformed, native.shape())?;
    Tensor::from_native(restored, normal)
}

/// Sample frequencies of [`fft`] over the spatial dims of `resolution`, per
/// unit of `dx`, listed along channel `vector`.
pub fn fftfreq(resolution: &Shape, dx: f64) -> Result<Tensor> {
    let spatial = resolution.spatial();
    let dtype = DType::float(crate::config::precision());
    let components = spatial
        .dims()
        .iter()
        .map(|d| {
            let n = d.fixed_size().unwrap_or(0);
            let freqs: Vec<f64> = (0..n)
                .map(|i| {
                    let k = if i < n.div_ceil(2) { i as f64 } else { i as f64 - n as f64 };
                    k / (n as f64 * dx)
                })
                .collect();
            Tensor::from_f64(&freqs, &Shape::from(d.clone()), dtype)?.expand(&spatial)
        })
        .collect::<Result<Vec<_>>>()?;
    stack(&components, &Dim::channel("vector", spatial.rank()))
}
