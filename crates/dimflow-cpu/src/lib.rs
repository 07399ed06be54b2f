// CPU Backend — Reference host implementation of the dimflow Backend trait
//
// Every operation dimflow needs from a numeric runtime runs here on plain
// host memory, so the whole library can be used and tested without any
// accelerator.
//
// ARCHITECTURE:
// - CpuBackend owns a seedable random generator and a name; each buffer it
//   creates is tagged with that name, so several instances can be
//   registered side by side and are treated as distinct runtimes
// - CpuArray stores values as f64 rounded to the dtype, with a second buffer
//   for imaginary parts of complex dtypes
// - Layout walks permuted, broadcast and narrowed views of a buffer without
//   copying it; all binary ops broadcast size-1 axes NumPy style
// - Scalar math lives in kernels.rs; loops use rayon on large buffers
// - grid_sample and custom gradients are not implemented, dimflow falls back
//   to its generic versions
//
// USAGE:
//   dimflow_core::register_backend(Arc::new(CpuBackend::new()))?;

mod array;
mod kernels;
pub mod layout;

pub use array::CpuArray;

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use dimflow_core::backend::as_host_scalar;
use dimflow_core::bail;
use dimflow_core::{
    config, Backend, BinaryOp, CmpOp, DType, Error, NativeArray, NativeHandle, PadMode, ReduceOp,
    Result, ScatterOp, UnaryOp,
};

use layout::{broadcast_shapes, contiguous_strides, unravel, Layout};

/// Name of a backend created with [`CpuBackend::new`].
pub const DEFAULT_NAME: &str = "cpu";

/// The host backend.
pub struct CpuBackend {
    name: Arc<str>,
    rng: Mutex<StdRng>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::named(DEFAULT_NAME)
    }

    /// A CPU backend registered under another name. Buffers of differently
    /// named instances are not interchangeable.
    pub fn named(name: impl Into<String>) -> Self {
        let name: String = name.into();
        CpuBackend {
            name: Arc::from(name),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Borrow `x` as a CPU array, converting host constants.
    fn view<'a>(&self, x: &'a NativeHandle) -> Result<Cow<'a, CpuArray>> {
        if let Some(a) = x.as_any().downcast_ref::<CpuArray>() {
            if a.backend_name() == self.name() {
                return Ok(Cow::Borrowed(a));
            }
        } else if let Some(s) = as_host_scalar(x.as_ref()) {
            let im = s.dtype.is_complex().then(|| vec![s.im]);
            return Ok(Cow::Owned(CpuArray::new(
                self.name.clone(),
                vec![s.re],
                im,
                Vec::new(),
                s.dtype,
            )));
        }
        Err(Error::NoCompatibleBackend {
            backends: vec![self.name().to_string(), x.backend_name().to_string()],
        })
    }

    fn wrap(&self, re: Vec<f64>, im: Option<Vec<f64>>, shape: Vec<usize>, dtype: DType) -> NativeHandle {
        Arc::new(CpuArray::new(self.name.clone(), re, im, shape, dtype))
    }

    fn random(&self, shape: &[usize], dtype: DType, sample: impl Fn(&mut StdRng) -> f64) -> Result<NativeHandle> {
        let n: usize = shape.iter().product();
        let mut guard = self
            .rng
            .lock()
            .map_err(|_| Error::msg("cpu random generator lock poisoned"))?;
        let rng = &mut *guard;
        let re: Vec<f64> = (0..n).map(|_| sample(rng)).collect();
        let im = dtype
            .is_complex()
            .then(|| (0..n).map(|_| sample(rng)).collect());
        Ok(self.wrap(re, im, shape.to_vec(), dtype))
    }

    fn unsupported_complex(&self, op: impl fmt::Debug) -> Error {
        Error::unsupported(self.name(), format!("{op:?} on complex values"))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuBackend({})", self.name)
    }
}

// Helpers

/// Float dtype used for results of real-valued math on integer operands.
fn float_of(dtype: DType) -> DType {
    if dtype.is_float() || dtype.is_complex() {
        dtype
    } else {
        DType::float(config::precision())
    }
}

/// Component dtype of a complex dtype.
fn component_of(dtype: DType) -> DType {
    match dtype {
        DType::Complex64 => DType::F32,
        DType::Complex128 => DType::F64,
        other => other,
    }
}

fn unzip(zs: Vec<Complex64>) -> (Vec<f64>, Option<Vec<f64>>) {
    let (re, im): (Vec<f64>, Vec<f64>) = zs.into_iter().map(|z| (z.re, z.im)).unzip();
    (re, Some(im))
}

fn check_len(n: usize, shape: &[usize]) -> Result<()> {
    let expected: usize = shape.iter().product();
    if n != expected {
        bail!("{n} values do not fill a buffer of shape {shape:?} ({expected} elements)");
    }
    Ok(())
}

fn check_axis(op: &str, axis: usize, rank: usize) -> Result<()> {
    if axis >= rank {
        bail!("{op}: axis {axis} out of range for rank {rank}");
    }
    Ok(())
}

/// Size after broadcasting two sizes of which one may be 1.
fn broadcast_size(op: &str, a: usize, b: usize) -> Result<usize> {
    match (a, b) {
        _ if a == b => Ok(a),
        (1, _) => Ok(b),
        (_, 1) => Ok(a),
        _ => Err(Error::msg(format!("{op}: sizes {a} and {b} do not broadcast"))),
    }
}

/// Index along an axis of size `size` that may be broadcast.
fn pick(size: usize, i: usize) -> usize {
    if size == 1 {
        0
    } else {
        i
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn seed(&self, seed: u64) {
        if let Ok(mut rng) = self.rng.lock() {
            *rng = StdRng::seed_from_u64(seed);
            log::debug!("backend '{}' seeded with {seed}", self.name);
        }
    }

    // ---- Creation ----

    fn from_f64(&self, data: &[f64], shape: &[usize], dtype: DType) -> Result<NativeHandle> {
        check_len(data.len(), shape)?;
        Ok(self.wrap(data.to_vec(), None, shape.to_vec(), dtype))
    }

    fn from_complex(&self, re: &[f64], im: &[f64], shape: &[usize], dtype: DType) -> Result<NativeHandle> {
        check_len(re.len(), shape)?;
        check_len(im.len(), shape)?;
        Ok(self.wrap(re.to_vec(), Some(im.to_vec()), shape.to_vec(), dtype))
    }

    fn random_uniform(&self, shape: &[usize], dtype: DType) -> Result<NativeHandle> {
        self.random(shape, dtype, |rng| rng.gen::<f64>())
    }

    fn random_normal(&self, shape: &[usize], dtype: DType) -> Result<NativeHandle> {
        self.random(shape, dtype, |rng| rng.sample::<f64, _>(StandardNormal))
    }

    fn to_f64_vec(&self, x: &NativeHandle) -> Result<Vec<f64>> {
        Ok(self.view(x)?.re().to_vec())
    }

    // ---- Element-wise ----

    fn unary(&self, op: UnaryOp, x: &NativeHandle) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let shape = a.shape().to_vec();
        let re = a.re();
        if let Some(im) = a.im() {
            let out = kernels::map_n(re.len(), |i| {
                kernels::unary_complex(op, Complex64::new(re[i], im[i]))
            });
            let dtype = match op {
                UnaryOp::IsFinite | UnaryOp::Not => DType::Bool,
                UnaryOp::Abs | UnaryOp::Real | UnaryOp::Imag => component_of(a.dtype()),
                _ => a.dtype(),
            };
            let (re, im) = unzip(out);
            return Ok(self.wrap(re, im, shape, dtype));
        }
        let dtype = match op {
            UnaryOp::IsFinite | UnaryOp::Not => DType::Bool,
            UnaryOp::Exp
            | UnaryOp::Log
            | UnaryOp::Log2
            | UnaryOp::Log10
            | UnaryOp::Sqrt
            | UnaryOp::Sin
            | UnaryOp::Cos
            | UnaryOp::Tan => float_of(a.dtype()),
            _ => a.dtype(),
        };
        let out = kernels::map_n(re.len(), |i| kernels::unary_real(op, re[i]));
        Ok(self.wrap(out, None, shape, dtype))
    }

    fn binary(&self, op: BinaryOp, lhs: &NativeHandle, rhs: &NativeHandle) -> Result<NativeHandle> {
        let (a, b) = (self.view(lhs)?, self.view(rhs)?);
        let shape = broadcast_shapes(a.shape(), b.shape())?;
        let la = a.layout().broadcast_as(&shape)?;
        let lb = b.layout().broadcast_as(&shape)?;
        let combined = DType::combine(a.dtype(), b.dtype());

        if combined.is_complex() {
            if !kernels::supports_complex(op) {
                return Err(self.unsupported_complex(op));
            }
            let out = kernels::map2(&la, &lb, |i, j| {
                kernels::binary_complex(op, a.complex_at(i), b.complex_at(j))
            });
            let (re, im) = unzip(out);
            return Ok(self.wrap(re, im, shape, combined));
        }

        let (ra, rb) = (a.re(), b.re());
        if kernels::is_logical(op) && combined.is_int() {
            let out = kernels::map2(&la, &lb, |i, j| kernels::bitwise(op, ra[i], rb[j]));
            return Ok(self.wrap(out, None, shape, combined));
        }
        let dtype = match op {
            BinaryOp::Div | BinaryOp::DivNoNan => float_of(combined),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => DType::Bool,
            _ => combined,
        };
        let out = kernels::map2(&la, &lb, |i, j| kernels::binary_real(op, ra[i], rb[j]));
        Ok(self.wrap(out, None, shape, dtype))
    }

    fn compare(&self, op: CmpOp, lhs: &NativeHandle, rhs: &NativeHandle) -> Result<NativeHandle> {
        let (a, b) = (self.view(lhs)?, self.view(rhs)?);
        let shape = broadcast_shapes(a.shape(), b.shape())?;
        let la = a.layout().broadcast_as(&shape)?;
        let lb = b.layout().broadcast_as(&shape)?;
        let out = if a.is_complex() || b.is_complex() {
            // Equality looks at both parts, ordering at the real part only.
            kernels::map2(&la, &lb, |i, j| {
                let (za, zb) = (a.complex_at(i), b.complex_at(j));
                match op {
                    CmpOp::Eq => kernels::compare_real(op, za.im, zb.im) * kernels::compare_real(op, za.re, zb.re),
                    CmpOp::Ne => kernels::compare_real(op, za.im, zb.im).max(kernels::compare_real(op, za.re, zb.re)),
                    _ => kernels::compare_real(op, za.re, zb.re),
                }
            })
        } else {
            let (ra, rb) = (a.re(), b.re());
            kernels::map2(&la, &lb, |i, j| kernels::compare_real(op, ra[i], rb[j]))
        };
        Ok(self.wrap(out, None, shape, DType::Bool))
    }

    fn where_(
        &self,
        cond: &NativeHandle,
        on_true: &NativeHandle,
        on_false: &NativeHandle,
    ) -> Result<NativeHandle> {
        let (c, t, f) = (self.view(cond)?, self.view(on_true)?, self.view(on_false)?);
        let shape = broadcast_shapes(c.shape(), &broadcast_shapes(t.shape(), f.shape())?)?;
        let lc = c.layout().broadcast_as(&shape)?;
        let lt = t.layout().broadcast_as(&shape)?;
        let lf = f.layout().broadcast_as(&shape)?;
        let dtype = DType::combine(t.dtype(), f.dtype());
        let out = kernels::map3(&lc, &lt, &lf, |i, j, k| {
            if c.complex_at(i).norm_sqr() != 0.0 {
                t.complex_at(j)
            } else {
                f.complex_at(k)
            }
        });
        let (re, im) = unzip(out);
        Ok(self.wrap(re, im, shape, dtype))
    }

    fn cast(&self, x: &NativeHandle, dtype: DType) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let im = a.im().filter(|_| dtype.is_complex()).map(<[f64]>::to_vec);
        Ok(self.wrap(a.re().to_vec(), im, a.shape().to_vec(), dtype))
    }

    // ---- Reductions ----

    fn reduce(&self, op: ReduceOp, x: &NativeHandle, axes: &[usize]) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let dims = a.shape();
        let rank = dims.len();
        let mut reduced = vec![false; rank];
        for &axis in axes {
            check_axis("reduce", axis, rank)?;
            reduced[axis] = true;
        }
        // Kept axes first, reduced axes last: every group is then contiguous.
        let kept: Vec<usize> = (0..rank).filter(|&i| !reduced[i]).collect();
        let gone: Vec<usize> = (0..rank).filter(|&i| reduced[i]).collect();
        let perm: Vec<usize> = kept.iter().chain(&gone).copied().collect();
        let out_shape: Vec<usize> = kept.iter().map(|&i| dims[i]).collect();
        let group: usize = gone.iter().map(|&i| dims[i]).product();
        let groups: usize = out_shape.iter().product();
        let (re, im) = a.select(&a.layout().permute(&perm)?);

        let dtype = match op {
            ReduceOp::Any | ReduceOp::All => DType::Bool,
            ReduceOp::Mean => float_of(a.dtype()),
            ReduceOp::Std => component_of(float_of(a.dtype())),
            ReduceOp::Sum | ReduceOp::Prod if a.dtype().is_bool() => DType::I64,
            _ => a.dtype(),
        };
        if let Some(im) = im {
            if matches!(op, ReduceOp::Min | ReduceOp::Max) {
                return Err(self.unsupported_complex(op));
            }
            let zs: Vec<Complex64> = re.iter().zip(&im).map(|(&r, &i)| Complex64::new(r, i)).collect();
            let out = kernels::map_n(groups, |g| {
                kernels::reduce_complex(op, &zs[g * group..(g + 1) * group])
            });
            let (re, im) = unzip(out);
            return Ok(self.wrap(re, im, out_shape, dtype));
        }
        let out = kernels::map_n(groups, |g| kernels::reduce_real(op, &re[g * group..(g + 1) * group]));
        Ok(self.wrap(out, None, out_shape, dtype))
    }

    // ---- Layout ----

    fn reshape(&self, x: &NativeHandle, shape: &[usize]) -> Result<NativeHandle> {
        let a = self.view(x)?;
        if shape.iter().product::<usize>() != a.elem_count() {
            bail!(
                "reshape: cannot view {:?} as {shape:?}",
                a.shape()
            );
        }
        Ok(Arc::new(a.with_shape(shape.to_vec())))
    }

    fn transpose(&self, x: &NativeHandle, perm: &[usize]) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let layout = a.layout().permute(perm)?;
        let (re, im) = a.select(&layout);
        Ok(self.wrap(re, im, layout.dims().to_vec(), a.dtype()))
    }

    fn tile(&self, x: &NativeHandle, multiples: &[usize]) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let dims = a.shape();
        if multiples.len() != dims.len() {
            bail!(
                "tile: {} multiples for rank {}",
                multiples.len(),
                dims.len()
            );
        }
        // Read as (m0, d0, m1, d1, ...) with zero strides on the repeats.
        let strides = contiguous_strides(dims);
        let mut view_dims = Vec::with_capacity(2 * dims.len());
        let mut view_strides = Vec::with_capacity(2 * dims.len());
        for ((&d, &s), &m) in dims.iter().zip(&strides).zip(multiples) {
            view_dims.extend([m, d]);
            view_strides.extend([0, s]);
        }
        let (re, im) = a.select(&Layout::new(view_dims, view_strides, 0));
        let shape = dims.iter().zip(multiples).map(|(d, m)| d * m).collect();
        Ok(self.wrap(re, im, shape, a.dtype()))
    }

    fn concat(&self, xs: &[NativeHandle], axis: usize) -> Result<NativeHandle> {
        let arrays = xs.iter().map(|x| self.view(x)).collect::<Result<Vec<_>>>()?;
        let first = arrays
            .first()
            .ok_or_else(|| Error::msg("concat: empty input list"))?;
        let dims = first.shape();
        check_axis("concat", axis, dims.len())?;
        for a in &arrays {
            let other = a.shape();
            if other.len() != dims.len() || (0..dims.len()).any(|i| i != axis && other[i] != dims[i]) {
                bail!("concat: shapes {dims:?} and {other:?} differ off axis {axis}");
            }
        }
        let dtype = arrays.iter().fold(first.dtype(), |d, a| DType::combine(d, a.dtype()));
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();

        let mut re = Vec::new();
        let mut im = Vec::new();
        for o in 0..outer {
            for a in &arrays {
                let chunk = a.shape()[axis] * inner;
                let range = o * chunk..(o + 1) * chunk;
                re.extend_from_slice(&a.re()[range.clone()]);
                if dtype.is_complex() {
                    match a.im() {
                        Some(part) => im.extend_from_slice(&part[range]),
                        None => im.resize(im.len() + chunk, 0.0),
                    }
                }
            }
        }
        let mut shape = dims.to_vec();
        shape[axis] = arrays.iter().map(|a| a.shape()[axis]).sum();
        Ok(self.wrap(re, dtype.is_complex().then_some(im), shape, dtype))
    }

    fn unstack(&self, x: &NativeHandle, axis: usize) -> Result<Vec<NativeHandle>> {
        let a = self.view(x)?;
        check_axis("unstack", axis, a.shape().len())?;
        let layout = a.layout();
        let mut shape = a.shape().to_vec();
        let n = shape.remove(axis);
        (0..n)
            .map(|i| {
                let (re, im) = a.select(&layout.narrow(axis, i, 1)?);
                Ok(self.wrap(re, im, shape.clone(), a.dtype()))
            })
            .collect()
    }

    fn flip(&self, x: &NativeHandle, axes: &[usize]) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let dims = a.shape();
        for &axis in axes {
            check_axis("flip", axis, dims.len())?;
        }
        let strides = contiguous_strides(dims);
        let mut index = vec![0; dims.len()];
        let sources: Vec<usize> = (0..a.elem_count())
            .map(|k| {
                unravel(k, dims, &mut index);
                for &axis in axes {
                    index[axis] = dims[axis] - 1 - index[axis];
                }
                index.iter().zip(&strides).map(|(i, s)| i * s).sum()
            })
            .collect();
        let (re, im) = a.take(&sources);
        Ok(self.wrap(re, im, dims.to_vec(), a.dtype()))
    }

    fn pad(&self, x: &NativeHandle, widths: &[(usize, usize)], mode: PadMode) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let dims = a.shape();
        if widths.len() != dims.len() {
            bail!(
                "pad: {} widths for rank {}",
                widths.len(),
                dims.len()
            );
        }
        let copies_values = !matches!(mode, PadMode::Constant(_));
        if copies_values && dims.iter().zip(widths).any(|(&d, &(lo, hi))| d == 0 && lo + hi > 0) {
            bail!("pad: cannot extend empty axis of {dims:?} with {mode:?}");
        }
        let out_dims: Vec<usize> = dims
            .iter()
            .zip(widths)
            .map(|(&d, &(lo, hi))| d + lo + hi)
            .collect();
        let strides = contiguous_strides(dims);
        let mut index = vec![0; dims.len()];

        // Source element of every output position, None for constant fill.
        let sources: Vec<Option<usize>> = (0..out_dims.iter().product::<usize>())
            .map(|k| {
                unravel(k, &out_dims, &mut index);
                let mut flat = 0;
                for (axis, &i) in index.iter().enumerate() {
                    let d = dims[axis] as isize;
                    let j = i as isize - widths[axis].0 as isize;
                    let src = if (0..d).contains(&j) {
                        j
                    } else {
                        match mode {
                            PadMode::Constant(_) => return None,
                            PadMode::Edge => j.clamp(0, d - 1),
                            PadMode::Periodic => j.rem_euclid(d),
                        }
                    };
                    flat += src as usize * strides[axis];
                }
                Some(flat)
            })
            .collect();
        let fill = match mode {
            PadMode::Constant(v) => v,
            _ => 0.0,
        };
        let re = sources.iter().map(|s| s.map_or(fill, |i| a.re()[i])).collect();
        let im = a
            .im()
            .map(|part| sources.iter().map(|s| s.map_or(0.0, |i| part[i])).collect());
        Ok(self.wrap(re, im, out_dims, a.dtype()))
    }

    // ---- Indexing ----

    fn nonzero(&self, x: &NativeHandle) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let dims = a.shape();
        let mut index = vec![0; dims.len()];
        let mut coords = Vec::new();
        let mut count = 0;
        for k in 0..a.elem_count() {
            if a.complex_at(k).norm_sqr() != 0.0 {
                unravel(k, dims, &mut index);
                coords.extend(index.iter().map(|&i| i as f64));
                count += 1;
            }
        }
        Ok(self.wrap(coords, None, vec![count, dims.len()], DType::I64))
    }

    fn boolean_mask(&self, x: &NativeHandle, mask: &NativeHandle, axis: usize) -> Result<NativeHandle> {
        let (a, m) = (self.view(x)?, self.view(mask)?);
        let dims = a.shape();
        check_axis("boolean_mask", axis, dims.len())?;
        if m.shape() != [dims[axis]] {
            bail!(
                "boolean_mask: mask of shape {:?} does not match axis {axis} of {dims:?}",
                m.shape()
            );
        }
        let keep: Vec<usize> = (0..dims[axis]).filter(|&i| m.re()[i] != 0.0).collect();
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let mut sources = Vec::with_capacity(outer * keep.len() * inner);
        for o in 0..outer {
            for &k in &keep {
                let start = (o * dims[axis] + k) * inner;
                sources.extend(start..start + inner);
            }
        }
        let (re, im) = a.take(&sources);
        let mut shape = dims.to_vec();
        shape[axis] = keep.len();
        Ok(self.wrap(re, im, shape, a.dtype()))
    }

    fn batched_gather_nd(&self, values: &NativeHandle, indices: &NativeHandle) -> Result<NativeHandle> {
        let (v, ix) = (self.view(values)?, self.view(indices)?);
        let (vd, id) = (v.shape(), ix.shape());
        if id.len() < 2 {
            bail!("gather: indices of shape {id:?} lack batch or coordinate axis");
        }
        let d = id[id.len() - 1];
        if vd.len() != d + 2 {
            bail!("gather: values of shape {vd:?} cannot be indexed with {d} coordinates");
        }
        let batch = broadcast_size("gather", vd[0], id[0])?;
        let list = &id[1..id.len() - 1];
        let points: usize = list.iter().product();
        let channels = vd[d + 1];
        let strides = contiguous_strides(vd);
        let coords = ix.re();

        let mut sources = Vec::with_capacity(batch * points * channels);
        for b in 0..batch {
            for p in 0..points {
                let at = (pick(id[0], b) * points + p) * d;
                let mut flat = pick(vd[0], b) * strides[0];
                for j in 0..d {
                    let c = coords[at + j];
                    if c < 0.0 || c >= vd[1 + j] as f64 {
                        bail!(
                            "gather: index {c} out of bounds for axis of size {}",
                            vd[1 + j]
                        );
                    }
                    flat += c as usize * strides[1 + j];
                }
                sources.extend(flat..flat + channels);
            }
        }
        let (re, im) = v.take(&sources);
        let mut shape = vec![batch];
        shape.extend_from_slice(list);
        shape.push(channels);
        Ok(self.wrap(re, im, shape, v.dtype()))
    }

    fn scatter(
        &self,
        base: &NativeHandle,
        indices: &NativeHandle,
        values: &NativeHandle,
        op: ScatterOp,
    ) -> Result<NativeHandle> {
        let (g, ix, v) = (self.view(base)?, self.view(indices)?, self.view(values)?);
        let (gd, id, vd) = (g.shape(), ix.shape(), v.shape());
        if id.len() != 3 || vd.len() != 3 {
            bail!("scatter: expected (batch, list, coord) indices and (batch, list, channel) values, got {id:?} and {vd:?}");
        }
        let d = id[2];
        if gd.len() != d + 2 {
            bail!("scatter: grid of shape {gd:?} cannot be indexed with {d} coordinates");
        }
        let (batch, channels, points) = (gd[0], gd[d + 1], id[1]);
        broadcast_size("scatter", batch, id[0])?;
        broadcast_size("scatter", batch, vd[0])?;
        broadcast_size("scatter", points, vd[1])?;
        broadcast_size("scatter", channels, vd[2])?;

        let dtype = DType::combine(g.dtype(), v.dtype());
        let mut re = g.re().to_vec();
        let mut im = dtype
            .is_complex()
            .then(|| g.im().map_or_else(|| vec![0.0; re.len()], <[f64]>::to_vec));
        let strides = contiguous_strides(gd);
        let coords = ix.re();

        for b in 0..batch {
            'points: for p in 0..points {
                let at = (pick(id[0], b) * points + p) * d;
                let mut flat = b * strides[0];
                for j in 0..d {
                    let c = coords[at + j];
                    if c < 0.0 || c >= gd[1 + j] as f64 {
                        continue 'points;
                    }
                    flat += c as usize * strides[1 + j];
                }
                for ch in 0..channels {
                    let z = v.complex_at((pick(vd[0], b) * vd[1] + pick(vd[1], p)) * vd[2] + pick(vd[2], ch));
                    let target = flat + ch;
                    match op {
                        ScatterOp::Update => {
                            re[target] = z.re;
                            if let Some(im) = im.as_mut() {
                                im[target] = z.im;
                            }
                        }
                        ScatterOp::Add => {
                            re[target] += z.re;
                            if let Some(im) = im.as_mut() {
                                im[target] += z.im;
                            }
                        }
                    }
                }
            }
        }
        Ok(self.wrap(re, im, gd.to_vec(), dtype))
    }

    // ---- Structured ----

    fn conv(&self, value: &NativeHandle, kernel: &NativeHandle, zero_padding: bool) -> Result<NativeHandle> {
        let (v, k) = (self.view(value)?, self.view(kernel)?);
        let (vd, kd) = (v.shape(), k.shape());
        if vd.len() < 2 || kd.len() != vd.len() + 1 || kd[2] != vd[1] {
            bail!("conv: value {vd:?} and kernel {kd:?} are not (batch, in, spatial..) and (batch, out, in, spatial..)");
        }
        let rank = vd.len() - 2;
        let (batch, cin, cout) = (vd[0], vd[1], kd[1]);
        broadcast_size("conv", batch, kd[0])?;
        let (value_spatial, kernel_spatial) = (&vd[2..], &kd[3..]);
        let out_spatial: Vec<usize> = value_spatial
            .iter()
            .zip(kernel_spatial)
            .map(|(&n, &m)| if zero_padding { n } else { (n + 1).saturating_sub(m) })
            .collect();
        let offsets: Vec<isize> = kernel_spatial
            .iter()
            .map(|&m| if zero_padding { (m / 2) as isize } else { 0 })
            .collect();
        let (vs, ks) = (contiguous_strides(vd), contiguous_strides(kd));
        let n_out: usize = out_spatial.iter().product();
        let n_kernel: usize = kernel_spatial.iter().product();
        log::trace!("conv {vd:?} * {kd:?} -> {out_spatial:?}");

        let planes = kernels::map_n(batch * cout, |bo| {
            let (b, o) = (bo / cout, bo % cout);
            let kb = pick(kd[0], b);
            let mut p = vec![0; rank];
            let mut q = vec![0; rank];
            (0..n_out)
                .map(|pos| {
                    unravel(pos, &out_spatial, &mut p);
                    let mut acc = Complex64::new(0.0, 0.0);
                    'taps: for tap in 0..n_kernel {
                        unravel(tap, kernel_spatial, &mut q);
                        let mut v_off = 0;
                        let mut k_off = 0;
                        for j in 0..rank {
                            let at = p[j] as isize + q[j] as isize - offsets[j];
                            if at < 0 || at >= value_spatial[j] as isize {
                                continue 'taps;
                            }
                            v_off += at as usize * vs[2 + j];
                            k_off += q[j] * ks[3 + j];
                        }
                        for i in 0..cin {
                            acc += v.complex_at(b * vs[0] + i * vs[1] + v_off)
                                * k.complex_at(kb * ks[0] + o * ks[1] + i * ks[2] + k_off);
                        }
                    }
                    acc
                })
                .collect::<Vec<_>>()
        });
        let (re, im) = unzip(planes.into_iter().flatten().collect());
        let mut shape = vec![batch, cout];
        shape.extend(out_spatial);
        Ok(self.wrap(re, im, shape, DType::combine(v.dtype(), k.dtype())))
    }

    fn fft(&self, x: &NativeHandle, axes: &[usize], inverse: bool) -> Result<NativeHandle> {
        let a = self.view(x)?;
        let dims = a.shape();
        for &axis in axes {
            check_axis("fft", axis, dims.len())?;
        }
        let dtype = if a.dtype().is_complex() {
            a.dtype()
        } else {
            DType::complex(config::precision())
        };
        let strides = contiguous_strides(dims);
        let mut data: Vec<Complex64> = (0..a.elem_count()).map(|i| a.complex_at(i)).collect();
        for &axis in axes {
            let (n, stride) = (dims[axis], strides[axis]);
            let outer: usize = dims[..axis].iter().product();
            let starts: Vec<usize> = (0..outer)
                .flat_map(|o| (0..stride).map(move |i| o * n * stride + i))
                .collect();
            let lines = kernels::map_n(starts.len(), |s| {
                let line: Vec<Complex64> = (0..n).map(|j| data[starts[s] + j * stride]).collect();
                kernels::dft(&line, inverse)
            });
            for (&start, line) in starts.iter().zip(lines) {
                for (j, z) in line.into_iter().enumerate() {
                    data[start + j * stride] = z;
                }
            }
        }
        let (re, im) = unzip(data);
        Ok(self.wrap(re, im, dims.to_vec(), dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(b: &CpuBackend, data: &[f64], shape: &[usize]) -> NativeHandle {
        b.from_f64(data, shape, DType::F64).unwrap()
    }

    #[test]
    fn test_foreign_buffers_rejected() {
        let a = CpuBackend::named("cpu-a");
        let b = CpuBackend::named("cpu-b");
        let x = handle(&a, &[1.0], &[1]);
        assert_eq!(x.backend_name(), "cpu-a");
        assert!(matches!(b.to_f64_vec(&x), Err(Error::NoCompatibleBackend { .. })));
    }

    #[test]
    fn test_host_scalar_operand() {
        let b = CpuBackend::new();
        let x = handle(&b, &[1.0, 2.0], &[2]);
        let s = dimflow_core::HostScalar::new(10.0, DType::F64).handle();
        let y = b.binary(BinaryOp::Mul, &x, &s).unwrap();
        assert_eq!(b.to_f64_vec(&y).unwrap(), vec![10.0, 20.0]);
    }

    #[test]
    fn test_int_division_is_float() {
        let b = CpuBackend::new();
        let x = b.from_f64(&[1.0, 3.0], &[2], DType::I32).unwrap();
        let y = b.from_f64(&[2.0], &[1], DType::I32).unwrap();
        let q = b.binary(BinaryOp::Div, &x, &y).unwrap();
        assert!(q.dtype().is_float());
        assert_eq!(b.to_f64_vec(&q).unwrap(), vec![0.5, 1.5]);
        let f = b.binary(BinaryOp::FloorDiv, &x, &y).unwrap();
        assert_eq!(f.dtype(), DType::I32);
        assert_eq!(b.to_f64_vec(&f).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_seed_reproducible() {
        let b = CpuBackend::new();
        b.seed(3);
        let first = b.to_f64_vec(&b.random_normal(&[4], DType::F64).unwrap()).unwrap();
        b.seed(3);
        let second = b.to_f64_vec(&b.random_normal(&[4], DType::F64).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}
