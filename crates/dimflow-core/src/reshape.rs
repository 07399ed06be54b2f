use crate::backend::NativeHandle;
use crate::bail;
use crate::broadcast::broadcast_op;
use crate::error::{Error, Result};
use crate::shape::{Dim, DimKind, DimNames, DimSize, Shape};
use crate::tensor::{Repr, Tensor};

// Reshape engine
//
// `split_dimension` and `join_dimensions` replace positional reshapes. Both
// preserve the element count and assume row-major order within a group.
// Lazy views are relabeled instead of materialized whenever the split or
// joined dims are not physically present. A native buffer is only transposed
// when the joined dims are not already contiguous and in order.
//
// `reshaped_native` / `reshaped_tensor` translate between named tensors and
// the positional layouts backends expect, one axis per dim group.

fn size_mismatch(from: &Shape, into: &Shape, from_volume: usize, into_volume: usize) -> Error {
    Error::SizeMismatch {
        from: from.clone(),
        into: into.clone(),
        from_volume,
        into_volume,
    }
}

/// Fill at most one unresolved size in `into` so that its volume is `size`.
fn resolve_split(dim: &Dim, size: usize, into: &Shape) -> Result<Shape> {
    let from = Shape::from(dim.with_size(size));
    let unresolved: Vec<&Dim> = into
        .dims()
        .iter()
        .filter(|d| !d.size().is_fixed())
        .collect();
    let known: usize = into.dims().iter().filter_map(|d| d.fixed_size()).product();
    match unresolved.as_slice() {
        [] => {
            if known != size {
                return Err(size_mismatch(&from, into, size, known));
            }
            Ok(into.clone())
        }
        [d] if *d.size() == DimSize::Unresolved => {
            if known == 0 || size % known != 0 {
                return Err(size_mismatch(&from, into, size, known));
            }
            into.with_size(d.name(), size / known)
        }
        _ => Err(Error::shape_mismatch(
            &from,
            into,
            "at most one unresolved size can be inferred",
        )),
    }
}

/// Replace dimension `dim` by the dims of `into`, row-major.
///
/// `into` may leave one size unresolved. An empty `into` removes `dim`, which
/// must then have size 1.
pub fn split_dimension(value: &Tensor, dim: &str, into: &Shape) -> Result<Tensor> {
    let current = value
        .shape()
        .get(dim)
        .ok_or_else(|| Error::dimension_not_found(dim, value.shape()))?
        .clone();
    let stacked_along = match value.repr() {
        Repr::Stack(s) => s.dim().name() == dim,
        _ => false,
    };
    if !current.size().is_fixed() || (value.shape().is_non_uniform() && !stacked_along) {
        return broadcast_op(|ts| split_dimension(&ts[0], dim, into), &[value.clone()]);
    }
    let size = value.shape().size(dim)?;
    let into = resolve_split(&current, size, into)?;

    match into.rank() {
        0 => return Ok(value.unstack(dim)?.remove(0)),
        1 => return value.rename_dim(dim, &into.dims()[0]),
        _ => {}
    }
    if let Some(clash) = into.dims().iter().find(|d| d.name() != dim && value.shape().contains(d.name())) {
        return Err(Error::shape_mismatch(
            value.shape(),
            &into,
            format!("'{}' already exists", clash.name()),
        ));
    }
    let shape = value.shape().replace(dim, &into)?;

    match value.repr() {
        Repr::Collapsed(c) => {
            let inner = if c.inner().shape().contains(dim) {
                split_dimension(c.inner(), dim, &into)?
            } else {
                c.inner().clone()
            };
            Tensor::collapsed(inner, shape)
        }
        Repr::Stack(s) if s.dim().name() == dim => nest(s.tensors().to_vec(), into.dims()),
        Repr::Stack(s) => {
            let children = s
                .tensors()
                .iter()
                .map(|t| split_dimension(t, dim, &into))
                .collect::<Result<Vec<_>>>()?;
            Tensor::stacked(children, s.dim())
        }
        Repr::Native(n) => {
            let backend = value.backend()?;
            let sizes = shape.sizes()?;
            let native = crate::registry::adopt(backend.as_ref(), n.native())?;
            Tensor::from_native(backend.reshape(&native, &sizes)?, shape)
        }
    }
}

/// Arrange `tensors` into nested stacks, outermost dim first.
fn nest(tensors: Vec<Tensor>, dims: &[Dim]) -> Result<Tensor> {
    let Some((outer, rest)) = dims.split_first() else {
        bail!("cannot nest a stack into zero dims");
    };
    if rest.is_empty() {
        return Tensor::stacked(tensors, outer);
    }
    let chunk: usize = rest.iter().filter_map(|d| d.fixed_size()).product();
    let groups = tensors
        .chunks(chunk.max(1))
        .map(|c| nest(c.to_vec(), rest))
        .collect::<Result<Vec<_>>>()?;
    Tensor::stacked(groups, outer)
}

/// Merge `dims` into the single dimension `into`, row-major in the given order.
///
/// `pos` is the position of `into` among the remaining dims; by default it
/// takes the place of the first joined dim. Dims absent from `value` are
/// ignored. If none is present, `into` is added with size 1 as a lazy view.
pub fn join_dimensions<D: DimNames + ?Sized>(
    value: &Tensor,
    dims: &D,
    into: &Dim,
    pos: Option<usize>,
) -> Result<Tensor> {
    let names: Vec<String> = dims
        .dim_names()
        .into_iter()
        .filter(|n| value.shape().contains(n))
        .collect();

    if names.is_empty() {
        return match into.size() {
            DimSize::Fixed(1) | DimSize::Unresolved => value.expand(&Shape::from(into.with_size(1))),
            _ => Err(size_mismatch(
                &Shape::scalar(),
                &Shape::from(into.clone()),
                1,
                into.fixed_size().unwrap_or(0),
            )),
        };
    }
    let varying = value.shape().non_uniform_dims();
    if let Some(n) = names.iter().find(|n| varying.contains(n)) {
        return Err(Error::NonUniformMaterialization {
            shape: value.shape().clone(),
            dims: vec![n.clone()],
        });
    }
    if value.shape().is_non_uniform() {
        return broadcast_op(|ts| join_dimensions(&ts[0], &names, into, pos), &[value.clone()]);
    }

    let group = value.shape().only(&names);
    let volume = group.volume()?;
    if let Some(n) = into.fixed_size() {
        if n != volume {
            return Err(size_mismatch(&group, &Shape::from(into.clone()), volume, n));
        }
    }
    let joined = into.with_size(volume);
    if names.len() == 1 {
        return value.rename_dim(&names[0], &joined);
    }
    if value.shape().contains(joined.name()) && !names.iter().any(|n| n == joined.name()) {
        return Err(Error::shape_mismatch(
            value.shape(),
            &Shape::from(joined),
            "joined dimension already exists",
        ));
    }

    let rest = value.shape().without(&names);
    let first = value
        .shape()
        .dims()
        .iter()
        .position(|d| names.iter().any(|n| n == d.name()))
        .unwrap_or(0);
    let default_pos = value.shape().dims()[..first]
        .iter()
        .filter(|d| !names.iter().any(|n| n == d.name()))
        .count();
    let pos = pos.unwrap_or(default_pos).min(rest.rank());
    let shape = rest.expand(joined.clone(), pos)?;

    if let Repr::Collapsed(c) = value.repr() {
        let inner_has = names.iter().filter(|n| c.inner().shape().contains(n)).count();
        if inner_has == 0 {
            return Tensor::collapsed(c.inner().clone(), shape);
        }
        if inner_has == names.len() {
            let inner = join_dimensions(c.inner(), &names, &joined, None)?;
            return Tensor::collapsed(inner, shape);
        }
    }

    let mut order: Vec<String> = rest.names();
    for (i, n) in names.iter().enumerate() {
        order.insert(pos + i, n.clone());
    }
    log::trace!("joining {:?} of {} into '{}'", names, value.shape(), joined.name());
    let backend = value.backend()?;
    let native = value.native_in(&order)?;
    let reshaped = backend.reshape(&native, &shape.sizes()?)?;
    Tensor::from_native(reshaped, shape)
}

/// Join every dim of `value` into `into`.
pub fn flatten(value: &Tensor, into: &Dim) -> Result<Tensor> {
    join_dimensions(value, value.shape(), into, None)
}

fn group_name(i: usize) -> String {
    format!("__group{i}")
}

/// Materialize `value` with one axis per group.
///
/// A group of one dim keeps that dim's axis; larger or empty groups are
/// joined. Group dims absent from `value` become size-1 axes, or are
/// broadcast to their size if `force_expand` is set. Every dim of `value` must
/// belong to some group.
pub fn reshaped_native(value: &Tensor, groups: &[Shape], force_expand: bool) -> Result<NativeHandle> {
    for d in value.shape().dims() {
        if !groups.iter().any(|g| g.contains(d.name())) {
            return Err(Error::shape_mismatch(
                value.shape(),
                &Shape::scalar(),
                format!("'{}' is not assigned to any group", d.name()),
            ));
        }
    }
    let mut v = value.clone();
    if force_expand {
        for d in groups.iter().flat_map(|g| g.dims()) {
            let Some(size) = d.fixed_size() else {
                continue;
            };
            let current = v.shape().get(d.name()).and_then(|c| c.fixed_size());
            if current != Some(size) {
                v = v.expand(&Shape::from(d.clone()))?;
            }
        }
    }
    let mut order = Vec::with_capacity(groups.len());
    for (i, g) in groups.iter().enumerate() {
        if g.rank() == 1 {
            order.push(g.dims()[0].name().to_string());
        } else {
            let name = group_name(i);
            v = join_dimensions(&v, g, &Dim::unresolved(name.clone(), DimKind::Batch), None)?;
            order.push(name);
        }
    }
    v.native_in(&order)
}

/// Wrap a native buffer with one axis per group, splitting joined groups.
///
/// Single-dim groups take the axis size from the buffer; with `check_sizes`
/// a fixed size in the group must match it.
pub fn reshaped_tensor(native: NativeHandle, groups: &[Shape], check_sizes: bool) -> Result<Tensor> {
    let sizes = native.shape().to_vec();
    if sizes.len() != groups.len() {
        bail!(
            "native buffer of rank {} cannot hold {} dim groups",
            sizes.len(),
            groups.len()
        );
    }
    let mut dims = Vec::with_capacity(groups.len());
    for (i, (g, &n)) in groups.iter().zip(&sizes).enumerate() {
        if g.rank() == 1 {
            let d = &g.dims()[0];
            if check_sizes {
                if let Some(expected) = d.fixed_size() {
                    if expected != n {
                        return Err(size_mismatch(g, g, expected, n));
                    }
                }
            }
            dims.push(d.with_size(n));
        } else {
            dims.push(Dim::new(group_name(i), DimKind::Batch, n));
        }
    }
    let mut tensor = Tensor::from_native(native, Shape::new(dims)?)?;
    for (i, g) in groups.iter().enumerate() {
        if g.rank() != 1 {
            tensor = split_dimension(&tensor, &group_name(i), g)?;
        }
    }
    Ok(tensor)
}
