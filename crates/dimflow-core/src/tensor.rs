use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::backend::{Backend, HostScalar, NativeHandle};
use crate::config;
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::registry;
use crate::shape::{Dim, DimKind, DimSize, Shape};

// Tensor — Named-dimension value over native buffers
//
// A Tensor is one of three variants:
//
//   Native    — one native buffer plus the Shape naming its axes, in the
//               buffer's physical axis order. The only variant owning data.
//   Collapsed — an inner tensor viewed with a larger shape. Dims missing from
//               the inner tensor are repeated implicitly, without memory.
//   Stack     — a sequence of tensors viewed as stacked along a new dim.
//               Children may disagree in size (non-uniform).
//
// Tensors are immutable and cheap to clone (Arc). Views reference their
// children, never the other way round, so no cycles can form.
//
// Materializing (`native`, `native_in`) produces one buffer in a requested
// dim order. Views cache their natural-order materialization so repeated use
// does not repeat tile/concat work.

/// Materialized leaf.
pub struct NativeTensor {
    native: NativeHandle,
    shape: Shape,
}

impl NativeTensor {
    pub fn native(&self) -> &NativeHandle {
        &self.native
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

/// Broadcast view.
pub struct CollapsedTensor {
    inner: Tensor,
    shape: Shape,
    cache: OnceLock<NativeHandle>,
}

impl CollapsedTensor {
    pub fn inner(&self) -> &Tensor {
        &self.inner
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }
}

/// Lazy stack along a new dimension.
pub struct TensorStack {
    tensors: Vec<Tensor>,
    dim: Dim,
    shape: Shape,
    cache: OnceLock<NativeHandle>,
}

impl TensorStack {
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// The stacking dimension (with size = number of children).
    pub fn dim(&self) -> &Dim {
        &self.dim
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// True if the children disagree in shape.
    pub fn requires_broadcast(&self) -> bool {
        self.shape.is_non_uniform()
    }
}

/// The three tensor variants.
pub enum Repr {
    Native(NativeTensor),
    Collapsed(CollapsedTensor),
    Stack(TensorStack),
}

/// An immutable tensor with named, typed dimensions.
#[derive(Clone)]
pub struct Tensor {
    repr: Arc<Repr>,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.repr() {
            Repr::Native(_) => "native",
            Repr::Collapsed(_) => "collapsed",
            Repr::Stack(_) => "stack",
        };
        write!(f, "Tensor({}, {}, {})", self.shape(), self.dtype(), kind)
    }
}

impl Tensor {
    fn wrap(repr: Repr) -> Tensor {
        Tensor {
            repr: Arc::new(repr),
        }
    }

    //  Construction

    /// Wrap a native buffer. `shape` names its axes in physical order;
    /// unresolved sizes are taken from the buffer.
    pub fn from_native(native: NativeHandle, shape: Shape) -> Result<Tensor> {
        let sizes = native.shape().to_vec();
        if sizes.len() != shape.rank() {
            return Err(Error::shape_mismatch(
                &shape,
                &shape,
                format!("native buffer has rank {} ({:?})", sizes.len(), sizes),
            ));
        }
        let mut dims = Vec::with_capacity(sizes.len());
        for (d, &n) in shape.dims().iter().zip(&sizes) {
            match d.size() {
                DimSize::Fixed(s) if *s == n => dims.push(d.clone()),
                DimSize::Unresolved => dims.push(d.with_size(n)),
                other => {
                    return Err(Error::shape_mismatch(
                        &shape,
                        &shape,
                        format!("'{}' has size {} but the buffer axis has {}", d.name(), other, n),
                    ))
                }
            }
        }
        Ok(Tensor::wrap(Repr::Native(NativeTensor {
            native,
            shape: Shape::from_dims(dims),
        })))
    }

    /// Wrap row-major host data on the default backend.
    pub fn from_f64(data: &[f64], shape: &Shape, dtype: DType) -> Result<Tensor> {
        let sizes = shape.sizes()?;
        let expected: usize = sizes.iter().product();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected,
                got: data.len(),
            });
        }
        let backend = registry::default_backend()?;
        Tensor::from_native(backend.from_f64(data, &sizes, dtype)?, shape.clone())
    }

    /// Wrap typed host data on the default backend.
    pub fn from_slice<T: WithDType>(data: &[T], shape: &Shape) -> Result<Tensor> {
        let data: Vec<f64> = data.iter().map(|v| WithDType::to_f64(*v)).collect();
        Tensor::from_f64(&data, shape, T::DTYPE)
    }

    /// Backend-agnostic float scalar using the configured precision.
    pub fn scalar(value: f64) -> Tensor {
        Tensor::scalar_typed(value, DType::float(config::precision()))
    }

    pub fn scalar_typed(value: f64, dtype: DType) -> Tensor {
        Tensor::wrap(Repr::Native(NativeTensor {
            native: HostScalar::new(value, dtype).handle(),
            shape: Shape::scalar(),
        }))
    }

    /// View `inner` with the larger `shape`, broadcasting the missing dims.
    ///
    /// Every dim of `inner` must appear in `shape` with the same size. Nested
    /// collapsed views are flattened; if nothing is added, `inner` is returned.
    pub fn collapsed(inner: Tensor, shape: Shape) -> Result<Tensor> {
        for d in inner.shape().dims() {
            match shape.get(d.name()) {
                Some(o) if o.size() == d.size() && o.kind() == d.kind() => {}
                _ => {
                    return Err(Error::shape_mismatch(
                        inner.shape(),
                        &shape,
                        format!("'{}' must appear in the outer shape unchanged", d.name()),
                    ))
                }
            }
        }
        if inner.rank() == shape.rank() {
            return Ok(inner);
        }
        let inner = match inner.repr() {
            Repr::Collapsed(c) => c.inner.clone(),
            _ => inner,
        };
        Ok(Tensor::wrap(Repr::Collapsed(CollapsedTensor {
            inner,
            shape,
            cache: OnceLock::new(),
        })))
    }

    /// Lazy stack of `tensors` along the new dimension `dim`.
    ///
    /// All children must carry the same dims (same names and kinds). Where
    /// sizes differ, the resulting shape records them as varying along `dim`.
    /// Use `ops::stack` to stack tensors with differing dim sets.
    pub fn stacked(tensors: Vec<Tensor>, dim: &Dim) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::msg(format!("cannot stack zero tensors along '{}'", dim.name())))?
            .shape()
            .clone();
        let mut dims = Vec::with_capacity(first.rank() + 1);
        for d in first.dims() {
            let mut sizes = Vec::with_capacity(tensors.len());
            for t in &tensors {
                match t.shape().get(d.name()) {
                    Some(o) if o.kind() == d.kind() => sizes.push(o.size().clone()),
                    _ => {
                        return Err(Error::shape_mismatch(
                            &first,
                            t.shape(),
                            format!("stacked tensors must share dims, '{}' differs", d.name()),
                        ))
                    }
                }
            }
            if sizes.iter().all(|s| s == d.size()) {
                dims.push(d.clone());
            } else {
                dims.push(d.with_dim_size(DimSize::Varying {
                    along: dim.name().to_string(),
                    sizes,
                }));
            }
        }
        for t in &tensors {
            if t.rank() != first.rank() || t.shape().contains(dim.name()) {
                return Err(Error::shape_mismatch(
                    &first,
                    t.shape(),
                    format!("stacked tensors must share dims and not contain '{}'", dim.name()),
                ));
            }
        }
        let stack_dim = dim.with_size(tensors.len());
        let pos = dims.iter().filter(|d| d.kind() <= dim.kind()).count();
        let shape = Shape::from_dims(dims).expand(stack_dim.clone(), pos)?;
        Ok(Tensor::wrap(Repr::Stack(TensorStack {
            tensors,
            dim: stack_dim,
            shape,
            cache: OnceLock::new(),
        })))
    }

    //  Properties

    pub fn repr(&self) -> &Repr {
        &self.repr
    }

    pub fn shape(&self) -> &Shape {
        match self.repr() {
            Repr::Native(n) => &n.shape,
            Repr::Collapsed(c) => &c.shape,
            Repr::Stack(s) => &s.shape,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    pub fn dtype(&self) -> DType {
        match self.repr() {
            Repr::Native(n) => n.native.dtype(),
            Repr::Collapsed(c) => c.inner.dtype(),
            Repr::Stack(s) => s
                .tensors
                .iter()
                .map(|t| t.dtype())
                .reduce(DType::combine)
                .unwrap_or(DType::F32),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.repr(), Repr::Native(_))
    }

    /// Reference identity.
    pub fn same(a: &Tensor, b: &Tensor) -> bool {
        Arc::ptr_eq(&a.repr, &b.repr)
    }

    /// For a collapsed view, the tensor holding the data; otherwise `self`.
    pub fn collapsed_core(&self) -> &Tensor {
        match self.repr() {
            Repr::Collapsed(c) => &c.inner,
            _ => self,
        }
    }

    /// Every native buffer this tensor references.
    pub fn natives(&self) -> Vec<NativeHandle> {
        let mut out = Vec::new();
        self.collect_natives(&mut out);
        out
    }

    fn collect_natives(&self, out: &mut Vec<NativeHandle>) {
        match self.repr() {
            Repr::Native(n) => out.push(n.native.clone()),
            Repr::Collapsed(c) => c.inner.collect_natives(out),
            Repr::Stack(s) => s.tensors.iter().for_each(|t| t.collect_natives(out)),
        }
    }

    /// The backend that operations on this tensor run on.
    pub fn backend(&self) -> Result<Arc<dyn Backend>> {
        backend_for(&[self])
    }

    /// False if any referenced buffer is a placeholder.
    pub fn is_available(&self) -> bool {
        self.natives().iter().all(|n| !n.is_placeholder())
    }

    //  Materialization

    /// Materialize in this tensor's own dim order.
    pub fn native(&self) -> Result<NativeHandle> {
        self.native_in(&self.shape().names())
    }

    /// Materialize with axes in `order`.
    ///
    /// `order` must list every dim of this tensor; extra names become size-1
    /// axes. Transposes, reshapes and tiles only where needed.
    pub fn native_in<S: AsRef<str>>(&self, order: &[S]) -> Result<NativeHandle> {
        let order: Vec<String> = order.iter().map(|s| s.as_ref().to_string()).collect();
        let backend = self.backend()?;
        self.materialize(&order, backend.as_ref(), true)
    }

    /// Copy values to the host in this tensor's own dim order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        self.to_f64_vec_in(&self.shape().names())
    }

    pub fn to_f64_vec_in<S: AsRef<str>>(&self, order: &[S]) -> Result<Vec<f64>> {
        let backend = self.backend()?;
        let order: Vec<String> = order.iter().map(|s| s.as_ref().to_string()).collect();
        let native = self.materialize(&order, backend.as_ref(), true)?;
        backend.to_f64_vec(&native)
    }

    /// The single value of a tensor with volume 1.
    pub fn to_scalar(&self) -> Result<f64> {
        if self.shape().volume()? != 1 {
            return Err(Error::shape_mismatch(
                self.shape(),
                &Shape::scalar(),
                "to_scalar requires exactly one element",
            ));
        }
        Ok(self.to_f64_vec()?[0])
    }

    /// Core materialization.
    ///
    /// With `expand == false`, collapsed dims stay as size-1 axes so a backend
    /// can broadcast them itself.
    pub(crate) fn materialize(
        &self,
        order: &[String],
        backend: &dyn Backend,
        expand: bool,
    ) -> Result<NativeHandle> {
        if let Some(missing) = self.shape().dims().iter().find(|d| !order.contains(&d.name().to_string())) {
            return Err(Error::shape_mismatch(
                self.shape(),
                self.shape(),
                format!("order {:?} does not list '{}'", order, missing.name()),
            ));
        }
        let natural = order.len() == self.rank() && self.shape().names() == order;
        match self.repr() {
            Repr::Native(n) => {
                let mut native = registry::adopt(backend, &n.native)?;
                let perm: Vec<usize> = order
                    .iter()
                    .filter_map(|name| n.shape.index(name).ok())
                    .collect();
                if perm.iter().enumerate().any(|(i, &p)| i != p) {
                    native = backend.transpose(&native, &perm)?;
                }
                if order.len() != n.shape.rank() {
                    let sizes: Vec<usize> = order
                        .iter()
                        .map(|name| n.shape.get(name).and_then(|d| d.fixed_size()).unwrap_or(1))
                        .collect();
                    native = backend.reshape(&native, &sizes)?;
                }
                Ok(native)
            }
            Repr::Collapsed(c) => {
                if expand && natural {
                    if let Some(cached) = c.cache.get() {
                        return registry::adopt(backend, cached);
                    }
                }
                let inner = c.inner.materialize(order, backend, expand)?;
                if !expand {
                    return Ok(inner);
                }
                let multiples: Vec<usize> = order
                    .iter()
                    .map(|name| {
                        if c.inner.shape().contains(name) {
                            1
                        } else {
                            c.shape.get(name).and_then(|d| d.fixed_size()).unwrap_or(1)
                        }
                    })
                    .collect();
                let result = if multiples.iter().all(|&m| m == 1) {
                    inner
                } else {
                    log::trace!("tiling {} by {:?}", c.inner.shape(), multiples);
                    backend.tile(&inner, &multiples)?
                };
                if natural {
                    let _ = c.cache.set(result.clone());
                }
                Ok(result)
            }
            Repr::Stack(s) => {
                if s.shape.is_non_uniform() {
                    return Err(Error::NonUniformMaterialization {
                        shape: s.shape.clone(),
                        dims: s.shape.non_uniform_dims(),
                    });
                }
                if natural {
                    if let Some(cached) = s.cache.get() {
                        return registry::adopt(backend, cached);
                    }
                }
                let axis = order
                    .iter()
                    .position(|name| name == s.dim.name())
                    .unwrap_or(0);
                let inner_order: Vec<String> = order
                    .iter()
                    .filter(|name| name.as_str() != s.dim.name())
                    .cloned()
                    .collect();
                let natives = s
                    .tensors
                    .iter()
                    .map(|t| t.materialize(&inner_order, backend, true))
                    .collect::<Result<Vec<_>>>()?;
                log::trace!("stacking {} buffers along '{}'", natives.len(), s.dim.name());
                let result = backend.stack(&natives, axis)?;
                if natural {
                    let _ = s.cache.set(result.clone());
                }
                Ok(result)
            }
        }
    }

    //  Structural operations

    /// Slices along `dim`, in order, each without `dim`.
    pub fn unstack(&self, dim: &str) -> Result<Vec<Tensor>> {
        let size = self.shape().size(dim)?;
        match self.repr() {
            Repr::Native(n) => {
                let backend = self.backend()?;
                let native = registry::adopt(backend.as_ref(), &n.native)?;
                let axis = n.shape.index(dim)?;
                let rest = n.shape.without(dim);
                backend
                    .unstack(&native, axis)?
                    .into_iter()
                    .map(|x| Tensor::from_native(x, rest.clone()))
                    .collect()
            }
            Repr::Collapsed(c) => {
                let outer = c.shape.without(dim);
                if c.inner.shape().contains(dim) {
                    c.inner
                        .unstack(dim)?
                        .into_iter()
                        .map(|t| Tensor::collapsed(t, outer.clone()))
                        .collect()
                } else {
                    let slice = Tensor::collapsed(c.inner.clone(), outer)?;
                    Ok(vec![slice; size])
                }
            }
            Repr::Stack(s) => {
                if s.dim.name() == dim {
                    return Ok(s.tensors.clone());
                }
                let per_child = s
                    .tensors
                    .iter()
                    .map(|t| t.unstack(dim))
                    .collect::<Result<Vec<_>>>()?;
                if per_child.iter().any(|c| c.len() != size) {
                    return Err(Error::NonUniformMaterialization {
                        shape: s.shape.clone(),
                        dims: vec![s.dim.name().to_string()],
                    });
                }
                (0..size)
                    .map(|i| {
                        let slice: Vec<Tensor> = per_child.iter().map(|c| c[i].clone()).collect();
                        Tensor::stacked(slice, &s.dim)
                    })
                    .collect()
            }
        }
    }

    /// Like `unstack`, but a tensor without `dim`, or with `dim` of size 1,
    /// yields `size` copies of its only slice.
    pub fn unstack_or_repeat(&self, dim: &str, size: usize) -> Result<Vec<Tensor>> {
        if !self.shape().contains(dim) {
            return Ok(vec![self.clone(); size]);
        }
        let slices = self.unstack(dim)?;
        match slices.as_slice() {
            [single] if size != 1 => Ok(vec![single.clone(); size]),
            _ if slices.len() == size => Ok(slices),
            _ => Err(Error::shape_mismatch(
                self.shape(),
                &self.shape().with_size(dim, size)?,
                format!("cannot broadcast '{}' of size {} to {}", dim, slices.len(), size),
            )),
        }
    }

    /// Apply a shape-preserving buffer transform to every leaf.
    ///
    /// Collapsed views stay collapsed and stacks stay lazy, so element-wise
    /// functions never touch repeated or stacked data more than once.
    pub fn map_native<F>(&self, f: &F) -> Result<Tensor>
    where
        F: Fn(&dyn Backend, &NativeHandle) -> Result<NativeHandle>,
    {
        let backend = self.backend()?;
        self.map_native_on(backend.as_ref(), f)
    }

    pub(crate) fn map_native_on<F>(&self, backend: &dyn Backend, f: &F) -> Result<Tensor>
    where
        F: Fn(&dyn Backend, &NativeHandle) -> Result<NativeHandle>,
    {
        match self.repr() {
            Repr::Native(n) => {
                let native = registry::adopt(backend, &n.native)?;
                Tensor::from_native(f(backend, &native)?, n.shape.clone())
            }
            Repr::Collapsed(c) => {
                Tensor::collapsed(c.inner.map_native_on(backend, f)?, c.shape.clone())
            }
            Repr::Stack(s) => {
                let tensors = s
                    .tensors
                    .iter()
                    .map(|t| t.map_native_on(backend, f))
                    .collect::<Result<Vec<_>>>()?;
                Tensor::stacked(tensors, &s.dim)
            }
        }
    }

    /// Rename `old` to `new`'s name and kind, keeping its size.
    pub fn rename_dim(&self, old: &str, new: &Dim) -> Result<Tensor> {
        let current = self
            .shape()
            .get(old)
            .ok_or_else(|| Error::dimension_not_found(old, self.shape()))?;
        let replaced = current.with_name(new.name()).with_kind(new.kind());
        let shape = self.shape().replace(old, &Shape::from(replaced))?;
        match self.repr() {
            Repr::Native(n) => Tensor::from_native(n.native.clone(), shape),
            Repr::Collapsed(c) => {
                let inner = if c.inner.shape().contains(old) {
                    c.inner.rename_dim(old, new)?
                } else {
                    c.inner.clone()
                };
                Tensor::collapsed(inner, shape)
            }
            Repr::Stack(s) => {
                if s.dim.name() == old {
                    let dim = s.dim.with_name(new.name()).with_kind(new.kind());
                    Tensor::stacked(s.tensors.clone(), &dim)
                } else {
                    let tensors = s
                        .tensors
                        .iter()
                        .map(|t| t.rename_dim(old, new))
                        .collect::<Result<Vec<_>>>()?;
                    Tensor::stacked(tensors, &s.dim)
                }
            }
        }
    }

    /// Broadcast to include `dims` (lazy).
    ///
    /// Existing dims of size 1 are expanded to the size in `dims`.
    pub fn expand(&self, dims: &Shape) -> Result<Tensor> {
        let merged = self.shape().merge(dims)?;
        let mut value = self.clone();
        for d in self.shape().dims() {
            let target = merged.get(d.name()).map(|m| m.size().clone());
            if d.size() == &DimSize::Fixed(1) && target != Some(DimSize::Fixed(1)) {
                value = value.unstack(d.name())?.remove(0);
            }
        }
        let mut order = self.shape().dims().to_vec();
        for d in merged.dims() {
            match order.iter_mut().find(|o| o.name() == d.name()) {
                Some(o) => *o = d.clone(),
                None => order.push(d.clone()),
            }
        }
        Tensor::collapsed(value, Shape::new(order)?)
    }

    /// Change the kind of dimension `name`, e.g. spatial to instance.
    pub fn with_kind(&self, name: &str, kind: DimKind) -> Result<Tensor> {
        let d = self
            .shape()
            .get(name)
            .ok_or_else(|| Error::dimension_not_found(name, self.shape()))?;
        self.rename_dim(name, &d.with_kind(kind))
    }
}

/// Backend for an operation over `tensors`.
pub fn backend_for(tensors: &[&Tensor]) -> Result<Arc<dyn Backend>> {
    let natives: Vec<NativeHandle> = tensors.iter().flat_map(|t| t.natives()).collect();
    let refs: Vec<&NativeHandle> = natives.iter().collect();
    registry::choose_backend(&refs)
}
