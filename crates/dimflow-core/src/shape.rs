use std::fmt;

use crate::error::{Error, Result};

// Shape — Ordered collection of named, typed dimensions
//
// A dimension is identified by its name; its kind tells operations how to
// treat it:
//
//   batch    — independent problems processed together
//   instance — collections of objects (particles, sample points, ...)
//   spatial  — grid axes (x, y, z)
//   channel  — vector components, colors, features
//
// The order of dims only matters when a buffer is materialized. Two shapes
// with the same dims in a different order compare equal, and merging two
// shapes pairs dims by name, never by position.
//
// A size is usually fixed. Stacking tensors of different shapes produces a
// *varying* size: the size of `x` depends on the index along the stack dim.
// Such shapes are non-uniform and cannot be materialized in one buffer.

/// The four dimension kinds. Declaration order is the normal order used when
/// shapes are merged: batch, instance, spatial, channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DimKind {
    Batch,
    Instance,
    Spatial,
    Channel,
}

impl DimKind {
    fn letter(&self) -> char {
        match self {
            DimKind::Batch => 'b',
            DimKind::Instance => 'i',
            DimKind::Spatial => 's',
            DimKind::Channel => 'c',
        }
    }
}

impl fmt::Display for DimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DimKind::Batch => "batch",
            DimKind::Instance => "instance",
            DimKind::Spatial => "spatial",
            DimKind::Channel => "channel",
        };
        write!(f, "{}", s)
    }
}

/// Size of one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimSize {
    Fixed(usize),
    /// Not known yet; resolved when the shape is bound to data.
    Unresolved,
    /// Differs per element of the stack dimension `along`. A child's size may
    /// itself vary along an inner stack dim.
    Varying { along: String, sizes: Vec<DimSize> },
}

impl DimSize {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            DimSize::Fixed(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, DimSize::Fixed(_))
    }

    /// Size within child `index` of the stack along `dim`.
    ///
    /// Sizes varying along other stack dims are sliced recursively and
    /// collapse to a single size once all children agree.
    pub fn slice(&self, dim: &str, index: usize) -> DimSize {
        match self {
            DimSize::Varying { along, sizes } if along == dim => {
                sizes.get(index).cloned().unwrap_or(DimSize::Fixed(1))
            }
            DimSize::Varying { along, sizes } => {
                let sizes: Vec<DimSize> = sizes.iter().map(|s| s.slice(dim, index)).collect();
                match sizes.first() {
                    Some(first) if sizes.iter().all(|s| s == first) => first.clone(),
                    _ => DimSize::Varying {
                        along: along.clone(),
                        sizes,
                    },
                }
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for DimSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimSize::Fixed(n) => write!(f, "{}", n),
            DimSize::Unresolved => write!(f, "?"),
            DimSize::Varying { along, sizes } => {
                let sizes: Vec<String> = sizes
                    .iter()
                    .map(|s| match s {
                        DimSize::Varying { .. } => format!("({})", s),
                        _ => s.to_string(),
                    })
                    .collect();
                write!(f, "{}@{}", sizes.join("|"), along)
            }
        }
    }
}

/// A named, typed axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dim {
    name: String,
    kind: DimKind,
    size: DimSize,
}

impl Dim {
    pub fn new(name: impl Into<String>, kind: DimKind, size: usize) -> Self {
        Dim {
            name: name.into(),
            kind,
            size: DimSize::Fixed(size),
        }
    }

    pub fn batch(name: impl Into<String>, size: usize) -> Self {
        Dim::new(name, DimKind::Batch, size)
    }

    pub fn spatial(name: impl Into<String>, size: usize) -> Self {
        Dim::new(name, DimKind::Spatial, size)
    }

    pub fn channel(name: impl Into<String>, size: usize) -> Self {
        Dim::new(name, DimKind::Channel, size)
    }

    pub fn instance(name: impl Into<String>, size: usize) -> Self {
        Dim::new(name, DimKind::Instance, size)
    }

    /// A dimension whose size is filled in later (e.g. by `split` or when
    /// wrapping a native buffer).
    pub fn unresolved(name: impl Into<String>, kind: DimKind) -> Self {
        Dim {
            name: name.into(),
            kind,
            size: DimSize::Unresolved,
        }
    }

    pub(crate) fn with_dim_size(&self, size: DimSize) -> Dim {
        Dim {
            name: self.name.clone(),
            kind: self.kind,
            size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DimKind {
        self.kind
    }

    pub fn size(&self) -> &DimSize {
        &self.size
    }

    pub fn fixed_size(&self) -> Option<usize> {
        self.size.fixed()
    }

    pub fn with_size(&self, size: usize) -> Dim {
        self.with_dim_size(DimSize::Fixed(size))
    }

    pub fn with_name(&self, name: impl Into<String>) -> Dim {
        Dim {
            name: name.into(),
            kind: self.kind,
            size: self.size.clone(),
        }
    }

    pub fn with_kind(&self, kind: DimKind) -> Dim {
        Dim {
            name: self.name.clone(),
            kind,
            size: self.size.clone(),
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", self.name, self.kind.letter(), self.size)
    }
}

// DimNames — anything that names a set of dimensions
//
// "x,y" / &["x", "y"] / vec![..] / a Dim / a Shape all select dims by name.

/// Conversion of a dimension selector into a list of names.
pub trait DimNames {
    fn dim_names(&self) -> Vec<String>;
}

impl DimNames for str {
    fn dim_names(&self) -> Vec<String> {
        self.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

impl DimNames for String {
    fn dim_names(&self) -> Vec<String> {
        self.as_str().dim_names()
    }
}

impl DimNames for [&str] {
    fn dim_names(&self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> DimNames for [&str; N] {
    fn dim_names(&self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl DimNames for [String] {
    fn dim_names(&self) -> Vec<String> {
        self.to_vec()
    }
}

impl DimNames for Vec<&str> {
    fn dim_names(&self) -> Vec<String> {
        self.as_slice().dim_names()
    }
}

impl DimNames for Vec<String> {
    fn dim_names(&self) -> Vec<String> {
        self.clone()
    }
}

impl DimNames for Dim {
    fn dim_names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}

impl DimNames for Shape {
    fn dim_names(&self) -> Vec<String> {
        self.names()
    }
}

/// Ordered sequence of dimensions with unique names.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    dims: Vec<Dim>,
}

impl Shape {
    /// Create a shape, rejecting duplicate names.
    pub fn new(dims: Vec<Dim>) -> Result<Self> {
        for (i, d) in dims.iter().enumerate() {
            if dims[..i].iter().any(|o| o.name == d.name) {
                let shape = Shape { dims: dims.clone() };
                return Err(Error::shape_mismatch(
                    &shape,
                    &shape,
                    format!("duplicate dimension '{}'", d.name),
                ));
            }
        }
        Ok(Shape { dims })
    }

    /// Build without the duplicate check. Callers guarantee unique names.
    pub(crate) fn from_dims(dims: Vec<Dim>) -> Self {
        Shape { dims }
    }

    /// The shape of a scalar.
    pub fn scalar() -> Self {
        Shape::default()
    }

    /// Single-kind shape from `(name, size)` pairs.
    pub fn of(kind: DimKind, dims: &[(&str, usize)]) -> Result<Self> {
        Shape::new(dims.iter().map(|(n, s)| Dim::new(*n, kind, *s)).collect())
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.dims.iter().map(|d| d.name.clone()).collect()
    }

    pub fn kinds(&self) -> Vec<DimKind> {
        self.dims.iter().map(|d| d.kind).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dims.iter().any(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Dim> {
        self.dims.iter().find(|d| d.name == name)
    }

    /// Position of `name` in this shape.
    pub fn index(&self, name: &str) -> Result<usize> {
        self.dims
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| Error::dimension_not_found(name, self))
    }

    pub fn indices<D: DimNames + ?Sized>(&self, dims: &D) -> Result<Vec<usize>> {
        dims.dim_names().iter().map(|n| self.index(n)).collect()
    }

    /// Fixed size of one dimension.
    pub fn size(&self, name: &str) -> Result<usize> {
        let dim = self.get(name).ok_or_else(|| Error::dimension_not_found(name, self))?;
        dim.fixed_size().ok_or_else(|| self.non_uniform_error())
    }

    /// All sizes, in order. Fails if any size is varying or unresolved.
    pub fn sizes(&self) -> Result<Vec<usize>> {
        self.dims
            .iter()
            .map(|d| d.fixed_size().ok_or_else(|| self.non_uniform_error()))
            .collect()
    }

    /// Total number of elements. A scalar has volume 1.
    pub fn volume(&self) -> Result<usize> {
        Ok(self.sizes()?.iter().product())
    }

    fn non_uniform_error(&self) -> Error {
        let mut dims = self.non_uniform_dims();
        if dims.is_empty() {
            dims = self
                .dims
                .iter()
                .filter(|d| d.size == DimSize::Unresolved)
                .map(|d| d.name.clone())
                .collect();
        }
        Error::NonUniformMaterialization {
            shape: self.clone(),
            dims,
        }
    }

    /// True iff every dimension has a fixed size.
    pub fn is_uniform(&self) -> bool {
        self.dims.iter().all(|d| d.size.is_fixed())
    }

    /// True iff some dimension's size varies along a stack dimension.
    pub fn is_non_uniform(&self) -> bool {
        self.dims
            .iter()
            .any(|d| matches!(d.size, DimSize::Varying { .. }))
    }

    /// Stack dimensions along which some size varies, first encountered first.
    pub fn non_uniform_dims(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for d in &self.dims {
            if let DimSize::Varying { along, .. } = &d.size {
                if !result.contains(along) {
                    result.push(along.clone());
                }
            }
        }
        result
    }

    //  Sub-shapes

    /// The dims named in `dims`, in this shape's order. Absent names are skipped.
    pub fn only<D: DimNames + ?Sized>(&self, dims: &D) -> Shape {
        let names = dims.dim_names();
        self.filter(|d| names.contains(&d.name))
    }

    /// This shape minus the dims named in `dims`. Absent names are skipped.
    pub fn without<D: DimNames + ?Sized>(&self, dims: &D) -> Shape {
        let names = dims.dim_names();
        self.filter(|d| !names.contains(&d.name))
    }

    fn filter(&self, f: impl Fn(&Dim) -> bool) -> Shape {
        Shape::from_dims(self.dims.iter().filter(|d| f(d)).cloned().collect())
    }

    pub fn of_kind(&self, kind: DimKind) -> Shape {
        self.filter(|d| d.kind == kind)
    }

    pub fn batch(&self) -> Shape {
        self.of_kind(DimKind::Batch)
    }

    pub fn instance(&self) -> Shape {
        self.of_kind(DimKind::Instance)
    }

    pub fn spatial(&self) -> Shape {
        self.of_kind(DimKind::Spatial)
    }

    pub fn channel(&self) -> Shape {
        self.of_kind(DimKind::Channel)
    }

    pub fn non_batch(&self) -> Shape {
        self.filter(|d| d.kind != DimKind::Batch)
    }

    pub fn non_spatial(&self) -> Shape {
        self.filter(|d| d.kind != DimKind::Spatial)
    }

    pub fn non_channel(&self) -> Shape {
        self.filter(|d| d.kind != DimKind::Channel)
    }

    /// Same dims, stably sorted into batch, instance, spatial, channel order.
    pub fn normal_order(&self) -> Shape {
        let mut dims = self.dims.clone();
        dims.sort_by_key(|d| d.kind);
        Shape::from_dims(dims)
    }

    //  Derived shapes

    /// Insert `dim` at `pos` (clamped to the rank).
    pub fn expand(&self, dim: Dim, pos: usize) -> Result<Shape> {
        if self.contains(&dim.name) {
            return Err(Error::shape_mismatch(
                self,
                &Shape::from(dim.clone()),
                format!("dimension '{}' already present", dim.name),
            ));
        }
        let mut dims = self.dims.clone();
        dims.insert(pos.min(dims.len()), dim);
        Ok(Shape::from_dims(dims))
    }

    /// Append `dim` at the end.
    pub fn push(&self, dim: Dim) -> Result<Shape> {
        self.expand(dim, self.rank())
    }

    /// Same names and kinds with new sizes, one per dimension.
    pub fn with_sizes(&self, sizes: &[usize]) -> Result<Shape> {
        if sizes.len() != self.rank() {
            return Err(Error::shape_mismatch(
                self,
                self,
                format!("{} sizes given for rank {}", sizes.len(), self.rank()),
            ));
        }
        Ok(Shape::from_dims(
            self.dims
                .iter()
                .zip(sizes)
                .map(|(d, &s)| d.with_size(s))
                .collect(),
        ))
    }

    pub fn with_size(&self, name: &str, size: usize) -> Result<Shape> {
        let i = self.index(name)?;
        let mut dims = self.dims.clone();
        dims[i] = dims[i].with_size(size);
        Ok(Shape::from_dims(dims))
    }

    /// Rename one dimension, keeping its position, kind and size.
    pub fn rename(&self, old: &str, new: &str) -> Result<Shape> {
        let i = self.index(old)?;
        if old != new && self.contains(new) {
            return Err(Error::shape_mismatch(
                self,
                self,
                format!("cannot rename '{}' to existing '{}'", old, new),
            ));
        }
        let mut dims = self.dims.clone();
        dims[i] = dims[i].with_name(new);
        Ok(Shape::from_dims(dims))
    }

    /// Replace dimension `name` by the dims of `with`, at the same position.
    pub fn replace(&self, name: &str, with: &Shape) -> Result<Shape> {
        let i = self.index(name)?;
        let mut dims = self.dims.clone();
        dims.splice(i..=i, with.dims.iter().cloned());
        Shape::new(dims)
    }

    /// Stable permutation of all names that places `group` contiguously, in
    /// the given order, at the position of the first group member.
    ///
    /// Group names missing from this shape are still included; callers that
    /// materialize with this order get size-1 axes for them.
    pub fn order_group<D: DimNames + ?Sized>(&self, group: &D) -> Vec<String> {
        let group = group.dim_names();
        let mut result: Vec<String> = Vec::with_capacity(self.rank() + group.len());
        let mut group_placed = false;
        for d in &self.dims {
            if group.contains(&d.name) {
                if !group_placed {
                    result.extend(group.iter().cloned());
                    group_placed = true;
                }
            } else {
                result.push(d.name.clone());
            }
        }
        if !group_placed {
            result.extend(group);
        }
        result
    }

    /// Shape of one child of a stack along `dim`: `dim` removed and every size
    /// varying along `dim` resolved to the child's size.
    pub fn after_slice(&self, dim: &str, index: usize) -> Shape {
        Shape::from_dims(
            self.dims
                .iter()
                .filter(|d| d.name != dim)
                .map(|d| d.with_dim_size(d.size.slice(dim, index)))
                .collect(),
        )
    }

    /// Union with `other`, see [`merge_shapes`].
    pub fn merge(&self, other: &Shape) -> Result<Shape> {
        merge_shapes(&[self, other])
    }

    /// Whether `other` has the same dims in the same order.
    pub fn same_order(&self, other: &Shape) -> bool {
        self.dims == other.dims
    }
}

fn merge_size(existing: &DimSize, new: &DimSize) -> Option<DimSize> {
    match (existing, new) {
        (a, b) if a == b => Some(a.clone()),
        (DimSize::Fixed(1), b) => Some(b.clone()),
        (a, DimSize::Fixed(1)) => Some(a.clone()),
        (DimSize::Unresolved, b) => Some(b.clone()),
        (a, DimSize::Unresolved) => Some(a.clone()),
        _ => None,
    }
}

/// Union of several shapes.
///
/// Dims are paired by name. A size of 1 yields to any other size and an
/// unresolved size yields to a known one. Differing kinds or incompatible
/// sizes fail with `ShapeMismatch`. The result is in normal order; within a
/// kind, dims appear in order of first occurrence.
pub fn merge_shapes(shapes: &[&Shape]) -> Result<Shape> {
    let mut merged: Vec<Dim> = Vec::new();
    for shape in shapes {
        for dim in &shape.dims {
            match merged.iter().position(|m| m.name == dim.name) {
                Some(i) => {
                    if merged[i].kind != dim.kind {
                        return Err(Error::shape_mismatch(
                            &Shape::from_dims(merged.clone()),
                            shape,
                            format!(
                                "'{}' is {} in one shape and {} in the other",
                                dim.name, merged[i].kind, dim.kind
                            ),
                        ));
                    }
                    let size = merge_size(&merged[i].size, &dim.size).ok_or_else(|| {
                        Error::shape_mismatch(
                            &Shape::from_dims(merged.clone()),
                            shape,
                            format!(
                                "incompatible sizes {} and {} for '{}'",
                                merged[i].size, dim.size, dim.name
                            ),
                        )
                    })?;
                    merged[i].size = size;
                }
                None => merged.push(dim.clone()),
            }
        }
    }
    merged.sort_by_key(|d| d.kind);
    Ok(Shape::from_dims(merged))
}

// Dims are matched by name, not position.
impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
            && self
                .dims
                .iter()
                .all(|d| other.get(&d.name).map_or(false, |o| o == d))
    }
}

impl Eq for Shape {}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

impl From<Dim> for Shape {
    fn from(dim: Dim) -> Self {
        Shape { dims: vec![dim] }
    }
}

/// Single batch dimension.
pub fn batch(name: &str, size: usize) -> Shape {
    Shape::from(Dim::batch(name, size))
}

/// Single spatial dimension.
pub fn spatial(name: &str, size: usize) -> Shape {
    Shape::from(Dim::spatial(name, size))
}

/// Single channel dimension.
pub fn channel(name: &str, size: usize) -> Shape {
    Shape::from(Dim::channel(name, size))
}

/// Single instance dimension.
pub fn instance(name: &str, size: usize) -> Shape {
    Shape::from(Dim::instance(name, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bxc() -> Shape {
        Shape::new(vec![
            Dim::batch("b", 2),
            Dim::spatial("x", 4),
            Dim::channel("vector", 3),
        ])
        .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let r = Shape::new(vec![Dim::spatial("x", 2), Dim::batch("x", 2)]);
        assert!(matches!(r, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_only_without_preserve_order() {
        let s = bxc();
        assert_eq!(s.only("vector,b").names(), vec!["b", "vector"]);
        assert_eq!(s.without(&["x"]).names(), vec!["b", "vector"]);
        assert_eq!(s.without("missing").rank(), 3);
        assert_eq!(s.spatial().names(), vec!["x"]);
        assert_eq!(s.non_batch().rank(), 2);
    }

    #[test]
    fn test_volume_and_index() {
        let s = bxc();
        assert_eq!(s.volume().unwrap(), 24);
        assert_eq!(s.index("vector").unwrap(), 2);
        assert!(matches!(
            s.index("y"),
            Err(Error::DimensionNotFound { ref name, .. }) if name == "y"
        ));
        assert_eq!(Shape::scalar().volume().unwrap(), 1);
    }

    #[test]
    fn test_equality_is_order_independent() {
        let a = Shape::new(vec![Dim::spatial("x", 4), Dim::batch("b", 2)]).unwrap();
        let b = Shape::new(vec![Dim::batch("b", 2), Dim::spatial("x", 4)]).unwrap();
        assert_eq!(a, b);
        assert!(!a.same_order(&b));
        assert_ne!(a, b.with_size("x", 5).unwrap());
    }

    #[test]
    fn test_merge_broadcasts_size_one() {
        let a = Shape::new(vec![Dim::spatial("x", 1), Dim::channel("c", 3)]).unwrap();
        let b = Shape::new(vec![Dim::spatial("x", 4), Dim::batch("b", 2)]).unwrap();
        let m = a.merge(&b).unwrap();
        assert_eq!(m.names(), vec!["b", "x", "c"]);
        assert_eq!(m.sizes().unwrap(), vec![2, 4, 3]);
    }

    #[test]
    fn test_merge_conflicts() {
        let a = spatial("x", 3);
        assert!(matches!(
            a.merge(&spatial("x", 4)),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            a.merge(&batch("x", 3)),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_expand_and_with_sizes() {
        let s = bxc();
        let e = s.expand(Dim::spatial("y", 5), 2).unwrap();
        assert_eq!(e.names(), vec!["b", "x", "y", "vector"]);
        assert!(s.expand(Dim::spatial("x", 4), 0).is_err());
        let w = s.with_sizes(&[1, 2, 3]).unwrap();
        assert_eq!(w.sizes().unwrap(), vec![1, 2, 3]);
        assert!(s.with_sizes(&[1]).is_err());
    }

    #[test]
    fn test_order_group() {
        let s = Shape::new(vec![
            Dim::batch("b", 2),
            Dim::spatial("x", 4),
            Dim::spatial("y", 5),
            Dim::channel("c", 3),
        ])
        .unwrap();
        assert_eq!(s.order_group(&["y", "b"]), vec!["y", "b", "x", "c"]);
        assert_eq!(s.order_group("x,c"), vec!["b", "x", "c", "y"]);
    }

    #[test]
    fn test_non_uniform() {
        let varying = Dim::spatial("x", 0).with_dim_size(DimSize::Varying {
            along: "b".into(),
            sizes: vec![DimSize::Fixed(3), DimSize::Fixed(4)],
        });
        let s = Shape::new(vec![Dim::batch("b", 2), varying]).unwrap();
        assert!(s.is_non_uniform());
        assert_eq!(s.non_uniform_dims(), vec!["b"]);
        assert!(matches!(
            s.volume(),
            Err(Error::NonUniformMaterialization { .. })
        ));
        let child = s.after_slice("b", 1);
        assert_eq!(child, spatial("x", 4));
    }

    #[test]
    fn test_nested_non_uniform_slices() {
        let inner = |a: usize, b: usize| DimSize::Varying {
            along: "b".into(),
            sizes: vec![DimSize::Fixed(a), DimSize::Fixed(b)],
        };
        let x = Dim::spatial("x", 0).with_dim_size(DimSize::Varying {
            along: "c".into(),
            sizes: vec![inner(1, 2), inner(3, 4)],
        });
        let s = Shape::new(vec![Dim::batch("b", 2), Dim::batch("c", 2), x]).unwrap();
        assert_eq!(format!("{}", s), "(b:b=2, c:b=2, x:s=(1|2@b)|(3|4@b)@c)");
        assert_eq!(s.non_uniform_dims(), vec!["c"]);

        let first = s.after_slice("c", 0);
        assert_eq!(first.get("x").unwrap().size(), &inner(1, 2));
        assert_eq!(first.after_slice("b", 1), spatial("x", 2));

        let across = s.after_slice("b", 1);
        assert_eq!(
            across.get("x").unwrap().size(),
            &DimSize::Varying {
                along: "c".into(),
                sizes: vec![DimSize::Fixed(2), DimSize::Fixed(4)],
            }
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", bxc()), "(b:b=2, x:s=4, vector:c=3)");
    }
}
