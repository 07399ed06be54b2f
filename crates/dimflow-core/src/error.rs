use crate::dtype::DType;
use crate::shape::Shape;

/// All errors that can occur within dimflow.
///
/// Every variant carries the shapes, dimension names or backend names involved
/// so a caller can diagnose a failure without re-deriving intermediate shapes.
/// None of these are recovered from internally; they surface to the caller at
/// the point of detection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two shapes could not be merged: same name with different kinds, or
    /// same name and kind with incompatible sizes (neither equal nor 1).
    #[error("shape mismatch: {lhs} vs {rhs}: {reason}")]
    ShapeMismatch {
        lhs: Shape,
        rhs: Shape,
        reason: String,
    },

    /// Split/join would change the number of elements.
    #[error("size mismatch: {from} has {from_volume} elements but {into} has {into_volume}")]
    SizeMismatch {
        from: Shape,
        into: Shape,
        from_volume: usize,
        into_volume: usize,
    },

    /// A stack with differently shaped children was forced into one buffer.
    #[error("cannot materialize non-uniform tensor {shape}; distribute over {dims:?} first")]
    NonUniformMaterialization { shape: Shape, dims: Vec<String> },

    /// Operands live on backends that cannot exchange buffers.
    #[error("no compatible backend for operands bound to {backends:?}")]
    NoCompatibleBackend { backends: Vec<String> },

    /// A backend lacks a capability and no generic fallback exists.
    #[error("backend '{backend}' does not support '{op}'")]
    UnsupportedOperation { backend: String, op: String },

    /// A referenced dimension is absent where it is required.
    #[error("dimension '{name}' not found in {shape}")]
    DimensionNotFound { name: String, shape: Shape },

    /// DType mismatch between operands.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// Element count mismatch when wrapping host data.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Generic message, used by backends for runtime failures.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Signal that `backend` cannot perform `op`.
    pub fn unsupported(backend: impl Into<String>, op: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            backend: backend.into(),
            op: op.into(),
        }
    }

    pub fn shape_mismatch(lhs: &Shape, rhs: &Shape, reason: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            lhs: lhs.clone(),
            rhs: rhs.clone(),
            reason: reason.into(),
        }
    }

    pub fn dimension_not_found(name: impl Into<String>, shape: &Shape) -> Self {
        Error::DimensionNotFound {
            name: name.into(),
            shape: shape.clone(),
        }
    }

    /// Whether this error means "capability missing" rather than a runtime failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedOperation { .. })
    }
}

/// Convenience Result type used throughout dimflow.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{spatial, Dim};

    #[test]
    fn test_unsupported_is_distinct() {
        let e = Error::unsupported("cpu", "grid_sample");
        assert!(e.is_unsupported());
        assert!(!Error::msg("boom").is_unsupported());
        assert_eq!(e.to_string(), "backend 'cpu' does not support 'grid_sample'");
    }

    #[test]
    fn test_messages_carry_shapes() {
        let a = spatial("x", 3);
        let b = Shape::from(Dim::spatial("x", 4));
        let e = Error::shape_mismatch(&a, &b, "sizes 3 and 4 for 'x'");
        let text = e.to_string();
        assert!(text.contains("x:s=3"), "{text}");
        assert!(text.contains("x:s=4"), "{text}");
    }
}
