//! # dimflow
//!
//! Tensors with named, typed dimensions over interchangeable numeric backends.
//!
//! This is the top-level facade crate that re-exports everything you need
//! and wires up the CPU backend.
//!
//! ## Usage
//!
//! ```rust
//! use dimflow::prelude::*;
//!
//! dimflow::init().unwrap();
//! let x = ops::ones(&spatial("x", 2).merge(&spatial("y", 2)).unwrap()).unwrap();
//! assert_eq!(x.sum(DimSelection::All).unwrap().to_scalar().unwrap(), 4.0);
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `dimflow-core` | Shape, Dim, Tensor, Backend trait, registry, broadcasting, reshaping, ops |
//! | `dimflow-cpu` | Host backend on row-major `f64` buffers with rayon parallelism |

use std::sync::{Arc, OnceLock};

/// Re-export core types.
pub use dimflow_core::{
    backend::{
        Backend, BinaryOp, CmpOp, HostScalar, NativeArray, NativeHandle, PadMode, ReduceOp,
        ScatterOp, UnaryOp,
    },
    batch, broadcast_each, broadcast_op, broadcast_op_over, channel, choose_backend,
    default_backend, flatten, instance, iteration_dims, join_dimensions, merge_shapes,
    register_backend, reshaped_native, reshaped_tensor, set_default_backend, spatial,
    split_dimension, stop_gradient, Config, CustomGradient, DType, Dim, DimKind, DimNames,
    DimSelection, DimSize, Error, GradientContext, Precision, Result, Shape, Tensor, WithDType,
};

/// Re-export the CPU backend.
pub use dimflow_cpu::{CpuArray, CpuBackend};

/// Shape-aware operations: factories, gather/scatter, convolution, FFT, padding, sampling.
pub mod ops {
    pub use dimflow_core::ops::*;
}

/// Process-wide precision, seed and default backend.
pub mod config {
    pub use dimflow_core::config::*;
}

/// Backend registry.
pub mod registry {
    pub use dimflow_core::registry::*;
}

static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Register the CPU backend under [`dimflow_cpu::DEFAULT_NAME`].
///
/// Only the first call registers; later calls report the first outcome. If
/// no default backend is configured, the CPU backend becomes the default.
pub fn init() -> Result<()> {
    INIT.get_or_init(|| register_cpu().map_err(|e| e.to_string()))
        .clone()
        .map_err(Error::Msg)
}

fn register_cpu() -> Result<()> {
    register_backend(Arc::new(CpuBackend::new()))?;
    if config::config().default_backend.is_none() {
        set_default_backend(dimflow_cpu::DEFAULT_NAME)?;
    }
    log::info!("dimflow initialized with backend '{}'", dimflow_cpu::DEFAULT_NAME);
    Ok(())
}

/// Common imports: `use dimflow::prelude::*;`
pub mod prelude {
    pub use crate::ops::{self, ScatterMode, ScatterOptions};
    pub use crate::{
        batch, channel, instance, spatial, Backend, CpuBackend, DType, Dim, DimKind, DimSelection,
        Error, Result, Shape, Tensor,
    };
}
