//! # dimflow-core
//!
//! Named-dimension tensors over interchangeable numeric backends.
//!
//! This crate provides:
//! - [`Shape`] / [`Dim`] — ordered, named, typed dimensions (batch, instance, spatial, channel)
//! - [`Tensor`] — immutable value that is a native buffer, a lazy broadcast view or a lazy stack
//! - [`Backend`] trait — capability interface of a numeric runtime, plus the backend registry
//! - broadcasting engine — distributes operations over non-uniform stacks
//! - reshape engine — [`split_dimension`] / [`join_dimensions`] instead of positional reshapes
//! - [`ops`] — reductions, gather/scatter, convolution, FFT, padding, grid sampling
// - dtype: element types and the configurable float precision
// - config: process-wide precision / seed / default backend
// - gradient: forward/backward pairs handed to autodiff-capable backends

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod dtype;
pub mod error;
pub mod gradient;
pub mod ops;
pub mod registry;
pub mod reshape;
pub mod shape;
pub mod tensor;

pub use backend::{
    Backend, BinaryOp, CmpOp, HostScalar, NativeArray, NativeHandle, PadMode, ReduceOp, ScatterOp,
    UnaryOp,
};
pub use broadcast::{broadcast_each, broadcast_op, broadcast_op_over, iteration_dims};
pub use config::Config;
pub use dtype::{DType, Precision, WithDType};
pub use error::{Error, Result};
pub use gradient::{stop_gradient, CustomGradient, GradientContext};
pub use ops::DimSelection;
pub use registry::{choose_backend, default_backend, register_backend, set_default_backend};
pub use reshape::{flatten, join_dimensions, reshaped_native, reshaped_tensor, split_dimension};
pub use shape::{batch, channel, instance, merge_shapes, spatial, Dim, DimKind, DimNames, DimSize, Shape};
pub use tensor::Tensor;
