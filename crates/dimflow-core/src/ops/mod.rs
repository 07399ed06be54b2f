//! Shape-aware operations on [`Tensor`](crate::Tensor)s.
//!
//! Element-wise math and reductions are methods on `Tensor`; everything else
//! is a free function here. All of them go through the broadcasting engine,
//! so they accept non-uniform stacks.

pub mod compare;
pub mod conv;
pub mod factory;
pub mod fft;
pub mod indexing;
pub mod math;
pub mod native_call;
pub mod pad;
pub mod reduce;
pub mod sample;

pub use compare::{assert_close, close};
pub use conv::convolve;
pub use factory::{
    all_available, arange, concat, convert, copy, expand, full, linspace, map_, meshgrid, ones,
    ones_like, random_normal, random_uniform, range_tensor, stack, unstack, wrap, zeros,
    zeros_like,
};
pub use fft::{fft, fftfreq, ifft};
pub use indexing::{
    boolean_mask, gather, nonzero, scatter, scatter_rule, OutOfBounds, ScatterMode, ScatterOptions,
    ScatterTarget,
};
pub use math::where_;
pub use native_call::native_call;
pub use pad::{pad, Constant, Edge, Extrapolation, Periodic, ZERO};
pub use reduce::{dot, reduce, DimSelection};
pub use sample::{closest_grid_values, grid_sample};
