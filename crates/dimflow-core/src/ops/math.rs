use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::backend::{BinaryOp, CmpOp, UnaryOp};
use crate::broadcast::{broadcast_op, elementwise};
use crate::config;
use crate::dtype::DType;
use crate::error::Result;
use crate::tensor::Tensor;

// Element-wise math
//
// Unary functions map every leaf buffer (views stay lazy). Binary functions
// go through the broadcasting engine and then through `elementwise`, which
// merges shapes by name and lets the backend broadcast size-1 axes.

impl Tensor {
    fn unary_op(&self, op: UnaryOp) -> Result<Tensor> {
        self.map_native(&|b, n| b.unary(op, n))
    }

    fn binary_op(&self, other: &Tensor, op: BinaryOp) -> Result<Tensor> {
        broadcast_op(
            |ts| elementwise(ts, &|b, n| b.binary(op, &n[0], &n[1])),
            &[self.clone(), other.clone()],
        )
    }

    fn compare_op(&self, other: &Tensor, op: CmpOp) -> Result<Tensor> {
        broadcast_op(
            |ts| elementwise(ts, &|b, n| b.compare(op, &n[0], &n[1])),
            &[self.clone(), other.clone()],
        )
    }

    /// A host scalar that combines with `self` without promoting its dtype
    /// unless the value requires it.
    pub fn scalar_like(&self, value: f64) -> Tensor {
        let dtype = self.dtype();
        let keeps = dtype.is_float()
            || dtype.is_complex()
            || (dtype.is_int() && value.fract() == 0.0);
        if keeps {
            Tensor::scalar_typed(value, dtype)
        } else {
            Tensor::scalar(value)
        }
    }

    //  Unary

    pub fn neg(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Neg)
    }

    pub fn abs(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Abs)
    }

    pub fn sign(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Sign)
    }

    pub fn exp(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Log)
    }

    pub fn log2(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Log2)
    }

    pub fn log10(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Log10)
    }

    pub fn sqrt(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Sqrt)
    }

    pub fn sin(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Sin)
    }

    pub fn cos(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Cos)
    }

    pub fn tan(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Tan)
    }

    pub fn floor(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Floor)
    }

    pub fn ceil(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Ceil)
    }

    pub fn round(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Round)
    }

    pub fn is_finite(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::IsFinite)
    }

    /// Real part (identity for real tensors).
    pub fn real(&self) -> Result<Tensor> {
        if !self.dtype().is_complex() {
            return Ok(self.clone());
        }
        self.unary_op(UnaryOp::Real)
    }

    /// Imaginary part (zeros for real tensors).
    pub fn imag(&self) -> Result<Tensor> {
        if !self.dtype().is_complex() {
            return self.mul(&self.scalar_like(0.0));
        }
        self.unary_op(UnaryOp::Imag)
    }

    pub fn logical_not(&self) -> Result<Tensor> {
        self.unary_op(UnaryOp::Not)
    }

    //  Casting

    pub fn cast(&self, dtype: DType) -> Result<Tensor> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        self.map_native(&|b, n| b.cast(n, dtype))
    }

    /// Cast to the configured float precision. Complex values keep only
    /// their real part.
    pub fn to_float(&self) -> Result<Tensor> {
        self.real()?.cast(DType::float(config::precision()))
    }

    pub fn to_int32(&self) -> Result<Tensor> {
        self.cast(DType::I32)
    }

    pub fn to_int64(&self) -> Result<Tensor> {
        self.cast(DType::I64)
    }

    pub fn to_complex(&self) -> Result<Tensor> {
        if self.dtype().is_complex() {
            return Ok(self.clone());
        }
        self.cast(DType::complex(config::precision()))
    }

    //  Binary

    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Add)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Sub)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Mul)
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Div)
    }

    pub fn pow(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Pow)
    }

    pub fn floor_div(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::FloorDiv)
    }

    pub fn rem(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Mod)
    }

    pub fn maximum(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Maximum)
    }

    pub fn minimum(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Minimum)
    }

    /// `self / other`, with 0 wherever `other` is 0.
    pub fn divide_no_nan(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::DivNoNan)
    }

    pub fn logical_and(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::And)
    }

    pub fn logical_or(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Or)
    }

    pub fn logical_xor(&self, other: &Tensor) -> Result<Tensor> {
        self.binary_op(other, BinaryOp::Xor)
    }

    pub fn add_scalar(&self, v: f64) -> Result<Tensor> {
        self.add(&self.scalar_like(v))
    }

    pub fn mul_scalar(&self, v: f64) -> Result<Tensor> {
        self.mul(&self.scalar_like(v))
    }

    pub fn powf(&self, exponent: f64) -> Result<Tensor> {
        self.pow(&self.scalar_like(exponent))
    }

    /// Clamp to `[lower, upper]`.
    pub fn clip(&self, lower: &Tensor, upper: &Tensor) -> Result<Tensor> {
        self.maximum(lower)?.minimum(upper)
    }

    //  Comparison

    pub fn eq(&self, other: &Tensor) -> Result<Tensor> {
        self.compare_op(other, CmpOp::Eq)
    }

    pub fn ne(&self, other: &Tensor) -> Result<Tensor> {
        self.compare_op(other, CmpOp::Ne)
    }

    pub fn gt(&self, other: &Tensor) -> Result<Tensor> {
        self.compare_op(other, CmpOp::Gt)
    }

    pub fn ge(&self, other: &Tensor) -> Result<Tensor> {
        self.compare_op(other, CmpOp::Ge)
    }

    pub fn lt(&self, other: &Tensor) -> Result<Tensor> {
        self.compare_op(other, CmpOp::Lt)
    }

    pub fn le(&self, other: &Tensor) -> Result<Tensor> {
        self.compare_op(other, CmpOp::Le)
    }
}

/// Select `on_true` where `condition` holds, else `on_false`.
pub fn where_(condition: &Tensor, on_true: &Tensor, on_false: &Tensor) -> Result<Tensor> {
    broadcast_op(
        |ts| elementwise(ts, &|b, n| b.where_(&n[0], &n[1], &n[2])),
        &[condition.clone(), on_true.clone(), on_false.clone()],
    )
}

// Operator overloads return Result since shapes may not merge.

macro_rules! bin_trait {
    ($trait:ident, $method:ident) => {
        impl $trait<&Tensor> for &Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: &Tensor) -> Result<Tensor> {
                Tensor::$method(self, rhs)
            }
        }

        impl $trait<f64> for &Tensor {
            type Output = Result<Tensor>;
            fn $method(self, rhs: f64) -> Result<Tensor> {
                Tensor::$method(self, &self.scalar_like(rhs))
            }
        }
    };
}

bin_trait!(Add, add);
bin_trait!(Sub, sub);
bin_trait!(Mul, mul);
bin_trait!(Div, div);

impl Neg for &Tensor {
    type Output = Result<Tensor>;
    fn neg(self) -> Result<Tensor> {
        Tensor::neg(self)
    }
}
