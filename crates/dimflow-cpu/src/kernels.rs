use std::f64::consts::{LN_10, LN_2, PI};

use num_complex::Complex64;
use rayon::prelude::*;

use dimflow_core::{BinaryOp, CmpOp, ReduceOp, UnaryOp};

use crate::layout::Layout;

// Element kernels — scalar math and the loops that apply it
//
// Everything here works on plain f64 / Complex64 values and flat indices.
// Loops switch to rayon once a buffer has PARALLEL_THRESHOLD elements.

pub(crate) const PARALLEL_THRESHOLD: usize = 1 << 15;

fn truth(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Evaluate `f` for `0..n`.
pub(crate) fn map_n<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if n >= PARALLEL_THRESHOLD {
        (0..n).into_par_iter().map(f).collect()
    } else {
        (0..n).map(f).collect()
    }
}

/// Map pairs of flat indices of two views with equal logical shape.
pub(crate) fn map2<T, F>(a: &Layout, b: &Layout, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync + Send,
{
    if a.elem_count() >= PARALLEL_THRESHOLD {
        let ia: Vec<usize> = a.strided_indices().collect();
        let ib: Vec<usize> = b.strided_indices().collect();
        ia.par_iter().zip(ib.par_iter()).map(|(&i, &j)| f(i, j)).collect()
    } else {
        a.strided_indices()
            .zip(b.strided_indices())
            .map(|(i, j)| f(i, j))
            .collect()
    }
}

/// Map triples of flat indices of three views with equal logical shape.
pub(crate) fn map3<T, F>(a: &Layout, b: &Layout, c: &Layout, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize, usize) -> T + Sync + Send,
{
    if a.elem_count() >= PARALLEL_THRESHOLD {
        let ia: Vec<usize> = a.strided_indices().collect();
        let ib: Vec<usize> = b.strided_indices().collect();
        let ic: Vec<usize> = c.strided_indices().collect();
        (0..ia.len())
            .into_par_iter()
            .map(|k| f(ia[k], ib[k], ic[k]))
            .collect()
    } else {
        a.strided_indices()
            .zip(b.strided_indices())
            .zip(c.strided_indices())
            .map(|((i, j), k)| f(i, j, k))
            .collect()
    }
}

//  Unary

/// Round half to even.
fn round_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}

pub(crate) fn unary_real(op: UnaryOp, x: f64) -> f64 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Abs => x.abs(),
        UnaryOp::Sign => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Log2 => x.log2(),
        UnaryOp::Log10 => x.log10(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::Floor => x.floor(),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Round => round_even(x),
        UnaryOp::IsFinite => truth(x.is_finite()),
        UnaryOp::Real => x,
        UnaryOp::Imag => 0.0,
        UnaryOp::Not => truth(x == 0.0),
    }
}

/// Complex counterpart of [`unary_real`]. Ops with a real result return it
/// as the real part.
pub(crate) fn unary_complex(op: UnaryOp, z: Complex64) -> Complex64 {
    let real = |v: f64| Complex64::new(v, 0.0);
    match op {
        UnaryOp::Neg => -z,
        UnaryOp::Abs => real(z.norm()),
        UnaryOp::Sign => {
            let n = z.norm();
            if n == 0.0 {
                z
            } else {
                z / n
            }
        }
        UnaryOp::Exp => z.exp(),
        UnaryOp::Log => z.ln(),
        UnaryOp::Log2 => z.ln() / LN_2,
        UnaryOp::Log10 => z.ln() / LN_10,
        UnaryOp::Sqrt => z.sqrt(),
        UnaryOp::Sin => z.sin(),
        UnaryOp::Cos => z.cos(),
        UnaryOp::Tan => z.tan(),
        UnaryOp::Floor => Complex64::new(z.re.floor(), z.im.floor()),
        UnaryOp::Ceil => Complex64::new(z.re.ceil(), z.im.ceil()),
        UnaryOp::Round => Complex64::new(round_even(z.re), round_even(z.im)),
        UnaryOp::IsFinite => real(truth(z.re.is_finite() && z.im.is_finite())),
        UnaryOp::Real => real(z.re),
        UnaryOp::Imag => real(z.im),
        UnaryOp::Not => real(truth(z.re == 0.0 && z.im == 0.0)),
    }
}

//  Binary

/// Floored modulo: the result has the sign of the divisor.
fn floor_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

pub(crate) fn binary_real(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Mod => floor_mod(a, b),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Maximum => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }
        }
        BinaryOp::Minimum => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }
        }
        BinaryOp::DivNoNan => {
            if b == 0.0 {
                0.0
            } else {
                a / b
            }
        }
        BinaryOp::And => truth(a != 0.0 && b != 0.0),
        BinaryOp::Or => truth(a != 0.0 || b != 0.0),
        BinaryOp::Xor => truth((a != 0.0) != (b != 0.0)),
    }
}

/// Bitwise variant of the logical ops for integer operands.
pub(crate) fn bitwise(op: BinaryOp, a: f64, b: f64) -> f64 {
    let (a, b) = (a as i64, b as i64);
    let r = match op {
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        _ => a ^ b,
    };
    r as f64
}

pub(crate) fn is_logical(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
}

/// Whether `op` is defined for complex operands.
pub(crate) fn supports_complex(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow | BinaryOp::DivNoNan
    )
}

pub(crate) fn binary_complex(op: BinaryOp, a: Complex64, b: Complex64) -> Complex64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Pow => a.powc(b),
        BinaryOp::DivNoNan if b.norm_sqr() == 0.0 => Complex64::new(0.0, 0.0),
        _ => a / b,
    }
}

pub(crate) fn compare_real(op: CmpOp, a: f64, b: f64) -> f64 {
    truth(match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
    })
}

//  Reductions

pub(crate) fn reduce_real(op: ReduceOp, xs: &[f64]) -> f64 {
    let n = xs.len() as f64;
    match op {
        ReduceOp::Sum => xs.iter().sum(),
        ReduceOp::Prod => xs.iter().product(),
        ReduceOp::Mean => xs.iter().sum::<f64>() / n,
        ReduceOp::Min => {
            if xs.is_empty() || xs.iter().any(|x| x.is_nan()) {
                f64::NAN
            } else {
                xs.iter().copied().fold(f64::INFINITY, f64::min)
            }
        }
        ReduceOp::Max => {
            if xs.is_empty() || xs.iter().any(|x| x.is_nan()) {
                f64::NAN
            } else {
                xs.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            }
        }
        ReduceOp::Any => truth(xs.iter().any(|&x| x != 0.0)),
        ReduceOp::All => truth(xs.iter().all(|&x| x != 0.0)),
        ReduceOp::Std => {
            let mean = xs.iter().sum::<f64>() / n;
            (xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n).sqrt()
        }
    }
}

/// Complex reduction. Min and max are not defined and must be rejected by
/// the caller; std returns its (real) value as the real part.
pub(crate) fn reduce_complex(op: ReduceOp, zs: &[Complex64]) -> Complex64 {
    let n = zs.len() as f64;
    let real = |v: f64| Complex64::new(v, 0.0);
    match op {
        ReduceOp::Sum => zs.iter().sum(),
        ReduceOp::Prod => zs.iter().product(),
        ReduceOp::Mean => zs.iter().sum::<Complex64>() / n,
        ReduceOp::Any => real(truth(zs.iter().any(|z| z.norm_sqr() != 0.0))),
        ReduceOp::All => real(truth(zs.iter().all(|z| z.norm_sqr() != 0.0))),
        ReduceOp::Std => {
            let mean = zs.iter().sum::<Complex64>() / n;
            real((zs.iter().map(|z| (z - mean).norm_sqr()).sum::<f64>() / n).sqrt())
        }
        ReduceOp::Min | ReduceOp::Max => real(f64::NAN),
    }
}

//  Fourier

/// DFT of one line. The inverse is divided by the line length.
pub(crate) fn dft(line: &[Complex64], inverse: bool) -> Vec<Complex64> {
    let n = line.len();
    if n == 0 {
        return Vec::new();
    }
    let sign = if inverse { 1.0 } else { -1.0 };
    let twiddles: Vec<Complex64> = (0..n)
        .map(|k| Complex64::from_polar(1.0, sign * 2.0 * PI * k as f64 / n as f64))
        .collect();
    let scale = if inverse { 1.0 / n as f64 } else { 1.0 };
    (0..n)
        .map(|k| {
            let sum: Complex64 = line
                .iter()
                .enumerate()
                .map(|(j, &x)| x * twiddles[(j * k) % n])
                .sum();
            sum * scale
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_even() {
        assert_eq!(unary_real(UnaryOp::Round, 2.5), 2.0);
        assert_eq!(unary_real(UnaryOp::Round, 3.5), 4.0);
        assert_eq!(unary_real(UnaryOp::Round, -2.5), -2.0);
        assert_eq!(unary_real(UnaryOp::Round, 1.2), 1.0);
    }

    #[test]
    fn test_floor_mod_sign_follows_divisor() {
        assert_eq!(binary_real(BinaryOp::Mod, -1.0, 3.0), 2.0);
        assert_eq!(binary_real(BinaryOp::Mod, 1.0, -3.0), -2.0);
        assert_eq!(binary_real(BinaryOp::FloorDiv, -1.0, 3.0), -1.0);
    }

    #[test]
    fn test_div_no_nan() {
        assert_eq!(binary_real(BinaryOp::DivNoNan, 1.0, 0.0), 0.0);
        assert_eq!(binary_real(BinaryOp::DivNoNan, 1.0, 4.0), 0.25);
        let z = binary_complex(BinaryOp::DivNoNan, Complex64::new(1.0, 1.0), Complex64::new(0.0, 0.0));
        assert_eq!(z, Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(bitwise(BinaryOp::And, 6.0, 3.0), 2.0);
        assert_eq!(bitwise(BinaryOp::Or, 6.0, 3.0), 7.0);
        assert_eq!(bitwise(BinaryOp::Xor, 6.0, 3.0), 5.0);
    }

    #[test]
    fn test_population_std() {
        let std = reduce_real(ReduceOp::Std, &[1.0, 3.0]);
        assert!((std - 1.0).abs() < 1e-12);
        assert!(reduce_real(ReduceOp::Max, &[1.0, f64::NAN]).is_nan());
    }

    #[test]
    fn test_dft_of_impulse_is_flat() {
        let line = [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)];
        let k = dft(&line, false);
        for z in &k {
            assert!((z - Complex64::new(1.0, 0.0)).norm() < 1e-12);
        }
        let back = dft(&k, true);
        assert!((back[0] - Complex64::new(1.0, 0.0)).norm() < 1e-12);
        assert!(back[1].norm() < 1e-12);
    }
}
