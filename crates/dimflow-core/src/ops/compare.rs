use std::cell::Cell;

use crate::broadcast::broadcast_each;
use crate::error::Result;
use crate::tensor::Tensor;

use super::reduce::DimSelection;

/// Whether `|a - b| <= abs_tolerance + rel_tolerance * |b|` everywhere.
///
/// Identical tensors are close without looking at their values. Non-uniform
/// operands are compared slice by slice.
pub fn close(a: &Tensor, b: &Tensor, rel_tolerance: f64, abs_tolerance: f64) -> Result<bool> {
    if Tensor::same(a, b) {
        return Ok(true);
    }
    let all_close = Cell::new(true);
    broadcast_each(
        |ts| {
            if !all_close.get() {
                return Ok(());
            }
            let diff = ts[0].sub(&ts[1])?.abs()?;
            let tolerance = ts[1].abs()?.mul_scalar(rel_tolerance)?.add_scalar(abs_tolerance)?;
            let within = diff.le(&tolerance)?.all(DimSelection::All)?.to_scalar()?;
            if within == 0.0 {
                all_close.set(false);
            }
            Ok(())
        },
        &[a.clone(), b.clone()],
    )?;
    Ok(all_close.get())
}

/// Panics unless `a` and `b` are [`close`].
pub fn assert_close(a: &Tensor, b: &Tensor, rel_tolerance: f64, abs_tolerance: f64) {
    match close(a, b, rel_tolerance, abs_tolerance) {
        Ok(true) => {}
        Ok(false) => {
            let detail = a
                .sub(b)
                .and_then(|d| d.abs())
                .and_then(|d| d.max(DimSelection::All))
                .and_then(|d| d.to_scalar())
                .map(|m| format!("max difference {m}"))
                .unwrap_or_else(|e| e.to_string());
            panic!("tensors are not close: {a:?} vs {b:?} ({detail})");
        }
        Err(e) => panic!("tensors cannot be compared: {a:?} vs {b:?}: {e}"),
    }
}
