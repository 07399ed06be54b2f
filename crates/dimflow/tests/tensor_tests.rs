// Tensor Tests — Named shapes, lazy views, stacks and element-wise math
//
// Run with: `cargo test -p dimflow --test tensor_tests`

use dimflow::prelude::*;
use dimflow::{DimSize, Error};

fn setup() {
    dimflow::init().unwrap();
}

fn xy(x: usize, y: usize) -> Shape {
    spatial("x", x).merge(&spatial("y", y)).unwrap()
}

fn assert_approx(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < tol, "index {i}: {a} != {e} (tol={tol})");
    }
}

// Shapes

#[test]
fn test_shape_equality_ignores_order() {
    let a = Shape::new(vec![Dim::batch("b", 2), Dim::spatial("x", 3)]).unwrap();
    let b = Shape::new(vec![Dim::spatial("x", 3), Dim::batch("b", 2)]).unwrap();
    assert_eq!(a, b);
    assert!(!a.same_order(&b));
}

#[test]
fn test_merge_orders_by_kind() {
    let a = channel("vector", 2).merge(&spatial("x", 4)).unwrap();
    let merged = a.merge(&batch("b", 3)).unwrap();
    assert_eq!(merged.names(), vec!["b", "x", "vector"]);
}

#[test]
fn test_merge_rejects_conflicts() {
    assert!(matches!(
        spatial("x", 3).merge(&spatial("x", 4)),
        Err(Error::ShapeMismatch { .. })
    ));
    assert!(spatial("x", 3).merge(&channel("x", 3)).is_err());
    assert_eq!(spatial("x", 1).merge(&spatial("x", 4)).unwrap(), spatial("x", 4));
}

#[test]
fn test_duplicate_dims_rejected() {
    assert!(Shape::new(vec![Dim::spatial("x", 2), Dim::channel("x", 2)]).is_err());
}

// Construction

#[test]
fn test_wrap_and_read_back() {
    setup();
    let t = ops::wrap(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &xy(2, 3)).unwrap();
    assert_eq!(t.rank(), 2);
    assert_eq!(t.dtype(), DType::F32);
    assert_eq!(t.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(
        t.to_f64_vec_in(&["y", "x"]).unwrap(),
        vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
    );
}

#[test]
fn test_wrap_checks_element_count() {
    setup();
    assert!(matches!(
        ops::wrap(&[1.0, 2.0, 3.0], &xy(2, 2)),
        Err(Error::ElementCountMismatch { expected: 4, got: 3, .. })
    ));
}

#[test]
fn test_typed_slices() {
    setup();
    let t = Tensor::from_slice(&[1i64, 2, 3], &instance("points", 3)).unwrap();
    assert_eq!(t.dtype(), DType::I64);
    let i = Tensor::from_slice(&[4i32, -2], &spatial("x", 2)).unwrap();
    assert_eq!(i.dtype(), DType::I32);
    assert_eq!(i.to_f64_vec().unwrap(), vec![4.0, -2.0]);
    let f = Tensor::from_slice(&[0.5f32, 1.5], &spatial("x", 2)).unwrap();
    assert_eq!(f.dtype(), DType::F32);
    assert_eq!(f.to_f64_vec().unwrap(), vec![0.5, 1.5]);
    let b = Tensor::from_f64(&[1.0, 0.0], &channel("c", 2), DType::Bool).unwrap();
    assert_eq!(b.dtype(), DType::Bool);
    assert_eq!(b.to_f64_vec().unwrap(), vec![1.0, 0.0]);
}

#[test]
fn test_scalar_has_no_dims() {
    setup();
    let s = Tensor::scalar(2.5);
    assert_eq!(s.rank(), 0);
    assert_eq!(s.to_scalar().unwrap(), 2.5);
}

#[test]
fn test_constants_are_lazy() {
    setup();
    let z = ops::zeros(&xy(100, 100)).unwrap();
    assert!(!z.is_native());
    assert_eq!(z.shape().volume().unwrap(), 10_000);
    let sum = z.add_scalar(1.0).unwrap().sum(DimSelection::All).unwrap();
    assert_eq!(sum.to_scalar().unwrap(), 10_000.0);
}

#[test]
fn test_sum_of_ones() {
    setup();
    let x = ops::ones(&xy(2, 2)).unwrap();
    assert_eq!(x.sum(DimSelection::All).unwrap().to_scalar().unwrap(), 4.0);
}

// Lazy views

#[test]
fn test_expand_is_collapsed_view() {
    setup();
    let t = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let e = t.expand(&batch("b", 3)).unwrap();
    assert!(!e.is_native());
    assert_eq!(e.shape().size("b").unwrap(), 3);
    assert_eq!(
        e.to_f64_vec_in(&["b", "x"]).unwrap(),
        vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]
    );
    assert_eq!(
        e.to_f64_vec_in(&["x", "b"]).unwrap(),
        vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]
    );
}

#[test]
fn test_expand_stretches_size_one() {
    setup();
    let t = ops::wrap(&[7.0], &spatial("x", 1)).unwrap();
    let e = t.expand(&spatial("x", 3)).unwrap();
    assert_eq!(e.to_f64_vec().unwrap(), vec![7.0, 7.0, 7.0]);
}

#[test]
fn test_unstack_collapsed_repeats() {
    setup();
    let t = ops::wrap(&[1.0, 2.0], &spatial("x", 2))
        .unwrap()
        .expand(&batch("b", 2))
        .unwrap();
    let slices = t.unstack("b").unwrap();
    assert_eq!(slices.len(), 2);
    for s in &slices {
        assert_eq!(s.to_f64_vec().unwrap(), vec![1.0, 2.0]);
    }
    let columns = t.unstack("x").unwrap();
    assert_eq!(columns[1].to_f64_vec().unwrap(), vec![2.0, 2.0]);
}

#[test]
fn test_rename_and_with_kind() {
    setup();
    let t = ops::wrap(&[1.0, 2.0, 3.0], &spatial("x", 3)).unwrap();
    let r = t.rename_dim("x", &Dim::unresolved("points", DimKind::Instance)).unwrap();
    assert_eq!(r.shape().get("points").unwrap().kind(), DimKind::Instance);
    assert_eq!(r.shape().size("points").unwrap(), 3);
    let c = t.with_kind("x", DimKind::Channel).unwrap();
    assert_eq!(c.shape().channel().rank(), 1);
    assert_eq!(c.to_f64_vec().unwrap(), vec![1.0, 2.0, 3.0]);
}

// Stacks

#[test]
fn test_uniform_stack_materializes() {
    setup();
    let a = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let b = ops::wrap(&[3.0, 4.0], &spatial("x", 2)).unwrap();
    let s = ops::stack(&[a, b], &Dim::batch("b", 2)).unwrap();
    assert!(s.shape().is_uniform());
    assert_eq!(s.to_f64_vec_in(&["b", "x"]).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(s.to_f64_vec_in(&["x", "b"]).unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
}

#[test]
fn test_stack_broadcasts_missing_dims() {
    setup();
    let a = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let s = ops::stack(&[a, Tensor::scalar(5.0)], &Dim::channel("c", 2)).unwrap();
    assert_eq!(s.to_f64_vec_in(&["x", "c"]).unwrap(), vec![1.0, 5.0, 2.0, 5.0]);
}

#[test]
fn test_non_uniform_stack() {
    setup();
    let a = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let b = ops::wrap(&[3.0, 4.0, 5.0], &spatial("x", 3)).unwrap();
    let s = ops::stack(&[a, b], &Dim::batch("b", 2)).unwrap();

    assert!(s.shape().is_non_uniform());
    assert_eq!(s.shape().non_uniform_dims(), vec!["b"]);
    assert!(matches!(
        s.shape().get("x").unwrap().size(),
        DimSize::Varying { along, sizes }
            if along == "b" && sizes == &vec![DimSize::Fixed(2), DimSize::Fixed(3)]
    ));
    assert!(matches!(
        s.to_f64_vec(),
        Err(Error::NonUniformMaterialization { .. })
    ));

    let per_batch = s.sum(&spatial("x", 1)).unwrap();
    assert_eq!(per_batch.to_f64_vec().unwrap(), vec![3.0, 12.0]);
    assert_eq!(s.sum(DimSelection::All).unwrap().to_scalar().unwrap(), 15.0);
    assert_eq!(s.mean(DimSelection::All).unwrap().to_scalar().unwrap(), 3.0);
}

#[test]
fn test_elementwise_distributes_over_non_uniform() {
    setup();
    let a = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let b = ops::wrap(&[3.0, 4.0, 5.0], &spatial("x", 3)).unwrap();
    let s = ops::stack(&[a, b], &Dim::batch("b", 2)).unwrap();
    let scale = ops::wrap(&[10.0, 100.0], &batch("b", 2)).unwrap();
    let r = s.mul(&scale).unwrap();
    assert!(r.shape().is_non_uniform());
    let parts = r.unstack("b").unwrap();
    assert_eq!(parts[0].to_f64_vec().unwrap(), vec![10.0, 20.0]);
    assert_eq!(parts[1].to_f64_vec().unwrap(), vec![300.0, 400.0, 500.0]);
}

#[test]
fn test_size_one_dim_broadcasts_against_non_uniform_stack() {
    setup();
    let a = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let b = ops::wrap(&[3.0, 4.0, 5.0], &spatial("x", 3)).unwrap();
    let s = ops::stack(&[a, b], &Dim::batch("b", 2)).unwrap();
    let shift = ops::wrap(&[10.0], &batch("b", 1)).unwrap();

    for r in [s.add(&shift).unwrap(), shift.add(&s).unwrap()] {
        assert_eq!(r.shape().size("b").unwrap(), 2);
        let parts = r.unstack("b").unwrap();
        assert_eq!(parts[0].to_f64_vec().unwrap(), vec![11.0, 12.0]);
        assert_eq!(parts[1].to_f64_vec().unwrap(), vec![13.0, 14.0, 15.0]);
    }

    let zero = ops::zeros(&batch("b", 1)).unwrap();
    assert!(ops::close(&s, &zero, 0.0, 10.0).unwrap());
    assert!(!ops::close(&s, &zero, 0.0, 1.0).unwrap());

    let wrong = ops::wrap(&[1.0, 2.0, 3.0], &batch("b", 3)).unwrap();
    assert!(matches!(s.add(&wrong), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_nested_non_uniform_stacks() {
    setup();
    let x = |data: &[f64]| ops::wrap(data, &spatial("x", data.len())).unwrap();
    let inner1 = ops::stack(&[x(&[1.0]), x(&[2.0, 3.0])], &Dim::batch("b", 2)).unwrap();
    let inner2 = ops::stack(&[x(&[4.0, 5.0, 6.0]), x(&[7.0, 8.0, 9.0, 10.0])], &Dim::batch("b", 2)).unwrap();
    let outer = ops::stack(&[inner1, inner2], &Dim::batch("c", 2)).unwrap();

    assert_eq!(outer.shape().non_uniform_dims(), vec!["c"]);
    assert_eq!(
        format!("{}", outer.shape().get("x").unwrap().size()),
        "(1|2@b)|(3|4@b)@c"
    );
    let zeros = ops::zeros_like(&outer).unwrap();
    assert_eq!(zeros.shape(), outer.shape());
    assert_eq!(ops::ones_like(&outer).unwrap().sum(DimSelection::All).unwrap().to_scalar().unwrap(), 10.0);

    assert_eq!(outer.sum(DimSelection::All).unwrap().to_scalar().unwrap(), 55.0);
    assert_eq!(outer.mean(DimSelection::All).unwrap().to_scalar().unwrap(), 5.5);
    let std = outer.std(DimSelection::All).unwrap().to_scalar().unwrap();
    assert!((std - 8.25f64.sqrt()).abs() < 1e-5, "std {std}");

    // Slicing across the inner stack dim keeps sizes varying along the outer one
    let second = outer.unstack("b").unwrap().remove(1);
    assert_eq!(second.sum(&spatial("x", 1)).unwrap().to_f64_vec().unwrap(), vec![5.0, 34.0]);

    let doubled = (&outer * 2.0).unwrap();
    assert_eq!(doubled.sum(DimSelection::All).unwrap().to_scalar().unwrap(), 110.0);
}

// Element-wise math

#[test]
fn test_broadcast_by_name() {
    setup();
    let a = ops::wrap(&[1.0, 2.0, 3.0], &spatial("x", 3)).unwrap();
    let b = ops::wrap(&[10.0, 20.0], &spatial("y", 2)).unwrap();
    let c = (&a + &b).unwrap();
    assert_eq!(c.shape(), &xy(3, 2));
    assert_eq!(
        c.to_f64_vec_in(&["x", "y"]).unwrap(),
        vec![11.0, 21.0, 12.0, 22.0, 13.0, 23.0]
    );
}

#[test]
fn test_broadcast_pairs_by_name_not_position() {
    setup();
    let a = ops::wrap(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &xy(2, 3)).unwrap();
    let b = Tensor::from_f64(
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        &Shape::new(vec![Dim::spatial("y", 3), Dim::spatial("x", 2)]).unwrap(),
        DType::F32,
    )
    .unwrap();
    let d = (&a - &b).unwrap();
    assert_eq!(
        d.to_f64_vec_in(&["x", "y"]).unwrap(),
        vec![0.0, -1.0, -2.0, 2.0, 1.0, 0.0]
    );
}

#[test]
fn test_incompatible_sizes_fail() {
    setup();
    let a = ops::zeros(&spatial("x", 3)).unwrap();
    let b = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    assert!(matches!((&a + &b), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_dtype_promotion() {
    setup();
    let i = Tensor::from_slice(&[1i32, 2, 3], &spatial("x", 3)).unwrap();
    let f = ops::wrap(&[0.5, 0.5, 0.5], &spatial("x", 3)).unwrap();
    let sum = (&i + &f).unwrap();
    assert!(sum.dtype().is_float());
    assert_eq!(sum.to_f64_vec().unwrap(), vec![1.5, 2.5, 3.5]);

    let doubled = i.mul_scalar(2.0).unwrap();
    assert_eq!(doubled.dtype(), DType::I32);
    assert_eq!(doubled.to_f64_vec().unwrap(), vec![2.0, 4.0, 6.0]);

    let halved = (&i / &Tensor::scalar_typed(2.0, DType::I32)).unwrap();
    assert!(halved.dtype().is_float());
    assert_eq!(halved.to_f64_vec().unwrap(), vec![0.5, 1.0, 1.5]);
}

#[test]
fn test_unary_keeps_views_lazy() {
    setup();
    let t = ops::wrap(&[-1.0, 4.0], &spatial("x", 2))
        .unwrap()
        .expand(&batch("b", 3))
        .unwrap();
    let a = t.abs().unwrap();
    assert!(!a.is_native());
    assert_eq!(a.to_f64_vec_in(&["b", "x"]).unwrap(), vec![1.0, 4.0, 1.0, 4.0, 1.0, 4.0]);
    let s = a.sqrt().unwrap();
    assert_approx(&s.to_f64_vec_in(&["x", "b"]).unwrap(), &[1.0, 1.0, 1.0, 2.0, 2.0, 2.0], 1e-6);
}

#[test]
fn test_comparisons_and_where() {
    setup();
    let t = ops::wrap(&[1.0, 5.0, 3.0], &instance("points", 3)).unwrap();
    let big = t.gt(&Tensor::scalar(2.0)).unwrap();
    assert_eq!(big.dtype(), DType::Bool);
    assert_eq!(big.to_f64_vec().unwrap(), vec![0.0, 1.0, 1.0]);
    let picked = ops::where_(&big, &t, &t.neg().unwrap()).unwrap();
    assert_eq!(picked.to_f64_vec().unwrap(), vec![-1.0, 5.0, 3.0]);
    let clipped = t.clip(&Tensor::scalar(2.0), &Tensor::scalar(4.0)).unwrap();
    assert_eq!(clipped.to_f64_vec().unwrap(), vec![2.0, 4.0, 3.0]);
}

#[test]
fn test_complex_parts() {
    setup();
    let t = ops::wrap(&[1.0, -2.0], &spatial("x", 2)).unwrap();
    let c = t.to_complex().unwrap();
    assert!(c.dtype().is_complex());
    assert_eq!(c.real().unwrap().to_f64_vec().unwrap(), vec![1.0, -2.0]);
    assert_eq!(c.imag().unwrap().to_f64_vec().unwrap(), vec![0.0, 0.0]);
}

// Reductions

#[test]
fn test_reduce_named_dims() {
    setup();
    let t = ops::wrap(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &xy(2, 3)).unwrap();
    assert_eq!(t.sum(&spatial("y", 3)).unwrap().to_f64_vec().unwrap(), vec![6.0, 15.0]);
    assert_eq!(t.max("x").unwrap().to_f64_vec().unwrap(), vec![4.0, 5.0, 6.0]);
    assert_eq!(t.min(DimSelection::All).unwrap().to_scalar().unwrap(), 1.0);
    assert_eq!(t.prod("x").unwrap().to_f64_vec().unwrap(), vec![4.0, 10.0, 18.0]);
    assert_approx(&t.mean("y").unwrap().to_f64_vec().unwrap(), &[2.0, 5.0], 1e-6);
}

#[test]
fn test_reduce_absent_dims_is_identity() {
    setup();
    let t = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let same = t.sum("z").unwrap();
    assert!(Tensor::same(&same, &t));
    let std = t.std("z").unwrap();
    assert_eq!(std.to_f64_vec().unwrap(), vec![0.0, 0.0]);
}

#[test]
fn test_reduce_collapsed_without_materializing() {
    setup();
    let t = ops::wrap(&[1.0, 2.0], &spatial("x", 2))
        .unwrap()
        .expand(&batch("b", 1000))
        .unwrap();
    let s = t.sum("b").unwrap();
    assert_eq!(s.to_f64_vec().unwrap(), vec![1000.0, 2000.0]);
    let m = t.mean("b").unwrap();
    assert_eq!(m.to_f64_vec().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_any_all_std() {
    setup();
    let b = Tensor::from_f64(&[1.0, 0.0, 1.0], &instance("p", 3), DType::Bool).unwrap();
    assert_eq!(b.any("p").unwrap().to_scalar().unwrap(), 1.0);
    assert_eq!(b.all("p").unwrap().to_scalar().unwrap(), 0.0);
    let t = ops::wrap(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], &instance("p", 8)).unwrap();
    assert_approx(&[t.std("p").unwrap().to_scalar().unwrap()], &[2.0], 1e-6);
}

#[test]
fn test_close() {
    setup();
    let a = ops::wrap(&[1.0, 2.0], &spatial("x", 2)).unwrap();
    let b = ops::wrap(&[1.0, 2.000_1], &spatial("x", 2)).unwrap();
    assert!(ops::close(&a, &b, 1e-3, 0.0).unwrap());
    assert!(!ops::close(&a, &b, 0.0, 1e-6).unwrap());
    ops::assert_close(&a, &a, 0.0, 0.0);
}
