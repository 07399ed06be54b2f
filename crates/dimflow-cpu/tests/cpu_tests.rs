// CPU Backend Tests — Positional buffer operations of CpuBackend
//
// These call the Backend trait directly with plain axes, below the named
// tensor layer. Run with: `cargo test -p dimflow-cpu`

#[cfg(test)]
mod tests {
    use dimflow_core::{
        Backend, BinaryOp, CmpOp, DType, NativeArray, NativeHandle, PadMode, ReduceOp, ScatterOp,
        UnaryOp,
    };
    use dimflow_cpu::{CpuArray, CpuBackend};

    fn cpu() -> CpuBackend {
        CpuBackend::new()
    }

    fn t(b: &CpuBackend, data: &[f64], shape: &[usize]) -> NativeHandle {
        b.from_f64(data, shape, DType::F64).unwrap()
    }

    fn values(b: &CpuBackend, x: &NativeHandle) -> Vec<f64> {
        b.to_f64_vec(x).unwrap()
    }

    fn imag(x: &NativeHandle) -> Vec<f64> {
        x.as_any()
            .downcast_ref::<CpuArray>()
            .and_then(|a| a.im())
            .map(|im| im.to_vec())
            .unwrap_or_default()
    }

    fn assert_approx_vec(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "length mismatch: {} vs {}",
            actual.len(),
            expected.len()
        );
        for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
            assert!((a - e).abs() < tol, "index {i}: {a} != {e} (tol={tol})");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_from_f64_rounds_to_dtype() {
        let b = cpu();
        let x = b.from_f64(&[0.1, 2.9], &[2], DType::F32).unwrap();
        assert_eq!(x.dtype(), DType::F32);
        assert_eq!(values(&b, &x), vec![0.1f32 as f64, 2.9f32 as f64]);
        let i = b.from_f64(&[2.9, -2.9], &[2], DType::I64).unwrap();
        assert_eq!(values(&b, &i), vec![2.0, -2.0]);
    }

    #[test]
    fn test_from_f64_checks_length() {
        let b = cpu();
        assert!(b.from_f64(&[1.0, 2.0, 3.0], &[2, 2], DType::F32).is_err());
    }

    #[test]
    fn test_range_and_linspace() {
        let b = cpu();
        let r = b.range(0, 5, 2, DType::I32).unwrap();
        assert_eq!(r.shape(), &[3]);
        assert_eq!(values(&b, &r), vec![0.0, 2.0, 4.0]);
        let l = b.linspace(0.0, 1.0, 5, DType::F64).unwrap();
        assert_eq!(values(&b, &l), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_random_uniform_range() {
        let b = cpu();
        b.seed(0);
        let x = b.random_uniform(&[1000], DType::F64).unwrap();
        assert!(values(&b, &x).iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_random_normal_moments() {
        let b = cpu();
        b.seed(1);
        let x = values(&b, &b.random_normal(&[20000], DType::F64).unwrap());
        let mean = x.iter().sum::<f64>() / x.len() as f64;
        let var = x.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / x.len() as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Element-wise
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_binary_broadcasts_size_one_axes() {
        let b = cpu();
        let col = t(&b, &[1.0, 2.0], &[2, 1]);
        let row = t(&b, &[10.0, 20.0, 30.0], &[1, 3]);
        let sum = b.binary(BinaryOp::Add, &col, &row).unwrap();
        assert_eq!(sum.shape(), &[2, 3]);
        assert_eq!(values(&b, &sum), vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn test_binary_broadcasts_lower_rank() {
        let b = cpu();
        let m = t(&b, &[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let s = t(&b, &[2.0], &[]);
        let p = b.binary(BinaryOp::Pow, &m, &s).unwrap();
        assert_eq!(values(&b, &p), vec![1.0, 4.0, 9.0, 16.0]);
    }

    #[test]
    fn test_binary_incompatible_shapes() {
        let b = cpu();
        let x = t(&b, &[1.0, 2.0], &[2]);
        let y = t(&b, &[1.0, 2.0, 3.0], &[3]);
        assert!(b.binary(BinaryOp::Add, &x, &y).is_err());
    }

    #[test]
    fn test_dtype_promotion() {
        let b = cpu();
        let i = b.from_f64(&[1.0, 2.0], &[2], DType::I32).unwrap();
        let f = b.from_f64(&[0.5, 0.5], &[2], DType::F64).unwrap();
        let r = b.binary(BinaryOp::Add, &i, &f).unwrap();
        assert_eq!(r.dtype(), DType::F64);
        assert_eq!(values(&b, &r), vec![1.5, 2.5]);
    }

    #[test]
    fn test_logical_ops() {
        let b = cpu();
        let x = b.from_f64(&[1.0, 1.0, 0.0, 0.0], &[4], DType::Bool).unwrap();
        let y = b.from_f64(&[1.0, 0.0, 1.0, 0.0], &[4], DType::Bool).unwrap();
        let and = b.binary(BinaryOp::And, &x, &y).unwrap();
        let xor = b.binary(BinaryOp::Xor, &x, &y).unwrap();
        assert_eq!(and.dtype(), DType::Bool);
        assert_eq!(values(&b, &and), vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(values(&b, &xor), vec![0.0, 1.0, 1.0, 0.0]);
        let not = b.unary(UnaryOp::Not, &x).unwrap();
        assert_eq!(values(&b, &not), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_unary_math() {
        let b = cpu();
        let x = t(&b, &[-1.5, 0.0, 4.0], &[3]);
        assert_eq!(values(&b, &b.unary(UnaryOp::Abs, &x).unwrap()), vec![1.5, 0.0, 4.0]);
        assert_eq!(values(&b, &b.unary(UnaryOp::Sign, &x).unwrap()), vec![-1.0, 0.0, 1.0]);
        assert_eq!(values(&b, &b.unary(UnaryOp::Floor, &x).unwrap()), vec![-2.0, 0.0, 4.0]);
        let e = b.unary(UnaryOp::Exp, &t(&b, &[0.0, 1.0], &[2])).unwrap();
        assert_approx_vec(&values(&b, &e), &[1.0, std::f64::consts::E], 1e-12);
        let inf = t(&b, &[f64::INFINITY, 1.0, f64::NAN], &[3]);
        assert_eq!(values(&b, &b.unary(UnaryOp::IsFinite, &inf).unwrap()), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_unary_on_ints_promotes_to_float() {
        let b = cpu();
        let x = b.from_f64(&[4.0, 9.0], &[2], DType::I64).unwrap();
        let r = b.unary(UnaryOp::Sqrt, &x).unwrap();
        assert!(r.dtype().is_float());
        assert_eq!(values(&b, &r), vec![2.0, 3.0]);
    }

    #[test]
    fn test_compare_and_where() {
        let b = cpu();
        let x = t(&b, &[1.0, 5.0, 3.0], &[3]);
        let three = t(&b, &[3.0], &[1]);
        let gt = b.compare(CmpOp::Gt, &x, &three).unwrap();
        assert_eq!(gt.dtype(), DType::Bool);
        assert_eq!(values(&b, &gt), vec![0.0, 1.0, 0.0]);
        let zero = t(&b, &[0.0], &[]);
        let r = b.where_(&gt, &x, &zero).unwrap();
        assert_eq!(values(&b, &r), vec![0.0, 5.0, 0.0]);
    }

    #[test]
    fn test_cast() {
        let b = cpu();
        let x = t(&b, &[1.7, -0.2, 0.0], &[3]);
        let i = b.cast(&x, DType::I32).unwrap();
        assert_eq!(values(&b, &i), vec![1.0, 0.0, 0.0]);
        let flag = b.cast(&x, DType::Bool).unwrap();
        assert_eq!(values(&b, &flag), vec![1.0, 1.0, 0.0]);
        let c = b.cast(&x, DType::Complex128).unwrap();
        assert_eq!(imag(&c), vec![0.0; 3]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Complex
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_complex_multiply() {
        let b = cpu();
        // (1 + 2i) * (3 - i) = 5 + 5i
        let x = b.from_complex(&[1.0], &[2.0], &[1], DType::Complex128).unwrap();
        let y = b.from_complex(&[3.0], &[-1.0], &[1], DType::Complex128).unwrap();
        let p = b.binary(BinaryOp::Mul, &x, &y).unwrap();
        assert_eq!(values(&b, &p), vec![5.0]);
        assert_eq!(imag(&p), vec![5.0]);
    }

    #[test]
    fn test_complex_parts_and_abs() {
        let b = cpu();
        let z = b.from_complex(&[3.0], &[4.0], &[1], DType::Complex64).unwrap();
        let abs = b.unary(UnaryOp::Abs, &z).unwrap();
        assert_eq!(abs.dtype(), DType::F32);
        assert_eq!(values(&b, &abs), vec![5.0]);
        let im = b.unary(UnaryOp::Imag, &z).unwrap();
        assert_eq!(values(&b, &im), vec![4.0]);
        assert!(imag(&im).is_empty());
    }

    #[test]
    fn test_complex_rejects_ordering_ops() {
        let b = cpu();
        let z = b.from_complex(&[1.0], &[1.0], &[1], DType::Complex64).unwrap();
        let err = b.binary(BinaryOp::Maximum, &z, &z).unwrap_err();
        assert!(err.is_unsupported());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reductions
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_reduce_axes() {
        let b = cpu();
        let x = t(&b, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let rows = b.reduce(ReduceOp::Sum, &x, &[1]).unwrap();
        assert_eq!(rows.shape(), &[2]);
        assert_eq!(values(&b, &rows), vec![6.0, 15.0]);
        let cols = b.reduce(ReduceOp::Max, &x, &[0]).unwrap();
        assert_eq!(values(&b, &cols), vec![4.0, 5.0, 6.0]);
        let all = b.reduce(ReduceOp::Prod, &x, &[0, 1]).unwrap();
        assert!(all.shape().is_empty());
        assert_eq!(values(&b, &all), vec![720.0]);
    }

    #[test]
    fn test_reduce_mean_std_any_all() {
        let b = cpu();
        let x = t(&b, &[1.0, 3.0, 0.0, 0.0], &[2, 2]);
        assert_eq!(values(&b, &b.reduce(ReduceOp::Mean, &x, &[1]).unwrap()), vec![2.0, 0.0]);
        assert_eq!(values(&b, &b.reduce(ReduceOp::Std, &x, &[1]).unwrap()), vec![1.0, 0.0]);
        let any = b.reduce(ReduceOp::Any, &x, &[1]).unwrap();
        assert_eq!(any.dtype(), DType::Bool);
        assert_eq!(values(&b, &any), vec![1.0, 0.0]);
        assert_eq!(values(&b, &b.reduce(ReduceOp::All, &x, &[0]).unwrap()), vec![0.0, 0.0]);
    }

    #[test]
    fn test_reduce_bool_sum_counts() {
        let b = cpu();
        let m = b.from_f64(&[1.0, 0.0, 1.0], &[3], DType::Bool).unwrap();
        let n = b.reduce(ReduceOp::Sum, &m, &[0]).unwrap();
        assert_eq!(n.dtype(), DType::I64);
        assert_eq!(values(&b, &n), vec![2.0]);
    }

    #[test]
    fn test_reduce_large_parallel() {
        let b = cpu();
        let n = 100_000;
        let x = b.full(&[n], 1.0, DType::F64).unwrap();
        let y = b.binary(BinaryOp::Mul, &x, &t(&b, &[2.0], &[])).unwrap();
        let s = b.reduce(ReduceOp::Sum, &y, &[0]).unwrap();
        assert_eq!(values(&b, &s), vec![2.0 * n as f64]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Layout
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_reshape_and_transpose() {
        let b = cpu();
        let x = t(&b, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], &[2, 3]);
        let r = b.reshape(&x, &[3, 2]).unwrap();
        assert_eq!(values(&b, &r), values(&b, &x));
        assert!(b.reshape(&x, &[4]).is_err());
        let tr = b.transpose(&x, &[1, 0]).unwrap();
        assert_eq!(tr.shape(), &[3, 2]);
        assert_eq!(values(&b, &tr), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_tile() {
        let b = cpu();
        let x = t(&b, &[1.0, 2.0], &[1, 2]);
        let r = b.tile(&x, &[2, 2]).unwrap();
        assert_eq!(r.shape(), &[2, 4]);
        assert_eq!(values(&b, &r), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_concat_stack_unstack() {
        let b = cpu();
        let x = t(&b, &[1.0, 2.0], &[1, 2]);
        let y = t(&b, &[3.0, 4.0, 5.0, 6.0], &[2, 2]);
        let c = b.concat(&[x.clone(), y], 0).unwrap();
        assert_eq!(c.shape(), &[3, 2]);
        assert_eq!(values(&b, &c), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let s = b.stack(&[x.clone(), x], 2).unwrap();
        assert_eq!(s.shape(), &[1, 2, 2]);
        assert_eq!(values(&b, &s), vec![1.0, 1.0, 2.0, 2.0]);

        let parts = b.unstack(&c, 1).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(values(&b, &parts[1]), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_flip() {
        let b = cpu();
        let x = t(&b, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], &[2, 3]);
        let f = b.flip(&x, &[1]).unwrap();
        assert_eq!(values(&b, &f), vec![2.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_pad_modes() {
        let b = cpu();
        let x = t(&b, &[1.0, 2.0, 3.0], &[3]);
        let c = b.pad(&x, &[(1, 2)], PadMode::Constant(0.0)).unwrap();
        assert_eq!(values(&b, &c), vec![0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        let e = b.pad(&x, &[(2, 1)], PadMode::Edge).unwrap();
        assert_eq!(values(&b, &e), vec![1.0, 1.0, 1.0, 2.0, 3.0, 3.0]);
        let p = b.pad(&x, &[(1, 1)], PadMode::Periodic).unwrap();
        assert_eq!(values(&b, &p), vec![3.0, 1.0, 2.0, 3.0, 1.0]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Indexing
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_nonzero() {
        let b = cpu();
        let x = t(&b, &[0.0, 1.0, 2.0, 0.0], &[2, 2]);
        let nz = b.nonzero(&x).unwrap();
        assert_eq!(nz.shape(), &[2, 2]);
        assert_eq!(nz.dtype(), DType::I64);
        assert_eq!(values(&b, &nz), vec![0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_boolean_mask() {
        let b = cpu();
        let x = t(&b, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], &[2, 3]);
        let mask = b.from_f64(&[1.0, 0.0, 1.0], &[3], DType::Bool).unwrap();
        let kept = b.boolean_mask(&x, &mask, 1).unwrap();
        assert_eq!(kept.shape(), &[2, 2]);
        assert_eq!(values(&b, &kept), vec![0.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_gather_nd() {
        let b = cpu();
        // values (batch=1, x=3, channel=2), indices (batch=1, list=2, coord=1)
        let v = t(&b, &[0.0, 10.0, 1.0, 11.0, 2.0, 12.0], &[1, 3, 2]);
        let i = b.from_f64(&[2.0, 0.0], &[1, 2, 1], DType::I64).unwrap();
        let g = b.batched_gather_nd(&v, &i).unwrap();
        assert_eq!(g.shape(), &[1, 2, 2]);
        assert_eq!(values(&b, &g), vec![2.0, 12.0, 0.0, 10.0]);
    }

    #[test]
    fn test_gather_out_of_bounds() {
        let b = cpu();
        let v = t(&b, &[0.0, 1.0], &[1, 2, 1]);
        let i = b.from_f64(&[2.0], &[1, 1, 1], DType::I64).unwrap();
        assert!(b.batched_gather_nd(&v, &i).is_err());
    }

    #[test]
    fn test_scatter_add_and_update() {
        let b = cpu();
        let base = b.full(&[1, 5, 1], 0.0, DType::F64).unwrap();
        let idx = b.from_f64(&[1.0, 3.0, 1.0], &[1, 3, 1], DType::I64).unwrap();
        let vals = t(&b, &[1.0, 1.0, 1.0], &[1, 3, 1]);
        let added = b.scatter(&base, &idx, &vals, ScatterOp::Add).unwrap();
        assert_eq!(values(&b, &added), vec![0.0, 2.0, 0.0, 1.0, 0.0]);
        let updated = b.scatter(&base, &idx, &vals, ScatterOp::Update).unwrap();
        assert_eq!(values(&b, &updated), vec![0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_scatter_skips_outside_points() {
        let b = cpu();
        let base = b.full(&[1, 3, 1], 0.0, DType::F64).unwrap();
        let idx = b.from_f64(&[-1.0, 1.0, 7.0], &[1, 3, 1], DType::I64).unwrap();
        let vals = t(&b, &[5.0], &[1, 1, 1]);
        let r = b.scatter(&base, &idx, &vals, ScatterOp::Add).unwrap();
        assert_eq!(values(&b, &r), vec![0.0, 5.0, 0.0]);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Structured
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_conv_same_and_valid() {
        let b = cpu();
        // value (batch=1, in=1, x=4), kernel (batch=1, out=1, in=1, x=3)
        let v = t(&b, &[1.0, 2.0, 3.0, 4.0], &[1, 1, 4]);
        let k = t(&b, &[1.0, 1.0, 1.0], &[1, 1, 1, 3]);
        let same = b.conv(&v, &k, true).unwrap();
        assert_eq!(same.shape(), &[1, 1, 4]);
        assert_eq!(values(&b, &same), vec![3.0, 6.0, 9.0, 7.0]);
        let valid = b.conv(&v, &k, false).unwrap();
        assert_eq!(valid.shape(), &[1, 1, 2]);
        assert_eq!(values(&b, &valid), vec![6.0, 9.0]);
    }

    #[test]
    fn test_conv_is_correlation() {
        let b = cpu();
        let v = t(&b, &[0.0, 1.0, 4.0, 9.0], &[1, 1, 4]);
        let k = t(&b, &[-0.5, 0.0, 0.5], &[1, 1, 1, 3]);
        let d = b.conv(&v, &k, false).unwrap();
        assert_eq!(values(&b, &d), vec![2.0, 4.0]);
    }

    #[test]
    fn test_conv_channels() {
        let b = cpu();
        // two input channels summed into one output channel
        let v = t(&b, &[1.0, 2.0, 10.0, 20.0], &[1, 2, 2]);
        let k = t(&b, &[1.0, 1.0], &[1, 1, 2, 1]);
        let r = b.conv(&v, &k, true).unwrap();
        assert_eq!(values(&b, &r), vec![11.0, 22.0]);
    }

    #[test]
    fn test_fft_roundtrip() {
        let b = cpu();
        let x = t(&b, &[1.0, 2.0, 3.0, 4.0], &[1, 4, 1]);
        let k = b.fft(&x, &[1], false).unwrap();
        assert!(k.dtype().is_complex());
        // DC component is the sum, Nyquist is the alternating sum
        assert_approx_vec(&values(&b, &k), &[10.0, -2.0, -2.0, -2.0], 1e-5);
        assert_approx_vec(&imag(&k), &[0.0, 2.0, 0.0, -2.0], 1e-5);
        let back = b.fft(&k, &[1], true).unwrap();
        assert_approx_vec(&values(&b, &back), &[1.0, 2.0, 3.0, 4.0], 1e-5);
        assert_approx_vec(&imag(&back), &[0.0; 4], 1e-5);
    }

    #[test]
    fn test_fft_2d_constant() {
        let b = cpu();
        let x = b.full(&[2, 2], 1.0, DType::Complex128).unwrap();
        let k = b.fft(&x, &[0, 1], false).unwrap();
        assert_approx_vec(&values(&b, &k), &[4.0, 0.0, 0.0, 0.0], 1e-12);
    }

    #[test]
    fn test_grid_sample_left_to_fallback() {
        let b = cpu();
        let g = t(&b, &[0.0, 1.0], &[1, 2, 1]);
        let c = t(&b, &[0.5], &[1, 1, 1]);
        assert!(b.grid_sample(&g, &c).unwrap_err().is_unsupported());
        assert!(!b.supports_gradients());
    }
}
