use ant_nn::AntError;
use ant_nn::init::uniform;
use ant_nn::matrix::{Matrix, MatrixContext};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn sample() -> Matrix {
    Matrix::from_rows(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap()
}

#[test]
fn test_construction_rejects_bad_extents() {
    assert!(matches!(Matrix::new(0, 3), Err(AntError::InvalidDimension { .. })));
    assert!(matches!(
        Matrix::from_rows(2, 2, &[1.0, 2.0, 3.0]),
        Err(AntError::DimensionMismatch { .. })
    ));
    assert!(matches!(Matrix::identity(0), Err(AntError::InvalidDimension { .. })));
    // rejected before any storage is requested
    assert!(matches!(
        Matrix::identity(usize::MAX / 2),
        Err(AntError::InvalidDimension { .. })
    ));
    assert!(matches!(
        Matrix::filled(1 << 33, 1 << 33, 1.0),
        Err(AntError::InvalidDimension { .. })
    ));
}

#[test]
fn test_row_major_input_is_read_back_in_order() {
    let m = sample();
    assert_eq!(m.shape(), (2, 3));
    assert_eq!(m.at(1, 0), 4.0);
    assert_eq!(m.to_row_major(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(m.get(2, 0), None);
}

#[test]
fn test_clone_aliases_until_written() {
    let a = sample();
    let mut b = a.clone();
    assert!(b.shares_storage(&a));

    b.set(0, 0, 100.0).unwrap();
    assert_eq!(a.at(0, 0), 1.0);
    assert_eq!(b.at(0, 0), 100.0);
    assert!(!b.shares_storage(&a));
}

#[test]
fn test_exclusive_handle_writes_in_place() {
    let mut a = sample();
    let before = a.serial();
    a.set(1, 2, -6.0).unwrap();
    assert_eq!(a.at(1, 2), -6.0);
    assert_eq!(a.serial(), before);
}

#[test]
fn test_write_in_place_view_is_seen_by_the_parent() {
    let a = sample();
    let mut column = a.column_view(1).unwrap();
    column.fill(0.0).unwrap();
    assert_eq!(a.to_row_major(), vec![1.0, 0.0, 3.0, 4.0, 0.0, 6.0]);
}

#[test]
fn test_copy_on_write_view_detaches_on_first_write() {
    let a = sample();
    let mut window = a.view_cow(0, 1, 2, 2).unwrap();
    assert!(window.shares_storage(&a));
    assert_eq!(window.to_row_major(), vec![2.0, 3.0, 5.0, 6.0]);

    window.set(0, 0, 20.0).unwrap();
    assert!(!window.shares_storage(&a));
    assert_eq!(a.at(0, 1), 2.0);
    assert_eq!(window.to_row_major(), vec![20.0, 3.0, 5.0, 6.0]);
}

#[test]
fn test_toggling_write_policy_on_a_view() {
    let a = sample();
    let mut v = a.view(0, 0, 1, 1).unwrap();
    v.set_copy_on_write();
    v.set(0, 0, 7.0).unwrap();
    assert_eq!(a.at(0, 0), 1.0);

    let mut w = a.view_cow(1, 0, 1, 1).unwrap();
    w.set_write_in_place();
    w.set(0, 0, 8.0).unwrap();
    assert_eq!(a.at(1, 0), 8.0);
}

#[test]
fn test_window_outside_parent_is_rejected() {
    let a = sample();
    assert!(matches!(a.view(1, 1, 2, 2), Err(AntError::InvalidDimension { .. })));
    assert!(matches!(a.column_view(3), Err(AntError::InvalidDimension { .. })));
}

#[test]
fn test_immutable_handle_refuses_writes() {
    let mut m = sample();
    m.set_immutable();
    assert!(m.is_immutable());
    assert!(matches!(m.set(0, 0, 1.0), Err(AntError::ProtectionViolation)));
    assert!(matches!(m.at_mut(0, 0), Err(AntError::ProtectionViolation)));
    assert!(matches!(m.scale_in_place(2.0), Err(AntError::ProtectionViolation)));

    m.set_mutable();
    m.set(0, 0, 9.0).unwrap();
    assert_eq!(m.at(0, 0), 9.0);
}

#[test]
fn test_flags_only_affect_their_own_handle() {
    let mut a = sample();
    let mut frozen = a.clone();
    frozen.set_immutable();
    assert!(!a.is_immutable());

    a.set(0, 0, -1.0).unwrap();
    assert_eq!(frozen.at(0, 0), 1.0);
    assert!(frozen.set(0, 0, 0.0).is_err());
}

#[test]
fn test_operators_on_references() {
    let a = sample();
    let b = Matrix::filled(2, 3, 1.0).unwrap();

    assert_eq!((&a + &b).unwrap().to_row_major(), vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!((&a - &b).unwrap().sum(), 15.0);
    assert_eq!((&a * 2.0).at(1, 2), 12.0);
    assert_eq!((0.5 * &a).at(1, 1), 2.5);
    assert_eq!((-&a).at(0, 0), -1.0);
    assert!(matches!(&a + &a.transposed(), Err(AntError::DimensionMismatch { .. })));

    let c = (&a * &a.transposed()).unwrap();
    assert_eq!(c.to_row_major(), vec![14.0, 32.0, 32.0, 77.0]);
}

#[test]
fn test_in_place_arithmetic() {
    let mut a = sample();
    a.add_assign_matrix(&Matrix::filled(2, 3, 1.0).unwrap()).unwrap();
    a.sub_assign_matrix(&Matrix::filled(2, 3, 0.5).unwrap()).unwrap();
    a.scale_in_place(2.0).unwrap();
    assert_eq!(a.to_row_major(), vec![3.0, 5.0, 7.0, 9.0, 11.0, 13.0]);
    assert!(a.add_assign_matrix(&Matrix::new(3, 2).unwrap()).is_err());
}

#[test]
fn test_product_shape_is_checked() {
    let a = sample();
    assert!(matches!(a.matmul(&a), Err(AntError::DimensionMismatch { .. })));
}

#[test]
fn test_deferred_transpose_left_operand() {
    let a = sample();
    let b = Matrix::from_rows(2, 2, &[1.0, -1.0, 0.5, 2.0]).unwrap();

    let t = a.transpose();
    assert!(t.is_transposed());
    assert!(t.shares_storage(&a));

    let fused = t.matmul(&b).unwrap();
    let copied = a.transposed().matmul(&b).unwrap();
    assert_eq!(fused.shape(), (3, 2));
    assert_eq!(fused, copied);
}

#[test]
fn test_deferred_gram_product() {
    let a = sample();
    let t = a.transpose();
    let gram = t.matmul(&t).unwrap();
    assert_eq!(gram, a.transposed().matmul(&a).unwrap());
    assert_eq!(gram.shape(), (3, 3));
    assert_eq!(gram.at(0, 0), 17.0);
}

#[test]
fn test_other_transpose_combinations_are_rejected() {
    let a = sample();
    let b = Matrix::filled(3, 3, 1.0).unwrap();
    assert!(matches!(
        b.matmul(&a.transpose()),
        Err(AntError::UnsupportedTransposeCombination)
    ));
    let other = sample().transpose();
    assert!(matches!(
        a.transpose().matmul(&other),
        Err(AntError::UnsupportedTransposeCombination)
    ));
}

#[test]
fn test_elementwise_ops_ignore_the_transpose_flag() {
    let a = sample();
    let t = a.transpose();
    assert_eq!(t.shape(), (2, 3));
    assert_eq!(t.sum(), a.sum());
    assert_eq!(t.to_row_major(), a.to_row_major());
}

#[test]
fn test_reductions() {
    let a = sample();
    assert_eq!(a.row_sums().to_row_major(), vec![6.0, 15.0]);
    assert_eq!(a.column_sums().to_row_major(), vec![5.0, 7.0, 9.0]);
    assert_eq!(a.argmax_row(0), 2);
    assert!((a.frobenius() - 91f64.sqrt()).abs() < 1e-12);
    assert_eq!(a.max_abs_diff(&a.scale(2.0)).unwrap(), 6.0);
}

#[test]
fn test_identity_decomposes_to_identity() {
    let i = Matrix::identity(3).unwrap();
    let (q, r) = i.qr().unwrap();
    assert!(q.max_abs_diff(&i).unwrap() < 1e-15);
    assert!(r.max_abs_diff(&i).unwrap() < 1e-15);
}

#[test]
fn test_qr_reconstructs_random_matrices() {
    let mut rng = StdRng::seed_from_u64(42);
    for (rows, columns) in [(4, 4), (6, 3), (7, 1), (5, 5)] {
        let a = uniform(rows, columns, 1.0, &mut rng).unwrap();
        let (q, r) = a.qr().unwrap();

        assert!(q.matmul(&r).unwrap().max_abs_diff(&a).unwrap() < 1e-10);
        let qtq = q.transpose().matmul(&q).unwrap();
        assert!(qtq.max_abs_diff(&Matrix::identity(rows).unwrap()).unwrap() < 1e-10);
        for c in 0..columns {
            for row in c + 1..rows {
                assert!(r.at(row, c).abs() < 1e-12, "R not triangular at ({row}, {c})");
            }
        }
    }
}

#[test]
fn test_qr_least_squares_recovers_an_exact_fit() {
    // y = 2 + 3x sampled at five points
    let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
    let mut rows = Vec::new();
    for &x in &xs {
        rows.extend([1.0, x]);
    }
    let a = Matrix::from_rows(5, 2, &rows).unwrap();
    let b = Matrix::column(&xs.map(|x| 2.0 + 3.0 * x)).unwrap();

    let coef = a.solve_qr(&b).unwrap();
    assert!((coef.at(0, 0) - 2.0).abs() < 1e-10);
    assert!((coef.at(1, 0) - 3.0).abs() < 1e-10);
}

#[test]
fn test_qr_rejects_underdetermined_systems() {
    let a = Matrix::new(2, 3).unwrap();
    let b = Matrix::new(2, 1).unwrap();
    assert!(matches!(a.solve_qr(&b), Err(AntError::UnderdeterminedSystem { rows: 2, columns: 3 })));
    assert!(matches!(
        Matrix::new(3, 2).unwrap().solve_qr(&b),
        Err(AntError::DimensionMismatch { .. })
    ));
}

fn spd(n: usize, rng: &mut StdRng) -> Matrix {
    let m = uniform(n, n, 1.0, rng).unwrap();
    let mut a = m.matmul_transpose_right(&m).unwrap();
    for i in 0..n {
        let d = a.at(i, i);
        a.set(i, i, d + n as f64).unwrap();
    }
    a
}

#[test]
fn test_cholesky_reconstructs() {
    let mut rng = StdRng::seed_from_u64(3);
    let a = spd(5, &mut rng);
    let g = a.cholesky().unwrap();
    assert!(g.matmul_transpose_right(&g).unwrap().max_abs_diff(&a).unwrap() < 1e-10);
    for i in 0..5 {
        for j in i + 1..5 {
            assert_eq!(g.at(i, j), 0.0);
        }
    }
}

#[test]
fn test_cholesky_reports_indefinite_input() {
    let a = Matrix::from_rows(2, 2, &[1.0, 2.0, 2.0, 1.0]).unwrap();
    assert!(matches!(a.cholesky(), Err(AntError::NotPositiveDefinite { pivot: 1 })));

    let nan = Matrix::filled(1, 1, f64::NAN).unwrap();
    assert!(matches!(nan.cholesky(), Err(AntError::NotPositiveDefinite { pivot: 0 })));

    assert!(matches!(
        Matrix::new(2, 3).unwrap().cholesky(),
        Err(AntError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_symmetric_solve() {
    let mut rng = StdRng::seed_from_u64(11);
    let a = spd(4, &mut rng);
    let x = uniform(4, 2, 1.0, &mut rng).unwrap();
    let b = a.matmul(&x).unwrap();
    assert!(a.solve_symmetric(&b).unwrap().max_abs_diff(&x).unwrap() < 1e-10);
}

#[test]
fn test_context_issues_serials() {
    let ctx = MatrixContext::new();
    let a = ctx.zeros(2, 2).unwrap();
    let b = ctx.from_rows(1, 2, &[1.0, 2.0]).unwrap();
    let v = ctx.view(&a, 0, 0, 1, 1).unwrap();

    assert_eq!((a.serial(), b.serial(), v.serial()), (1, 2, 3));
    assert_eq!(ctx.issued(), 3);
    assert_eq!(Matrix::new(1, 1).unwrap().serial(), 0);
}
