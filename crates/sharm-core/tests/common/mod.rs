#![allow(dead_code)]

use sharm_core::modules::shc::Shc;
use sharm_core::numerics::within_tolerance;

pub fn assert_scalar_close(label: &str, expected: f64, actual: f64, abs_tol: f64, rel_tol: f64) {
    assert!(
        within_tolerance(expected, actual, abs_tol, rel_tol, 1.0),
        "{label} expected={expected:.15e} actual={actual:.15e} abs_diff={:.15e} abs_tol={abs_tol:.15e} rel_tol={rel_tol:.15e}",
        (actual - expected).abs(),
    );
}

/// Largest absolute difference between the coefficients of two stores.
pub fn max_coefficient_difference(a: &Shc, b: &Shc, nmax: usize) -> f64 {
    let mut max = 0.0_f64;
    for n in 0..=nmax {
        for m in 0..=n {
            let (c0, s0) = a.coeffs(n, m).expect("coefficient should exist");
            let (c1, s1) = b.coeffs(n, m).expect("coefficient should exist");
            max = max.max((c0 - c1).abs()).max((s0 - s1).abs());
        }
    }
    max
}
