mod common;

use common::assert_scalar_close;
use sharm_core::modules::crd::PointSet;
use sharm_core::modules::shc::Shc;
use sharm_core::modules::{Derivatives, Session, shs};

fn model(nmax: usize) -> Shc {
    let mut shc = Shc::calloc(nmax, 3.0, 1.0).expect("store should be allocated");
    for n in 0..=nmax {
        for m in 0..=n {
            let decay = 1.0 / ((n + 1) * (n + 2)) as f64;
            let c = decay * (0.37 * (n * n) as f64 + 1.7 * m as f64).cos();
            let s = if m == 0 { 0.0 } else { decay * (2.3 * n as f64 + 0.4 * m as f64).sin() };
            shc.set_coeffs(n, m, c, s).expect("coefficient should be set");
        }
    }
    shc
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

fn scattered() -> PointSet {
    let lat = vec![0.3, -0.7, 1.2, -1.45, 0.0, 0.9];
    let lon = vec![0.1, 2.0, -1.3, 4.4, 3.1, 5.9];
    let r = vec![1.1, 1.0, 1.3, 1.05, 2.0, 1.2];
    PointSet::scattered(lat, lon, r).expect("points should be valid")
}

#[test]
fn second_derivative_tensor_is_trace_free() {
    let nmax = 20;
    let shc = model(nmax);
    let session = Session::default();
    for grid in [
        PointSet::gl(nmax, 1.2).expect("grid should be built"),
        scattered(),
    ] {
        let [xx, _, _, yy, _, zz] =
            shs::point_grad2(&grid, &shc, nmax, &session).expect("grad2 should succeed");
        let scale = max_abs(&zz);
        for i in 0..xx.len() {
            let trace = xx[i] + yy[i] + zz[i];
            assert_scalar_close(&format!("trace at point {i}"), 0.0, trace, 1.0e-10 * scale, 0.0);
        }
    }
}

#[test]
fn gradient_matches_general_derivatives() {
    let nmax = 12;
    let shc = model(nmax);
    let session = Session::default();
    let points = scattered();
    let [x, y, z] = shs::point_grad1(&points, &shc, nmax, &session).expect("grad1");
    let dr = shs::point_guru(&points, &shc, nmax, Derivatives::new(1, 0, 0), &session)
        .expect("radial derivative");
    let dlat = shs::point_guru(&points, &shc, nmax, Derivatives::new(0, 1, 0), &session)
        .expect("latitudinal derivative");
    let dlon = shs::point_guru(&points, &shc, nmax, Derivatives::new(0, 0, 1), &session)
        .expect("longitudinal derivative");
    for i in 0..x.len() {
        assert_scalar_close(&format!("x at {i}"), dlat[i], x[i], 1.0e-14, 1.0e-14);
        assert_scalar_close(&format!("y at {i}"), -dlon[i], y[i], 1.0e-14, 1.0e-14);
        assert_scalar_close(&format!("z at {i}"), dr[i], z[i], 1.0e-14, 1.0e-14);
    }
}

#[test]
fn radial_derivative_matches_finite_differences() {
    let nmax = 10;
    let shc = model(nmax);
    let session = Session::default();
    let h = 1.0e-5;
    let at = |r: f64| {
        let points = PointSet::scattered(vec![0.4], vec![1.9], vec![r]).expect("point");
        shs::point(&points, &shc, nmax, &session).expect("synthesis")[0]
    };
    let numeric = (at(1.3 + h) - at(1.3 - h)) / (2.0 * h);
    let points = PointSet::scattered(vec![0.4], vec![1.9], vec![1.3]).expect("point");
    let [_, _, z] = shs::point_grad1(&points, &shc, nmax, &session).expect("grad1");
    assert_scalar_close("dV/dr", z[0], numeric, 1.0e-7, 1.0e-7);
}

#[test]
fn pole_points_give_finite_gradients() {
    let nmax = 9;
    let shc = model(nmax);
    let session = Session::default();
    let poles = PointSet::scattered(
        vec![std::f64::consts::FRAC_PI_2, -std::f64::consts::FRAC_PI_2],
        vec![0.7, 0.7],
        vec![1.1, 1.1],
    )
    .expect("pole points");
    let near = PointSet::scattered(
        vec![std::f64::consts::FRAC_PI_2 - 1.0e-7, -std::f64::consts::FRAC_PI_2 + 1.0e-7],
        vec![0.7, 0.7],
        vec![1.1, 1.1],
    )
    .expect("near-pole points");

    let at_pole = shs::point_grad1(&poles, &shc, nmax, &session).expect("grad1 at poles");
    let close = shs::point_grad1(&near, &shc, nmax, &session).expect("grad1 near poles");
    for (a, b) in at_pole.iter().zip(&close) {
        for (p, q) in a.iter().zip(b) {
            assert!(p.is_finite());
            assert_scalar_close("grad1", *p, *q, 1.0e-4, 0.0);
        }
    }

    let mixed = shs::point_guru(&poles, &shc, nmax, Derivatives::new(0, 1, 1), &session)
        .expect("mixed derivative");
    assert!(mixed.iter().all(|value| value.is_nan()));
}

#[test]
fn second_derivatives_converge_to_the_pole_limits() {
    let nmax = 30;
    let shc = model(nmax);
    let session = Session::default();
    let half_pi = std::f64::consts::FRAC_PI_2;
    let poles = PointSet::scattered(vec![half_pi, -half_pi], vec![0.5, 0.5], vec![1.0, 1.0])
        .expect("pole points");
    let limit = shs::point_grad2(&poles, &shc, nmax, &session).expect("grad2 at poles");
    let limit_pp = shs::point_guru(&poles, &shc, nmax, Derivatives::new(0, 2, 0), &session)
        .expect("second latitude derivative at poles");

    for distance in [1.0e-9, 1.0e-7, 1.0e-5] {
        let near = PointSet::scattered(
            vec![half_pi - distance, distance - half_pi],
            vec![0.5, 0.5],
            vec![1.0, 1.0],
        )
        .expect("near-pole points");
        let close = shs::point_grad2(&near, &shc, nmax, &session).expect("grad2 near poles");
        let close_pp = shs::point_guru(&near, &shc, nmax, Derivatives::new(0, 2, 0), &session)
            .expect("second latitude derivative near poles");
        // the field itself changes by O(distance) between the two points
        let tolerance = 2.0e4 * distance;
        for (component, (a, b)) in limit.iter().zip(&close).enumerate() {
            for (p, q) in a.iter().zip(b) {
                let label = format!("component {component} at {distance}");
                assert_scalar_close(&label, *p, *q, tolerance, tolerance);
            }
        }
        for (p, q) in limit_pp.iter().zip(&close_pp) {
            assert_scalar_close(&format!("V_pp at {distance}"), *p, *q, tolerance, tolerance);
        }
    }
}

#[test]
fn invalid_derivative_orders_are_rejected() {
    let error = shs::point_guru(
        &scattered(),
        &model(3),
        3,
        Derivatives::new(2, 1, 0),
        &Session::default(),
    )
    .expect_err("total order 3 must fail");
    assert_eq!(error.code(), "INPUT.DERIVATIVE_ORDER");
}
