//! Least-squares analysis of arbitrary point sets.

use crate::domain::{HarmError, HarmResult};
use crate::modules::crd::PointSet;
use crate::modules::leg::LegendreTables;
use crate::modules::session::Session;
use crate::modules::shc::{Shc, order_offset};
use crate::numerics::{DenseMatrix, solve_least_squares};
use tracing::debug;

/// Unknowns in solution order: `(n, m, sine)`.
fn unknowns(nmax: usize) -> Vec<(usize, usize, bool)> {
    let mut out = Vec::with_capacity((nmax + 1) * (nmax + 1));
    for m in 0..=nmax {
        for n in m..=nmax {
            out.push((n, m, false));
            if m > 0 {
                out.push((n, m, true));
            }
        }
    }
    out
}

/// Coefficients up to `nmax` fitted to values at any point set by least
/// squares. Needs at least `(nmax + 1)^2` points; non-distributed only.
pub fn point_lsq(
    points: &PointSet,
    values: &[f64],
    nmax: usize,
    mu: f64,
    r: f64,
    session: &Session,
) -> HarmResult<Shc> {
    debug!(kind = points.kind().as_str(), nmax, npoint = points.npoint(), "least-squares analysis");
    if session.is_distributed() || points.is_distributed() {
        return Err(HarmError::distributed(
            "MPI.LSQ",
            "least-squares analysis is available for non-distributed sessions only",
        ));
    }
    let columns = unknowns(nmax);
    let npoint = points.npoint();
    if values.len() != npoint {
        return Err(HarmError::invalid_argument(
            "INPUT.SHA_VALUES",
            format!("expected {npoint} values, got {}", values.len()),
        ));
    }
    if npoint < columns.len() {
        return Err(HarmError::invalid_argument(
            "INPUT.LSQ_POINTS",
            format!(
                "{npoint} points cannot determine {} coefficients up to degree {nmax}",
                columns.len()
            ),
        ));
    }
    let mut shc = crate::propagate!(Shc::calloc(nmax, mu, r), "sha::point_lsq")?;

    let tables = LegendreTables::new(nmax);
    let width = points.row_width();
    let mut design = DenseMatrix::zeros(npoint, columns.len());
    for row in 0..points.local_nlat() {
        let legendre = tables.triangle(points.lat()[row]);
        let ratio = r / points.r()[row];
        let radial: Vec<f64> = (0..=nmax).map(|n| mu / r * ratio.powi(n as i32 + 1)).collect();
        for col in 0..width {
            let lon = points.lon_of(row, col);
            let point = row * width + col;
            for (k, &(n, m, sine)) in columns.iter().enumerate() {
                let p = legendre[order_offset(nmax, m) + n - m];
                let trig = if sine { (m as f64 * lon).sin() } else { (m as f64 * lon).cos() };
                design[(point, k)] = radial[n] * p * trig;
            }
        }
    }

    let solution = crate::propagate!(solve_least_squares(&design, values), "sha::point_lsq")?;
    let mut fitted = vec![(0.0, 0.0); columns.len()];
    for (&(n, m, sine), value) in columns.iter().zip(&solution) {
        let index = order_offset(nmax, m) + n - m;
        if sine {
            fitted[index].1 = *value;
        } else {
            fitted[index].0 = *value;
        }
    }
    for m in 0..=nmax {
        for n in m..=nmax {
            let (c, s) = fitted[order_offset(nmax, m) + n - m];
            shc.set_coeffs(n, m, c, s)?;
        }
    }
    Ok(shc)
}

#[cfg(test)]
mod tests {
    use super::{point_lsq, unknowns};
    use crate::modules::crd::PointSet;
    use crate::modules::session::Session;
    use crate::modules::shc::Shc;
    use crate::modules::shs;
    use crate::numerics::assert_scalar_close;

    fn assert_same_coefficients(expected: &Shc, actual: &Shc, nmax: usize, tolerance: f64) {
        for n in 0..=nmax {
            for m in 0..=n {
                let (c0, s0) = expected.coeffs(n, m).expect("coeffs");
                let (c1, s1) = actual.coeffs(n, m).expect("coeffs");
                assert_scalar_close(&format!("C{n},{m}"), c0, c1, tolerance, 0.0);
                assert_scalar_close(&format!("S{n},{m}"), s0, s1, tolerance, 0.0);
            }
        }
    }

    #[test]
    fn unknown_count_is_a_square() {
        assert_eq!(unknowns(0).len(), 1);
        assert_eq!(unknowns(3).len(), 16);
    }

    #[test]
    fn least_squares_recovers_coefficients_from_scattered_points() {
        let nmax = 3;
        let mut shc = Shc::calloc(nmax, 1.0, 1.0).expect("calloc");
        shc.set_coeffs(0, 0, 1.0, 0.0).expect("set");
        shc.set_coeffs(1, 1, 0.2, -0.4).expect("set");
        shc.set_coeffs(2, 0, 0.3, 0.0).expect("set");
        shc.set_coeffs(3, 2, -0.1, 0.05).expect("set");

        let count = 60;
        let lat: Vec<f64> = (0..count)
            .map(|i| ((2.0 * i as f64 + 1.0) / count as f64 - 1.0).asin())
            .collect();
        let lon: Vec<f64> = (0..count).map(|i| 2.399963 * i as f64).collect();
        let points = PointSet::scattered(lat, lon, vec![1.2; count]).expect("points");
        let session = Session::default();
        let values = shs::point(&points, &shc, nmax, &session).expect("synthesis");
        let fit = point_lsq(&points, &values, nmax, 1.0, 1.0, &session).expect("fit");
        assert_same_coefficients(&shc, &fit, nmax, 1.0e-9);
    }

    #[test]
    fn clustered_points_keep_their_accuracy() {
        // 60 points inside a cap of radius 0.5 rad, condition number near 1e5
        let nmax = 4;
        let mut shc = Shc::calloc(nmax, 1.0, 1.0).expect("calloc");
        for n in 0..=nmax {
            for m in 0..=n {
                let c = 1.0 / (1.0 + n as f64 + 0.5 * m as f64);
                let s = if m == 0 { 0.0 } else { 0.3 * c };
                shc.set_coeffs(n, m, c, s).expect("set");
            }
        }
        let count = 60;
        let (lat, lon): (Vec<f64>, Vec<f64>) = (0..count)
            .map(|i| {
                let rho = 0.5 * ((i as f64 + 0.5) / count as f64).sqrt();
                let angle = 2.399963 * i as f64;
                (0.6 + rho * angle.cos(), 0.4 + rho * angle.sin())
            })
            .unzip();
        let points = PointSet::scattered(lat, lon, vec![1.0; count]).expect("points");
        let session = Session::default();
        let values = shs::point(&points, &shc, nmax, &session).expect("synthesis");
        let fit = point_lsq(&points, &values, nmax, 1.0, 1.0, &session).expect("fit");
        assert_same_coefficients(&shc, &fit, nmax, 1.0e-8);
    }

    #[test]
    fn coincident_points_are_rank_deficient() {
        let points = PointSet::scattered(vec![0.3; 4], vec![0.2; 4], vec![1.0; 4])
            .expect("points");
        let error = point_lsq(&points, &[1.0; 4], 1, 1.0, 1.0, &Session::default())
            .expect_err("rank deficient");
        assert_eq!(error.code(), "INPUT.LSQ_SYSTEM");
    }

    #[test]
    fn too_few_points_are_rejected() {
        let points = PointSet::scattered(vec![0.0; 3], vec![0.0, 1.0, 2.0], vec![1.0; 3])
            .expect("points");
        let error = point_lsq(&points, &[1.0; 3], 1, 1.0, 1.0, &Session::default())
            .expect_err("underdetermined");
        assert_eq!(error.code(), "INPUT.LSQ_POINTS");
    }
}
