use crate::domain::HarmResult;
use crate::modules::crd::{CellSet, PointSet};
use crate::modules::session::Session;
use crate::modules::shc::Shc;
use crate::modules::{sha, shs};

/// Evaluation of a coefficient store on a descriptor.
pub trait Synthesis {
    fn synthesize(&self, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Vec<f64>>;
}

/// Recovery of coefficients from values laid out on a descriptor.
pub trait Analysis {
    fn analyze(
        &self,
        values: &[f64],
        nmax: usize,
        mu: f64,
        r: f64,
        session: &Session,
    ) -> HarmResult<Shc>;
}

pub trait RoundTrip {
    /// Synthesizes `shc` and analyses the result back with the same scaling.
    fn round_trip(&self, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Shc>;
}

impl<T> RoundTrip for T
where
    T: Synthesis + Analysis,
{
    fn round_trip(&self, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Shc> {
        let values = self.synthesize(shc, nmax, session)?;
        self.analyze(&values, nmax, shc.mu(), shc.r(), session)
    }
}

impl Synthesis for PointSet {
    fn synthesize(&self, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Vec<f64>> {
        shs::point(self, shc, nmax, session)
    }
}

impl Analysis for PointSet {
    /// Quadrature for Gauss-Legendre and Driscoll-Healy grids, least squares
    /// otherwise.
    fn analyze(
        &self,
        values: &[f64],
        nmax: usize,
        mu: f64,
        r: f64,
        session: &Session,
    ) -> HarmResult<Shc> {
        if self.kind().is_quadrature() {
            sha::point(self, values, nmax, mu, r, session)
        } else {
            sha::point_lsq(self, values, nmax, mu, r, session)
        }
    }
}

impl Synthesis for CellSet {
    fn synthesize(&self, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Vec<f64>> {
        shs::cell(self, shc, nmax, session)
    }
}

impl Analysis for CellSet {
    fn analyze(
        &self,
        values: &[f64],
        nmax: usize,
        mu: f64,
        r: f64,
        session: &Session,
    ) -> HarmResult<Shc> {
        sha::cell(self, values, nmax, mu, r, session)
    }
}

#[cfg(test)]
mod tests {
    use super::{RoundTrip, Synthesis};
    use crate::domain::HarmErrorKind;
    use crate::modules::crd::{CellSet, PointSet};
    use crate::modules::session::Session;
    use crate::modules::shc::Shc;
    use crate::numerics::assert_scalar_close;

    fn store() -> Shc {
        let mut shc = Shc::calloc(3, 1.0, 1.0).expect("calloc");
        shc.set_coeffs(0, 0, 1.0, 0.0).expect("set");
        shc.set_coeffs(2, 1, 0.5, 0.25).expect("set");
        shc.set_coeffs(3, 3, -0.2, 0.1).expect("set");
        shc
    }

    #[test]
    fn quadrature_round_trip_is_exact() {
        let shc = store();
        let grid = PointSet::dh1(3, 1.0).expect("grid");
        let back = grid.round_trip(&shc, 3, &Session::default()).expect("round trip");
        for n in 0..=3 {
            for m in 0..=n {
                let (c0, s0) = shc.coeffs(n, m).expect("coeffs");
                let (c1, s1) = back.coeffs(n, m).expect("coeffs");
                assert_scalar_close(&format!("C{n},{m}"), c0, c1, 1.0e-12, 0.0);
                assert_scalar_close(&format!("S{n},{m}"), s0, s1, 1.0e-12, 0.0);
            }
        }
    }

    #[test]
    fn round_trip_preserves_errors() {
        let cells = CellSet::grid(vec![0.0], vec![0.5], vec![0.0], vec![0.5], vec![1.0])
            .expect("cells");
        assert!(cells.synthesize(&store(), 3, &Session::default()).is_ok());
        let error = cells
            .round_trip(&store(), 3, &Session::default())
            .expect_err("partial grid");
        assert_eq!(error.kind(), HarmErrorKind::InvalidArgument);
    }
}
