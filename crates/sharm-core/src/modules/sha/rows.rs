use crate::modules::crd::{CellSet, PointSet, RowPair};
use crate::modules::leg::{BandIntegrals, LegendreTables, OrderRecursion, Sectorial, fill_column};
use crate::modules::shs::radial_powers;
use crate::modules::sweep::AnalysisRow;
use crate::numerics::RowTransform;

/// Fourier sums of a row pair split for the parity of `n + m`: `[0]` is
/// row plus mirror, `[1]` row minus mirror.
fn paired_sums(
    transform: &RowTransform,
    values: &[f64],
    pair: RowPair,
    width: usize,
    nmax: usize,
) -> ([Vec<f64>; 2], [Vec<f64>; 2]) {
    let row_sums = |row: usize| {
        let mut a = vec![0.0; nmax + 1];
        let mut b = vec![0.0; nmax + 1];
        transform.analyze(&values[row * width..(row + 1) * width], &mut a, &mut b);
        (a, b)
    };
    let (a, b) = row_sums(pair.row);
    match pair.mirror {
        None => ([a.clone(), a], [b.clone(), b]),
        Some(mirror) => {
            let (am, bm) = row_sums(mirror);
            let plus =
                |x: &[f64], y: &[f64]| -> Vec<f64> { x.iter().zip(y).map(|(p, q)| p + q).collect() };
            let minus =
                |x: &[f64], y: &[f64]| -> Vec<f64> { x.iter().zip(y).map(|(p, q)| p - q).collect() };
            ([plus(&a, &am), minus(&a, &am)], [plus(&b, &bm), minus(&b, &bm)])
        }
    }
}

/// Quadrature row: Gauss-Legendre or Driscoll-Healy latitude with weight.
#[derive(Debug, Clone)]
pub(crate) struct QuadratureRow {
    t: f64,
    factor: f64,
    sectorial: Sectorial,
    rpow: Vec<f64>,
    column: Vec<f64>,
    a: [Vec<f64>; 2],
    b: [Vec<f64>; 2],
}

impl QuadratureRow {
    pub(crate) fn new(
        points: &PointSet,
        values: &[f64],
        pair: RowPair,
        transform: &RowTransform,
        nmax: usize,
        mu: f64,
        shc_r: f64,
    ) -> Self {
        let (t, u) = points.lat()[pair.row].sin_cos();
        let nlon = points.nlon();
        let (a, b) = paired_sums(transform, values, pair, points.row_width(), nmax);
        Self {
            t,
            factor: points.weights()[pair.row] * shc_r / (mu * 2.0 * nlon as f64),
            sectorial: Sectorial::new(u),
            rpow: radial_powers(points.r()[pair.row], shc_r, nmax),
            column: vec![0.0; nmax + 1],
            a,
            b,
        }
    }
}

impl AnalysisRow for QuadratureRow {
    fn add_order(
        &mut self,
        rec: &OrderRecursion,
        tables: &LegendreTables,
        c: &mut [f64],
        s: &mut [f64],
    ) {
        let m = rec.m();
        let len = c.len();
        self.sectorial.advance_to(m, tables);
        fill_column(rec, self.t, self.sectorial.value(), &mut self.column[..len]);
        for k in 0..len {
            let f = self.factor * self.rpow[m + k] * self.column[k];
            c[k] += f * self.a[k % 2][m];
            s[k] += f * self.b[k % 2][m];
        }
    }
}

/// Row of a global cell grid for the approximate cell analysis.
#[derive(Debug, Clone)]
pub(crate) struct CellAnalysisRow {
    factor: f64,
    band: BandIntegrals,
    rpow: Vec<f64>,
    integrals: Vec<f64>,
    a: [Vec<f64>; 2],
    b: [Vec<f64>; 2],
}

impl CellAnalysisRow {
    /// `transform` runs over the cell centres of equally wide columns of
    /// width `width`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cells: &CellSet,
        values: &[f64],
        pair: RowPair,
        transform: &RowTransform,
        width: f64,
        nmax: usize,
        mu: f64,
        shc_r: f64,
    ) -> Self {
        let (mut a, mut b) = paired_sums(transform, values, pair, cells.row_width(), nmax);
        for m in 0..=nmax {
            let damping = if m == 0 {
                width
            } else {
                2.0 * (0.5 * m as f64 * width).sin() / m as f64
            };
            for p in 0..2 {
                a[p][m] *= damping;
                b[p][m] *= damping;
            }
        }
        Self {
            factor: shc_r / (mu * crate::common::constants::FOUR_PI),
            band: BandIntegrals::new(cells.latmin()[pair.row], cells.latmax()[pair.row], nmax),
            rpow: radial_powers(cells.r()[pair.row], shc_r, nmax),
            integrals: vec![0.0; nmax + 1],
            a,
            b,
        }
    }
}

impl AnalysisRow for CellAnalysisRow {
    fn add_order(
        &mut self,
        rec: &OrderRecursion,
        tables: &LegendreTables,
        c: &mut [f64],
        s: &mut [f64],
    ) {
        let m = rec.m();
        let len = c.len();
        self.band.column(rec, tables, &mut self.integrals[..len]);
        for k in 0..len {
            let f = self.factor * self.rpow[m + k] * self.integrals[k];
            c[k] += f * self.a[k % 2][m];
            s[k] += f * self.b[k % 2][m];
        }
    }
}
