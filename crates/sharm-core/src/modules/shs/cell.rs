use super::radial_powers;
use crate::modules::crd::{CellKind, CellSet, RowPair};
use crate::modules::leg::{BandIntegrals, LegendreTables, OrderRecursion};
use crate::modules::session::Session;
use crate::modules::sweep::SynthesisRow;
use crate::numerics::{RowTransform, within_tolerance};

/// How the longitude integrals of a cell grid are evaluated.
pub(crate) enum Columns {
    /// All columns share one width: integrals become a synthesis at the cell
    /// centres of damped Fourier coefficients.
    Equal { transform: RowTransform, width: f64 },
    /// Closed-form integrals per column.
    Bounds,
}

impl Columns {
    pub(crate) fn new(cells: &CellSet, session: &Session) -> Self {
        if cells.kind() != CellKind::Grid || cells.nlon() == 0 {
            return Self::Bounds;
        }
        let (lonmin, lonmax) = (cells.lonmin(), cells.lonmax());
        let width = lonmax[0] - lonmin[0];
        let tolerance = session.config().threshold;
        let equal = lonmin
            .iter()
            .zip(lonmax)
            .all(|(lo, hi)| within_tolerance(hi - lo, width, tolerance, tolerance, 1.0));
        if !equal {
            return Self::Bounds;
        }
        let centres: Vec<f64> = lonmin.iter().map(|lo| lo + 0.5 * width).collect();
        Self::Equal {
            transform: RowTransform::new(&centres, session.config().fft_tolerance(centres.len())),
            width,
        }
    }
}

/// `∫ cos(m λ) dλ` and `∫ sin(m λ) dλ` over `[lon1, lon2]`.
fn longitude_integrals(m: usize, lon1: f64, lon2: f64) -> (f64, f64) {
    if m == 0 {
        return (lon2 - lon1, 0.0);
    }
    let mf = m as f64;
    (
        ((mf * lon2).sin() - (mf * lon1).sin()) / mf,
        -((mf * lon2).cos() - (mf * lon1).cos()) / mf,
    )
}

/// One row of a cell set and its optional mirror band.
#[derive(Debug, Clone)]
pub(crate) struct CellRow {
    pair: RowPair,
    band_area: f64,
    band: BandIntegrals,
    rpow: Vec<f64>,
    integrals: Vec<f64>,
    a: [Vec<f64>; 2],
    b: [Vec<f64>; 2],
}

impl CellRow {
    pub(crate) fn new(cells: &CellSet, pair: RowPair, shc_r: f64, nmax: usize) -> Self {
        let (latmin, latmax) = (cells.latmin()[pair.row], cells.latmax()[pair.row]);
        let r = cells.r()[pair.row];
        Self {
            pair,
            band_area: latmax.sin() - latmin.sin(),
            band: BandIntegrals::new(latmin, latmax, nmax),
            rpow: radial_powers(shc_r, r, nmax),
            integrals: vec![0.0; nmax + 1],
            a: [vec![0.0; nmax + 1], vec![0.0; nmax + 1]],
            b: [vec![0.0; nmax + 1], vec![0.0; nmax + 1]],
        }
    }

    pub(crate) fn finish(
        &self,
        cells: &CellSet,
        columns: &Columns,
        scale: f64,
    ) -> Vec<(usize, Vec<Vec<f64>>)> {
        let mut rows = vec![(self.pair.row, 1.0)];
        if let Some(mirror) = self.pair.mirror {
            rows.push((mirror, -1.0));
        }
        let nm = self.a[0].len();
        rows.into_iter()
            .map(|(row, odd)| {
                let a: Vec<f64> = (0..nm).map(|m| self.a[0][m] + odd * self.a[1][m]).collect();
                let b: Vec<f64> = (0..nm).map(|m| self.b[0][m] + odd * self.b[1][m]).collect();
                let values = match columns {
                    Columns::Equal { transform, width } => {
                        let damping = |m: usize| {
                            if m == 0 {
                                *width
                            } else {
                                2.0 * (0.5 * m as f64 * width).sin() / m as f64
                            }
                        };
                        let a: Vec<f64> = a.iter().enumerate().map(|(m, v)| v * damping(m)).collect();
                        let b: Vec<f64> = b.iter().enumerate().map(|(m, v)| v * damping(m)).collect();
                        let mut out = vec![0.0; transform.nlon()];
                        transform.synthesize(&a, &b, &mut out);
                        let area = width * self.band_area;
                        out.iter_mut().for_each(|value| *value *= scale / area);
                        out
                    }
                    Columns::Bounds => (0..cells.row_width())
                        .map(|col| {
                            let (lon1, lon2) = cells.lon_bounds(row, col);
                            let sum: f64 = (0..nm)
                                .map(|m| {
                                    let (lc, ls) = longitude_integrals(m, lon1, lon2);
                                    a[m] * lc + b[m] * ls
                                })
                                .sum();
                            scale * sum / ((lon2 - lon1) * self.band_area)
                        })
                        .collect(),
                };
                (row, vec![values])
            })
            .collect()
    }
}

impl SynthesisRow for CellRow {
    fn add_order(&mut self, rec: &OrderRecursion, tables: &LegendreTables, c: &[f64], s: &[f64]) {
        let m = rec.m();
        let len = c.len();
        self.band.column(rec, tables, &mut self.integrals[..len]);
        let mut a = [0.0; 2];
        let mut b = [0.0; 2];
        for k in 0..len {
            let f = self.rpow[m + k] * self.integrals[k];
            a[k % 2] += f * c[k];
            b[k % 2] += f * s[k];
        }
        for p in 0..2 {
            self.a[p][m] = a[p];
            self.b[p][m] = b[p];
        }
    }
}
