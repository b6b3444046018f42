use super::pole::PoleSums;
use super::{Derivatives, Latitude, Quantity, Term, radial_factor, radial_powers};
use crate::common::constants::POLE_COS_THRESHOLD;
use crate::modules::crd::{PointSet, RowPair};
use crate::modules::leg::{
    LegendreTables, OrderRecursion, Sectorial, fill_column, fill_column_with_derivatives,
};
use crate::modules::sweep::SynthesisRow;
use crate::numerics::RowTransform;

/// Fourier coefficients of one `(dr, lat)` combination, split by the parity
/// of `n + m` so the mirrored row comes for free.
#[derive(Debug, Clone)]
struct Fourier {
    dr: usize,
    lat: Latitude,
    a: [Vec<f64>; 2],
    b: [Vec<f64>; 2],
}

#[derive(Debug, Clone)]
struct Regular {
    sectorial: Sectorial,
    column: Vec<f64>,
    dq1: Vec<f64>,
    dq2: Vec<f64>,
    /// Latitude factors other than `P̄nm` itself, one column each.
    derived: Vec<(Latitude, Vec<f64>)>,
    fourier: Vec<Fourier>,
}

#[derive(Debug, Clone)]
enum State {
    Regular(Regular),
    Pole(PoleSums),
}

/// One latitude row of a point set (one point for scattered sets) and its
/// optional mirror.
#[derive(Debug, Clone)]
pub(crate) struct PointRow {
    pair: RowPair,
    t: f64,
    u: f64,
    r: f64,
    rpow: Vec<f64>,
    state: State,
}

impl PointRow {
    pub(crate) fn new(
        points: &PointSet,
        pair: RowPair,
        shc_r: f64,
        nmax: usize,
        terms: &[Term],
    ) -> Self {
        let lat = points.lat()[pair.row];
        let r = points.r()[pair.row];
        let (t, u) = lat.sin_cos();
        let state = if u.abs() <= POLE_COS_THRESHOLD {
            let max_dr = terms.iter().map(|d| d.dr).max().unwrap_or(0);
            State::Pole(PoleSums::new(max_dr))
        } else {
            let mut fourier: Vec<Fourier> = Vec::new();
            let mut derived: Vec<(Latitude, Vec<f64>)> = Vec::new();
            for term in terms {
                if !fourier.iter().any(|f| f.dr == term.dr && f.lat == term.lat) {
                    fourier.push(Fourier {
                        dr: term.dr,
                        lat: term.lat,
                        a: [vec![0.0; nmax + 1], vec![0.0; nmax + 1]],
                        b: [vec![0.0; nmax + 1], vec![0.0; nmax + 1]],
                    });
                }
                if term.lat != Latitude::Value && !derived.iter().any(|(lat, _)| *lat == term.lat) {
                    derived.push((term.lat, vec![0.0; nmax + 1]));
                }
            }
            let scratch = || if derived.is_empty() { Vec::new() } else { vec![0.0; nmax + 1] };
            State::Regular(Regular {
                sectorial: Sectorial::new(u),
                column: vec![0.0; nmax + 1],
                dq1: scratch(),
                dq2: scratch(),
                derived,
                fourier,
            })
        };
        Self {
            pair,
            t,
            u,
            r,
            rpow: radial_powers(shc_r, r, nmax),
            state,
        }
    }

    /// Local row index of the row itself (the point index for scattered sets).
    pub(crate) fn index(&self) -> usize {
        self.pair.row
    }

    fn regular_term(
        &self,
        regular: &Regular,
        d: Term,
        mirror: bool,
        transform: &RowTransform,
    ) -> Vec<f64> {
        let mut out = vec![0.0; transform.nlon()];
        let Some(fourier) = regular
            .fourier
            .iter()
            .find(|f| f.dr == d.dr && f.lat == d.lat)
        else {
            return out;
        };
        let odd = if mirror { -1.0 } else { 1.0 };
        let lat_sign = if mirror && d.lat.is_odd() { -1.0 } else { 1.0 };
        let nm = fourier.a[0].len();
        let mut a = vec![0.0; nm];
        let mut b = vec![0.0; nm];
        for m in 0..nm {
            let am = lat_sign * (fourier.a[0][m] + odd * fourier.a[1][m]);
            let bm = lat_sign * (fourier.b[0][m] + odd * fourier.b[1][m]);
            let mf = m as f64;
            (a[m], b[m]) = match d.dlon {
                0 => (am, bm),
                1 => (mf * bm, -mf * am),
                _ => (-mf * mf * am, -mf * mf * bm),
            };
        }
        transform.synthesize(&a, &b, &mut out);
        let factor = self.r.powi(-((d.lat.r_power() + d.dlon) as i32)) * self.u.powi(-(d.dlon as i32));
        out.iter_mut().for_each(|value| *value *= factor);
        out
    }

    fn regular_values(
        &self,
        regular: &Regular,
        quantity: Quantity,
        terms: &[Term],
        mirror: bool,
        transform: &RowTransform,
    ) -> Vec<Vec<f64>> {
        let g: Vec<Vec<f64>> = terms
            .iter()
            .map(|d| self.regular_term(regular, *d, mirror, transform))
            .collect();
        let r = self.r;
        let combine = |f: &dyn Fn(usize) -> f64| (0..transform.nlon()).map(f).collect::<Vec<f64>>();
        match quantity {
            Quantity::Value | Quantity::Guru(_) => g,
            Quantity::Grad1 => vec![
                g[0].clone(),
                g[1].iter().map(|v| -v).collect(),
                g[2].clone(),
            ],
            Quantity::Grad2 => {
                // in the order of Quantity::Grad2.terms()
                let [v_r, v_rr, v_p, v_pp, v_l, v_twist, v_lateral, v_rp, v_rl] =
                    std::array::from_fn(|k| &g[k]);
                vec![
                    combine(&|j| v_r[j] / r + v_pp[j]),
                    combine(&|j| -v_twist[j]),
                    combine(&|j| v_rp[j] - v_p[j] / r),
                    combine(&|j| v_r[j] / r + v_lateral[j]),
                    combine(&|j| -v_rl[j] + v_l[j] / r),
                    v_rr.clone(),
                ]
            }
        }
    }

    fn pole_values(
        &self,
        sums: &PoleSums,
        quantity: Quantity,
        south: bool,
        transform_lons: &[f64],
    ) -> Vec<Vec<f64>> {
        let r = self.r;
        let columns = |f: &dyn Fn(f64) -> f64| -> Vec<f64> { transform_lons.iter().map(|lon| f(*lon)).collect() };
        match quantity {
            Quantity::Value => vec![columns(&|lon| sums.term(Derivatives::VALUE, lon, south, r))],
            Quantity::Guru(d) => vec![columns(&|lon| sums.term(d, lon, south, r))],
            Quantity::Grad1 => (0..3)
                .map(|k| columns(&|lon| sums.grad1(lon, south, r)[k]))
                .collect(),
            Quantity::Grad2 => (0..6)
                .map(|k| columns(&|lon| sums.grad2(lon, south, r)[k]))
                .collect(),
        }
    }

    /// Values of the row (and its mirror) for every output component.
    pub(crate) fn finish(
        &self,
        quantity: Quantity,
        terms: &[Term],
        transform: &RowTransform,
        scale: f64,
    ) -> Vec<(usize, Vec<Vec<f64>>)> {
        let mut rows = vec![(self.pair.row, false)];
        if let Some(mirror) = self.pair.mirror {
            rows.push((mirror, true));
        }
        rows.into_iter()
            .map(|(row, mirror)| {
                let mut values = match &self.state {
                    State::Regular(regular) => {
                        self.regular_values(regular, quantity, terms, mirror, transform)
                    }
                    State::Pole(sums) => {
                        let south = mirror || self.t < 0.0;
                        self.pole_values(sums, quantity, south, transform.lons())
                    }
                };
                for component in &mut values {
                    component.iter_mut().for_each(|value| *value *= scale);
                }
                (row, values)
            })
            .collect()
    }
}

impl SynthesisRow for PointRow {
    fn add_order(&mut self, rec: &OrderRecursion, tables: &LegendreTables, c: &[f64], s: &[f64]) {
        let m = rec.m();
        let len = c.len();
        let (t, u, r) = (self.t, self.u, self.r);
        match &mut self.state {
            State::Pole(sums) => sums.add_order(m, c, s, &self.rpow, r),
            State::Regular(regular) => {
                regular.sectorial.advance_to(m, tables);
                let pmm = regular.sectorial.value();
                if regular.derived.is_empty() {
                    fill_column(rec, t, pmm, &mut regular.column[..len]);
                } else {
                    fill_column_with_derivatives(
                        rec,
                        t,
                        pmm,
                        &mut regular.column[..len],
                        &mut regular.dq1[..len],
                        &mut regular.dq2[..len],
                    );
                    let Regular {
                        column,
                        dq1,
                        dq2,
                        derived,
                        ..
                    } = &mut *regular;
                    for (lat, values) in derived.iter_mut() {
                        for k in 0..len {
                            values[k] = lat.evaluate(m, t, u, column[k], dq1[k], dq2[k]);
                        }
                    }
                }
                for fourier in regular.fourier.iter_mut() {
                    let legendre = regular
                        .derived
                        .iter()
                        .find(|(lat, _)| *lat == fourier.lat)
                        .map_or(&regular.column[..], |(_, values)| &values[..]);
                    let mut a = [0.0; 2];
                    let mut b = [0.0; 2];
                    for k in 0..len {
                        let n = m + k;
                        let f = self.rpow[n] * radial_factor(n, fourier.dr, r) * legendre[k];
                        a[k % 2] += f * c[k];
                        b[k % 2] += f * s[k];
                    }
                    for p in 0..2 {
                        fourier.a[p][m] = a[p];
                        fourier.b[p][m] = b[p];
                    }
                }
            }
        }
    }
}
