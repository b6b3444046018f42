//! Cell means of a potential evaluated on an irregular surface.
//!
//! The surface is itself a spherical harmonic series `r(Ω)` on the unit
//! sphere. Each radial factor `(R / r(Ω))^(n1 + 1)` is expanded into a series
//! of degree `nmax3` by quadrature on a Gauss-Legendre grid of degree
//! `nmax4`, after which the cell mean is a sum of integrals of products of
//! two spherical harmonics over the cell.

use crate::common::constants::PI_2;
use crate::domain::{HarmError, HarmResult};
use crate::modules::crd::{CellKind, CellSet, PointSet};
use crate::modules::integ::{cc, cs, pn1m1pn2m2, sc, ss};
use crate::modules::leg::{Pnmj, PnmjOrdering};
use crate::modules::session::Session;
use crate::modules::sha;
use crate::modules::shc::Shc;
use rayon::prelude::*;
use tracing::debug;

#[allow(clippy::too_many_arguments)]
fn check_isurf(
    cells: &CellSet,
    shc1: &Shc,
    nmax1: usize,
    shc2: &Shc,
    nmax2: usize,
    nmax3: usize,
    nmax4: usize,
    session: &Session,
) -> HarmResult<()> {
    if session.is_distributed()
        || cells.is_distributed()
        || shc1.is_distributed()
        || shc2.is_distributed()
    {
        return Err(HarmError::distributed(
            "MPI.ISURF",
            "irregular-surface cell synthesis is available for non-distributed sessions only",
        ));
    }
    if cells.kind() != CellKind::Grid {
        return Err(HarmError::invalid_argument(
            "INPUT.ISURF_CELLS",
            "irregular-surface cell synthesis requires a cell grid",
        ));
    }
    if shc2.mu() != 1.0 || shc2.r() != 1.0 {
        return Err(HarmError::invalid_argument(
            "INPUT.ISURF_SHAPE",
            format!(
                "surface coefficients must be scaled to mu = 1 and R = 1, got mu = {} and R = {}",
                shc2.mu(),
                shc2.r()
            ),
        ));
    }
    for (label, nmax, store) in [("nmax1", nmax1, shc1.nmax()), ("nmax2", nmax2, shc2.nmax())] {
        if nmax > store {
            return Err(HarmError::invalid_argument(
                "INPUT.NMAX",
                format!("{label} = {nmax} exceeds the coefficient store degree {store}"),
            ));
        }
    }
    if nmax3 > nmax4 {
        return Err(HarmError::invalid_argument(
            "INPUT.ISURF_NMAX",
            format!("nmax3 = {nmax3} must not exceed the quadrature degree nmax4 = {nmax4}"),
        ));
    }
    Ok(())
}

/// Longitude integral `∫ trig(m1 λ) trig(m3 λ) dλ` over one column.
fn longitude(
    integral: fn(f64, f64, f64, f64, &mut [f64]),
    lon1: f64,
    lon2: f64,
    m1: usize,
    m3: usize,
) -> f64 {
    let mut out = [0.0];
    integral(lon1, lon2 - lon1, m1 as f64, m3 as f64, &mut out);
    out[0]
}

/// Mean values over `cells` of the potential `shc1` (up to `nmax1`) on the
/// surface `r = shc2` (up to `nmax2`). `nmax3` is the degree of the
/// expansion of the radial factors, `nmax4` the degree of the quadrature
/// grid used to build it.
#[allow(clippy::too_many_arguments)]
pub fn cell_isurf(
    cells: &CellSet,
    shc1: &Shc,
    nmax1: usize,
    shc2: &Shc,
    nmax2: usize,
    nmax3: usize,
    nmax4: usize,
    session: &Session,
) -> HarmResult<Vec<f64>> {
    debug!(nmax1, nmax2, nmax3, nmax4, ncell = cells.ncell(), "irregular-surface cell synthesis");
    crate::propagate!(
        check_isurf(cells, shc1, nmax1, shc2, nmax2, nmax3, nmax4, session),
        "cell_isurf"
    )?;
    if cells.ncell() == 0 {
        return Ok(Vec::new());
    }

    let grid = crate::propagate!(PointSet::gl(nmax4, 1.0), "cell_isurf")?;
    let rsurf = crate::propagate!(super::point(&grid, shc2, nmax2, session), "cell_isurf")?;
    if let Some(bad) = rsurf.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
        return Err(HarmError::invalid_argument(
            "INPUT.ISURF_SHAPE",
            format!("surface radius {bad} is not positive"),
        ));
    }

    let mut power = vec![1.0; rsurf.len()];
    let mut factors = Vec::with_capacity(nmax1 + 1);
    for _ in 0..=nmax1 {
        for (value, r) in power.iter_mut().zip(&rsurf) {
            *value *= shc1.r() / r;
        }
        factors.push(crate::propagate!(
            sha::point(&grid, &power, nmax3, 1.0, 1.0, session),
            "cell_isurf"
        )?);
    }

    let pnmj = Pnmj::new(nmax1.max(nmax3), PnmjOrdering::Mnj);
    let scale = shc1.mu() / shc1.r();
    let width = cells.row_width();
    let rows: Vec<Vec<f64>> = (0..cells.local_nlat())
        .into_par_iter()
        .map(|row| -> HarmResult<Vec<f64>> {
            let (latmin, latmax) = (cells.latmin()[row], cells.latmax()[row]);
            let (cltmin, cltmax) = (PI_2 - latmax, PI_2 - latmin);
            // [cc, cs, sc, ss] lumped over degrees for each (m1, m3)
            let mut lumps = vec![[0.0; 4]; (nmax1 + 1) * (nmax3 + 1)];
            for m1 in 0..=nmax1 {
                for n1 in m1..=nmax1 {
                    let (c1, s1) = shc1.coeffs(n1, m1).unwrap_or((0.0, 0.0));
                    if c1 == 0.0 && s1 == 0.0 {
                        continue;
                    }
                    for m3 in 0..=nmax3 {
                        let lump = &mut lumps[m1 * (nmax3 + 1) + m3];
                        for n3 in m3..=nmax3 {
                            let (c3, s3) = factors[n1].coeffs(n3, m3).unwrap_or((0.0, 0.0));
                            let p = pn1m1pn2m2(cltmin, cltmax, n1, m1, n3, m3, &pnmj)?;
                            lump[0] += p * c1 * c3;
                            lump[1] += p * c1 * s3;
                            lump[2] += p * s1 * c3;
                            lump[3] += p * s1 * s3;
                        }
                    }
                }
            }
            let band = latmax.sin() - latmin.sin();
            Ok((0..width)
                .map(|col| {
                    let (lon1, lon2) = cells.lon_bounds(row, col);
                    let mut sum = 0.0;
                    for m1 in 0..=nmax1 {
                        for m3 in 0..=nmax3 {
                            let [lcc, lcs, lsc, lss] = lumps[m1 * (nmax3 + 1) + m3];
                            sum += lcc * longitude(cc, lon1, lon2, m1, m3)
                                + lcs * longitude(cs, lon1, lon2, m1, m3)
                                + lsc * longitude(sc, lon1, lon2, m1, m3)
                                + lss * longitude(ss, lon1, lon2, m1, m3);
                        }
                    }
                    scale * sum / ((lon2 - lon1) * band)
                })
                .collect())
        })
        .collect::<HarmResult<_>>()?;
    Ok(rows.concat())
}
