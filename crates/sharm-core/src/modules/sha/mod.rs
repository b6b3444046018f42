//! Spherical harmonic analysis.
//!
//! Quadrature grids (Gauss-Legendre, Driscoll-Healy) give exact coefficients
//! up to the degree they resolve; global cell grids give approximate ones;
//! any other point set goes through least squares. Values use the row-major
//! layout of the synthesis output.

mod lsq;
mod rows;

pub use lsq::point_lsq;

use crate::common::constants::{PI_2, PI2};
use crate::domain::{HarmError, HarmResult};
use crate::modules::comm::agree;
use crate::modules::crd::{CellKind, CellSet, PointSet};
use crate::modules::session::Session;
use crate::modules::shc::{Shc, distribute_orders};
use crate::modules::sweep::Sweep;
use crate::numerics::{RowTransform, within_tolerance};
use rows::{CellAnalysisRow, QuadratureRow};
use tracing::debug;

fn sweep(session: &Session, nmax: usize) -> Sweep<'_> {
    Sweep {
        comm: session.comm(),
        nmax,
        multiplier: session.config().block_nmax_multiplier,
        workers: session.config().worker_count(),
    }
}

fn check_common(
    session: &Session,
    what: &str,
    distributed: bool,
    npoint: usize,
    values: &[f64],
    shc: &Shc,
    nmax: usize,
) -> HarmResult<()> {
    session.check_distributed(what, distributed)?;
    session.check_distributed("the coefficient store", shc.is_distributed())?;
    if nmax > shc.nmax() {
        return Err(HarmError::invalid_argument(
            "INPUT.NMAX",
            format!(
                "analysis degree {nmax} exceeds the coefficient store degree {}",
                shc.nmax()
            ),
        ));
    }
    if values.len() != npoint {
        return Err(HarmError::invalid_argument(
            "INPUT.SHA_VALUES",
            format!("expected {npoint} values, got {}", values.len()),
        ));
    }
    if let Some(bad) = values.iter().find(|value| !value.is_finite()) {
        return Err(HarmError::invalid_argument(
            "INPUT.SHA_VALUES",
            format!("input value {bad} is not finite"),
        ));
    }
    Ok(())
}

fn agreed<T>(session: &Session, local: HarmResult<T>) -> HarmResult<T> {
    if session.is_distributed() {
        agree(session.comm(), local)
    } else {
        local
    }
}

/// Empty store matching the session: local, or distributed over the ranks
/// of the session with one order chunk each.
fn new_store(nmax: usize, mu: f64, r: f64, session: &Session) -> HarmResult<Shc> {
    match session.shared_comm() {
        None => Shc::calloc(nmax, mu, r),
        Some(comm) => {
            let chunks = distribute_orders(nmax, comm.rank(), comm.size(), 1);
            Shc::calloc_distributed(nmax, mu, r, &chunks, comm.clone())
        }
    }
}

/// Coefficients up to `nmax` of values given on a quadrature grid, written
/// into `shc` (previous contents are discarded). The scaling of `shc`
/// determines the scaling of the coefficients. Collective for distributed
/// sessions.
pub fn point_into(
    points: &PointSet,
    values: &[f64],
    nmax: usize,
    shc: &mut Shc,
    session: &Session,
) -> HarmResult<()> {
    debug!(
        kind = points.kind().as_str(),
        nmax,
        npoint = points.npoint(),
        distributed = session.is_distributed(),
        "point analysis"
    );
    let local = check_common(
        session,
        "the point set",
        points.is_distributed(),
        points.npoint(),
        values,
        shc,
        nmax,
    )
    .and_then(|()| match points.quadrature_nmax() {
        Some(resolved) if nmax <= resolved => Ok(()),
        Some(resolved) => Err(HarmError::invalid_argument(
            "INPUT.SHA_NMAX",
            format!("the grid resolves degree {resolved}, analysis up to {nmax} requested"),
        )),
        None => Err(HarmError::invalid_argument(
            "INPUT.SHA_POINTS",
            format!(
                "quadrature analysis needs a Gauss-Legendre or Driscoll-Healy grid, got {}; \
                 use point_lsq for other point sets",
                points.kind().as_str()
            ),
        )),
    });
    crate::propagate!(agreed(session, local), "sha::point")?;
    shc.reset_coeffs();

    let transform = RowTransform::new(points.lon(), session.config().fft_tolerance(points.nlon()));
    let (mu, shc_r) = (shc.mu(), shc.r());
    let rows: Vec<QuadratureRow> = points
        .row_pairs()
        .into_iter()
        .map(|pair| QuadratureRow::new(points, values, pair, &transform, nmax, mu, shc_r))
        .collect();
    crate::propagate!(sweep(session, nmax).analyze(shc, rows), "sha::point")
}

/// Coefficients up to `nmax` of values on a quadrature grid, scaled to `mu`
/// and `r`. A distributed session returns a store distributed over its
/// ranks.
pub fn point(
    points: &PointSet,
    values: &[f64],
    nmax: usize,
    mu: f64,
    r: f64,
    session: &Session,
) -> HarmResult<Shc> {
    let mut shc = crate::propagate!(new_store(nmax, mu, r, session), "sha::point")?;
    point_into(points, values, nmax, &mut shc, session)?;
    Ok(shc)
}

/// Checks the global cell grid layout: contiguous bands from the north pole
/// to the south pole and equally wide, contiguous columns closing the circle.
/// Returns the column width.
fn check_global_cells(cells: &CellSet, nmax: usize, tolerance: f64) -> HarmResult<f64> {
    let fail = |reason: String| Err(HarmError::invalid_argument("INPUT.SHA_CELLS", reason));
    let close = |a: f64, b: f64| within_tolerance(a, b, tolerance, tolerance, 1.0);
    if cells.kind() != CellKind::Grid {
        return fail("approximate cell analysis needs a cell grid".to_string());
    }
    if cells.nlat() <= nmax || cells.nlon() <= 2 * nmax {
        return fail(format!(
            "a {}x{} cell grid cannot resolve degree {nmax}",
            cells.nlat(),
            cells.nlon()
        ));
    }
    let (latmin, latmax) = (cells.latmin(), cells.latmax());
    let rows = cells.rows();
    if rows.local_0_start == 0 && !close(latmax[0], PI_2) {
        return fail(format!(
            "the first cell row must start at the north pole, got {}",
            latmax[0]
        ));
    }
    if rows.local_0_start + rows.local_nlat == cells.nlat() && rows.local_nlat > 0 {
        let last = latmin[rows.local_nlat - 1];
        if !close(last, -PI_2) {
            return fail(format!("the last cell row must end at the south pole, got {last}"));
        }
    }
    if let Some(row) = (1..latmin.len()).find(|&i| !close(latmin[i - 1], latmax[i])) {
        return fail(format!("cell rows {} and {} are not contiguous", row - 1, row));
    }

    let (lonmin, lonmax) = (cells.lonmin(), cells.lonmax());
    let width = PI2 / cells.nlon() as f64;
    for (j, (lo, hi)) in lonmin.iter().zip(lonmax).enumerate() {
        if !close(hi - lo, width) {
            return fail(format!("cell column {j} is not {width} wide"));
        }
        if j > 0 && !close(*lo, lonmax[j - 1]) {
            return fail(format!("cell columns {} and {j} are not contiguous", j - 1));
        }
    }
    Ok(width)
}

/// Approximate coefficients of cell mean values on a global cell grid,
/// written into `shc`. Mean values are treated as point values integrated
/// over each cell, so the result is not exact for any band-limited field.
pub fn cell_into(
    cells: &CellSet,
    values: &[f64],
    nmax: usize,
    shc: &mut Shc,
    session: &Session,
) -> HarmResult<()> {
    debug!(
        nmax,
        ncell = cells.ncell(),
        distributed = session.is_distributed(),
        "approximate cell analysis"
    );
    let tolerance = session.config().threshold2;
    let local = check_common(
        session,
        "the cell set",
        cells.is_distributed(),
        cells.ncell(),
        values,
        shc,
        nmax,
    )
    .and_then(|()| check_global_cells(cells, nmax, tolerance));
    let width = crate::propagate!(agreed(session, local), "sha::cell")?;
    shc.reset_coeffs();

    let centres: Vec<f64> = cells.lonmin().iter().map(|lo| lo + 0.5 * width).collect();
    let transform = RowTransform::new(&centres, session.config().fft_tolerance(centres.len()));
    let (mu, shc_r) = (shc.mu(), shc.r());
    let rows: Vec<CellAnalysisRow> = cells
        .row_pairs()
        .into_iter()
        .map(|pair| CellAnalysisRow::new(cells, values, pair, &transform, width, nmax, mu, shc_r))
        .collect();
    crate::propagate!(sweep(session, nmax).analyze(shc, rows), "sha::cell")
}

/// Approximate coefficients of cell mean values, scaled to `mu` and `r`.
pub fn cell(
    cells: &CellSet,
    values: &[f64],
    nmax: usize,
    mu: f64,
    r: f64,
    session: &Session,
) -> HarmResult<Shc> {
    let mut shc = crate::propagate!(new_store(nmax, mu, r, session), "sha::cell")?;
    cell_into(cells, values, nmax, &mut shc, session)?;
    Ok(shc)
}
