//! Spherical harmonic synthesis.
//!
//! Every entry point follows the same path: validate the inputs, build one
//! row state per latitude row (pairing equatorially symmetric rows), feed the
//! rows order by order through the coefficient sweep, then turn the
//! accumulated Fourier coefficients of each row into values along its
//! longitudes.
//!
//! Output layout is row-major over local rows: `row_width()` values per local
//! row, local rows in the order of the descriptor.

mod cell;
mod isurf;
mod point;
mod pole;

pub use isurf::cell_isurf;

use crate::common::constants::MAX_DERIVATIVE_ORDER;
use crate::domain::{HarmError, HarmResult};
use crate::modules::comm::agree;
use crate::modules::crd::{CellSet, PointSet};
use crate::modules::session::Session;
use crate::modules::shc::Shc;
use crate::modules::sweep::Sweep;
use crate::numerics::RowTransform;
use cell::CellRow;
use point::PointRow;
use rayon::prelude::*;
use tracing::debug;

/// Orders of a general derivative: `dr` radial, `dlat` latitudinal and
/// `dlon` longitudinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Derivatives {
    pub dr: usize,
    pub dlat: usize,
    pub dlon: usize,
}

impl Derivatives {
    pub const VALUE: Self = Self::new(0, 0, 0);

    pub const fn new(dr: usize, dlat: usize, dlon: usize) -> Self {
        Self { dr, dlat, dlon }
    }

    pub const fn total(self) -> usize {
        self.dr + self.dlat + self.dlon
    }

    fn validate(self) -> HarmResult<()> {
        let Self { dr, dlat, dlon } = self;
        if dr > MAX_DERIVATIVE_ORDER
            || dlat > MAX_DERIVATIVE_ORDER
            || dlon > MAX_DERIVATIVE_ORDER
            || self.total() > MAX_DERIVATIVE_ORDER
        {
            return Err(HarmError::invalid_argument(
                "INPUT.DERIVATIVE_ORDER",
                format!(
                    "derivative orders ({dr}, {dlat}, {dlon}) must each be at most \
                     {MAX_DERIVATIVE_ORDER} and sum to at most {MAX_DERIVATIVE_ORDER}"
                ),
            ));
        }
        Ok(())
    }
}

/// Latitude factor of a synthesis term, evaluated per order from `P̄nm` and
/// the polynomial derivatives of [`fill_column_with_derivatives`].
///
/// [`fill_column_with_derivatives`]: crate::modules::leg::fill_column_with_derivatives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Latitude {
    /// `P̄nm`
    Value,
    /// `dP̄nm/dlat`
    First,
    /// `d²P̄nm/dlat²`
    Second,
    /// `dP̄nm/dlat + tan(lat) P̄nm`, the latitude part of `xy`.
    Twist,
    /// `-tan(lat) dP̄nm/dlat - m² P̄nm / cos²(lat)`, the latitude part of `yy`.
    Lateral,
}

impl Latitude {
    const fn from_order(dlat: usize) -> Self {
        match dlat {
            0 => Self::Value,
            1 => Self::First,
            _ => Self::Second,
        }
    }

    /// Powers of `1/r` carried on top of those of the longitude derivatives.
    pub(crate) const fn r_power(self) -> usize {
        match self {
            Self::Value => 0,
            Self::First | Self::Twist => 1,
            Self::Second | Self::Lateral => 2,
        }
    }

    /// True when the factor changes sign with `lat` relative to `P̄nm`.
    pub(crate) const fn is_odd(self) -> bool {
        matches!(self, Self::First | Self::Twist)
    }

    /// Evaluates the factor of order `m` at `t = sin(lat)`, `u = cos(lat)`
    /// from `p = P̄nm`, `dq1 = P̄mm q'_n` and `dq2 = P̄mm q''_n`. Only `p` is
    /// divided by powers of `u`, and `p` carries `u^m`.
    pub(crate) fn evaluate(self, m: usize, t: f64, u: f64, p: f64, dq1: f64, dq2: f64) -> f64 {
        let mf = m as f64;
        match self {
            Self::Value => p,
            Self::First => -mf * t * p / u + u * dq1,
            Self::Second => {
                let sectorial = -mf + mf * (mf - 1.0) * t * t / (u * u);
                sectorial * p - (2.0 * mf + 1.0) * t * dq1 + u * u * dq2
            }
            Self::Twist => -(mf - 1.0) * t * p / u + u * dq1,
            Self::Lateral => -mf * (mf - 1.0) * p / (u * u) - mf * p - t * dq1,
        }
    }
}

/// One radial/latitude/longitude combination a quantity is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Term {
    pub dr: usize,
    pub lat: Latitude,
    pub dlon: usize,
}

impl Term {
    pub(crate) const fn new(dr: usize, lat: Latitude, dlon: usize) -> Self {
        Self { dr, lat, dlon }
    }
}

impl From<Derivatives> for Term {
    fn from(d: Derivatives) -> Self {
        Self::new(d.dr, Latitude::from_order(d.dlat), d.dlon)
    }
}

/// What a point synthesis evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantity {
    Value,
    /// `(x, y, z)` in the local north-oriented frame.
    Grad1,
    /// `(xx, xy, xz, yy, yz, zz)`.
    Grad2,
    Guru(Derivatives),
}

impl Quantity {
    /// Terms the quantity is combined from.
    pub(crate) fn terms(self) -> Vec<Term> {
        use Latitude::{First, Lateral, Second, Twist, Value};
        let d = |dr, dlat, dlon| Term::from(Derivatives::new(dr, dlat, dlon));
        match self {
            Self::Value => vec![d(0, 0, 0)],
            Self::Grad1 => vec![d(0, 1, 0), d(0, 0, 1), d(1, 0, 0)],
            Self::Grad2 => vec![
                Term::new(1, Value, 0),
                Term::new(2, Value, 0),
                Term::new(0, First, 0),
                Term::new(0, Second, 0),
                Term::new(0, Value, 1),
                Term::new(0, Twist, 1),
                Term::new(0, Lateral, 0),
                Term::new(1, First, 0),
                Term::new(1, Value, 1),
            ],
            Self::Guru(derivatives) => vec![Term::from(derivatives)],
        }
    }

    pub(crate) fn outputs(self) -> usize {
        match self {
            Self::Value | Self::Guru(_) => 1,
            Self::Grad1 => 3,
            Self::Grad2 => 6,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Value => "point",
            Self::Grad1 => "point_grad1",
            Self::Grad2 => "point_grad2",
            Self::Guru(_) => "point_guru",
        }
    }
}

/// `(R / r)^(n + 1)` for `n = 0..=nmax`.
pub(crate) fn radial_powers(shc_r: f64, r: f64, nmax: usize) -> Vec<f64> {
    let ratio = shc_r / r;
    let mut value = 1.0;
    (0..=nmax)
        .map(|_| {
            value *= ratio;
            value
        })
        .collect()
}

/// Factor of the `dr`-th radial derivative of `(R / r)^(n + 1)` relative to
/// the power itself.
pub(crate) fn radial_factor(n: usize, dr: usize, r: f64) -> f64 {
    let n1 = (n + 1) as f64;
    match dr {
        0 => 1.0,
        1 => -n1 / r,
        _ => n1 * (n1 + 1.0) / (r * r),
    }
}

/// Common checks of every synthesis entry point. Collective for distributed
/// sessions so that all ranks fail together.
fn check_inputs(
    session: &Session,
    what: &str,
    distributed: bool,
    shc: &Shc,
    nmax: usize,
) -> HarmResult<()> {
    let local = (|| {
        session.check_distributed(what, distributed)?;
        session.check_distributed("the coefficient store", shc.is_distributed())?;
        if nmax > shc.nmax() {
            return Err(HarmError::invalid_argument(
                "INPUT.NMAX",
                format!(
                    "synthesis degree {nmax} exceeds the coefficient store degree {}",
                    shc.nmax()
                ),
            ));
        }
        Ok(())
    })();
    if session.is_distributed() {
        agree(session.comm(), local)
    } else {
        local
    }
}

fn sweep(session: &Session, nmax: usize) -> Sweep<'_> {
    Sweep {
        comm: session.comm(),
        nmax,
        multiplier: session.config().block_nmax_multiplier,
        workers: session.config().worker_count(),
    }
}

/// Scatters per-row results into `components` row-major output arrays.
fn assemble(
    components: usize,
    nrows: usize,
    width: usize,
    rows: Vec<Vec<(usize, Vec<Vec<f64>>)>>,
) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; nrows * width]; components];
    for (row, values) in rows.into_iter().flatten() {
        for (target, source) in out.iter_mut().zip(values) {
            target[row * width..(row + 1) * width].copy_from_slice(&source);
        }
    }
    out
}

fn synthesize_points(
    points: &PointSet,
    shc: &Shc,
    nmax: usize,
    quantity: Quantity,
    session: &Session,
) -> HarmResult<Vec<Vec<f64>>> {
    let function = quantity.name();
    debug!(
        function,
        kind = points.kind().as_str(),
        nmax,
        npoint = points.npoint(),
        distributed = session.is_distributed(),
        "point synthesis"
    );
    crate::propagate!(
        check_inputs(session, "the point set", points.is_distributed(), shc, nmax),
        function
    )?;
    if let Quantity::Guru(derivatives) = quantity {
        crate::propagate!(derivatives.validate(), function)?;
    }
    let components = quantity.outputs();
    if points.is_empty() && !session.is_distributed() {
        return Ok(vec![Vec::new(); components]);
    }

    let terms = quantity.terms();
    let rows: Vec<PointRow> = points
        .row_pairs()
        .into_iter()
        .map(|pair| PointRow::new(points, pair, shc.r(), nmax, &terms))
        .collect();
    let rows = crate::propagate!(sweep(session, nmax).synthesize(shc, rows), function)?;

    let scale = shc.mu() / shc.r();
    let grid = points.kind().is_grid().then(|| {
        let lons = points.lon();
        RowTransform::new(lons, session.config().fft_tolerance(lons.len()))
    });
    let finished: Vec<Vec<(usize, Vec<Vec<f64>>)>> = rows
        .par_iter()
        .map(|row| match &grid {
            Some(transform) => row.finish(quantity, &terms, transform, scale),
            None => {
                let transform = RowTransform::new(&[points.lon()[row.index()]], None);
                row.finish(quantity, &terms, &transform, scale)
            }
        })
        .collect();
    Ok(assemble(
        components,
        points.local_nlat(),
        points.row_width(),
        finished,
    ))
}

fn take_one(mut components: Vec<Vec<f64>>) -> Vec<f64> {
    components.pop().unwrap_or_default()
}

fn take_array<const N: usize>(components: Vec<Vec<f64>>) -> [Vec<f64>; N] {
    let mut iter = components.into_iter();
    std::array::from_fn(|_| iter.next().unwrap_or_default())
}

/// Values of the series up to degree `nmax` at `points`.
pub fn point(points: &PointSet, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Vec<f64>> {
    synthesize_points(points, shc, nmax, Quantity::Value, session).map(take_one)
}

/// Gradient `(x, y, z)` in the local north-oriented frame: `x` north, `y`
/// west, `z` radially up.
pub fn point_grad1(
    points: &PointSet,
    shc: &Shc,
    nmax: usize,
    session: &Session,
) -> HarmResult<[Vec<f64>; 3]> {
    synthesize_points(points, shc, nmax, Quantity::Grad1, session).map(take_array)
}

/// Second derivatives `(xx, xy, xz, yy, yz, zz)` in the local north-oriented
/// frame.
pub fn point_grad2(
    points: &PointSet,
    shc: &Shc,
    nmax: usize,
    session: &Session,
) -> HarmResult<[Vec<f64>; 6]> {
    synthesize_points(points, shc, nmax, Quantity::Grad2, session).map(take_array)
}

/// General derivative
/// `(mu/R) r^-(dlat+dlon) sec^dlon(lat) d^(dr+dlat+dlon) V / dr^dr dlat^dlat dlon^dlon`
/// with every order at most 2 and their sum at most 2. At the poles the
/// mixed and second longitudinal derivatives are undefined and come out as
/// NaN.
pub fn point_guru(
    points: &PointSet,
    shc: &Shc,
    nmax: usize,
    derivatives: Derivatives,
    session: &Session,
) -> HarmResult<Vec<f64>> {
    synthesize_points(points, shc, nmax, Quantity::Guru(derivatives), session).map(take_one)
}

/// Mean values of the series over the cells.
pub fn cell(cells: &CellSet, shc: &Shc, nmax: usize, session: &Session) -> HarmResult<Vec<f64>> {
    debug!(
        kind = cells.kind().as_str(),
        nmax,
        ncell = cells.ncell(),
        distributed = session.is_distributed(),
        "cell synthesis"
    );
    crate::propagate!(
        check_inputs(session, "the cell set", cells.is_distributed(), shc, nmax),
        "cell"
    )?;
    if cells.ncell() == 0 && !session.is_distributed() {
        return Ok(Vec::new());
    }

    let rows: Vec<CellRow> = cells
        .row_pairs()
        .into_iter()
        .map(|pair| CellRow::new(cells, pair, shc.r(), nmax))
        .collect();
    let rows = crate::propagate!(sweep(session, nmax).synthesize(shc, rows), "cell")?;

    let scale = shc.mu() / shc.r();
    let columns = cell::Columns::new(cells, session);
    let finished: Vec<Vec<(usize, Vec<Vec<f64>>)>> = rows
        .par_iter()
        .map(|row| row.finish(cells, &columns, scale))
        .collect();
    Ok(take_one(assemble(
        1,
        cells.local_nlat(),
        cells.row_width(),
        finished,
    )))
}
