//! Evaluation locations: points (scattered, custom grids, quadrature grids)
//! and cells (scattered, custom grids).
//!
//! Latitudes and longitudes are in radians, radii in the units of the
//! coefficients' reference radius. Grid rows are ordered north to south for
//! the quadrature grids; custom grids keep the caller's order.
//!
//! A distributed descriptor holds only a latitude chunk. Quadrature chunks
//! are described by the first row of their northern band (`local_0_start`)
//! and their local row count; the chunk holds the northern band followed by
//! its southern mirror. Custom grids and scattered sets hold the contiguous
//! global rows `local_0_start..local_0_start + local_nlat`.

use super::comm::{SharedCommunicator, agree, check_all_equal};
use crate::common::constants::{GL_NEWTON_MAX_ITER, GL_NEWTON_TOLERANCE, PI, PI_2, PI2};
use crate::domain::{HarmError, HarmResult};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Scattered,
    Grid,
    GaussLegendre,
    DriscollHealy1,
    DriscollHealy2,
}

impl PointKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scattered => "scattered",
            Self::Grid => "grid",
            Self::GaussLegendre => "gl",
            Self::DriscollHealy1 => "dh1",
            Self::DriscollHealy2 => "dh2",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [
            Self::Scattered,
            Self::Grid,
            Self::GaussLegendre,
            Self::DriscollHealy1,
            Self::DriscollHealy2,
        ]
        .into_iter()
        .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }

    pub const fn is_grid(self) -> bool {
        !matches!(self, Self::Scattered)
    }

    pub const fn is_quadrature(self) -> bool {
        matches!(
            self,
            Self::GaussLegendre | Self::DriscollHealy1 | Self::DriscollHealy2
        )
    }

    const fn is_driscoll_healy(self) -> bool {
        matches!(self, Self::DriscollHealy1 | Self::DriscollHealy2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Scattered,
    Grid,
}

impl CellKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scattered => "scattered",
            Self::Grid => "grid",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CrdError {
    #[error("{what}: expected {expected} values, got {actual}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("spherical radius must be positive and finite, got {0}")]
    Radius(f64),
    #[error("non-finite {what} at index {index}")]
    NonFinite { what: &'static str, index: usize },
    #[error("cell {axis} bounds at index {index} must satisfy min < max")]
    CellBounds { axis: &'static str, index: usize },
    #[error("at least one cell is required")]
    NoCells,
    #[error("{0}")]
    Chunk(String),
    #[error("Gauss-Legendre node {0} did not converge")]
    GaussLegendreNode(usize),
    #[error("{0} grids are not quadrature grids")]
    NotQuadrature(&'static str),
}

impl From<CrdError> for HarmError {
    fn from(error: CrdError) -> Self {
        let code = match error {
            CrdError::Length { .. } => "INPUT.CRD_SHAPE",
            CrdError::Radius(_) => "INPUT.CRD_RADIUS",
            CrdError::NonFinite { .. } => "INPUT.CRD_VALUE",
            CrdError::CellBounds { .. } | CrdError::NoCells => "INPUT.CRD_CELL",
            CrdError::Chunk(_) => "INPUT.CRD_CHUNK",
            CrdError::GaussLegendreNode(_) => "INPUT.CRD_GL",
            CrdError::NotQuadrature(_) => "INPUT.CRD_KIND",
        };
        HarmError::invalid_argument(code, error.to_string())
    }
}

/// Latitude rows held locally: global rows
/// `local_0_start..local_0_start + local_nlat` for custom grids and scattered
/// sets, the northern band starting at `local_0_start` plus its mirror for
/// quadrature grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowChunk {
    pub local_0_start: usize,
    pub local_nlat: usize,
}

/// A latitude row and, when the descriptor is equatorially symmetric there,
/// the row holding its negative latitude at the same radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPair {
    pub row: usize,
    pub mirror: Option<usize>,
}

/// `(nlat, nlon)` of the Gauss-Legendre grid resolving degree `nmax`.
pub const fn gl_shape(nmax: usize) -> (usize, usize) {
    (nmax + 1, 2 * nmax + 2)
}

/// `(nlat, nlon)` of the Driscoll-Healy grid of type 1 (`2L x 2L`).
pub const fn dh1_shape(nmax: usize) -> (usize, usize) {
    (2 * nmax + 2, 2 * nmax + 2)
}

/// `(nlat, nlon)` of the Driscoll-Healy grid of type 2 (`2L x 4L`).
pub const fn dh2_shape(nmax: usize) -> (usize, usize) {
    (2 * nmax + 2, 4 * nmax + 4)
}

pub fn quadrature_shape(kind: PointKind, nmax: usize) -> Option<(usize, usize)> {
    match kind {
        PointKind::GaussLegendre => Some(gl_shape(nmax)),
        PointKind::DriscollHealy1 => Some(dh1_shape(nmax)),
        PointKind::DriscollHealy2 => Some(dh2_shape(nmax)),
        PointKind::Scattered | PointKind::Grid => None,
    }
}

/// Maximum degree resolved by a quadrature grid with `nlat` latitudes.
pub fn nmax_from_nlat(kind: PointKind, nlat: usize) -> Option<usize> {
    match kind {
        PointKind::GaussLegendre => nlat.checked_sub(1),
        PointKind::DriscollHealy1 | PointKind::DriscollHealy2 => {
            nlat.checked_sub(2).map(|value| value / 2)
        }
        PointKind::Scattered | PointKind::Grid => None,
    }
}

/// Row of the zero latitude of a quadrature grid, if it has one.
pub fn equator_index(kind: PointKind, nmax: usize) -> Option<usize> {
    let (nlat, _) = quadrature_shape(kind, nmax)?;
    if kind == PointKind::GaussLegendre && nmax % 2 == 1 {
        return None;
    }
    Some(nlat / 2)
}

/// Rows of the northern band (equator included) of a full quadrature grid.
fn nlat_north(kind: PointKind, nlat: usize) -> usize {
    if kind.is_driscoll_healy() {
        nlat / 2 + 1
    } else {
        nlat.div_ceil(2)
    }
}

/// Number of northern-band rows of a quadrature chunk, validating the chunk.
pub fn local_nlat_north(kind: PointKind, nmax: usize, chunk: RowChunk) -> Result<usize, CrdError> {
    let (nlat, _) = quadrature_shape(kind, nmax).ok_or(CrdError::NotQuadrature(kind.as_str()))?;
    let RowChunk {
        local_0_start,
        local_nlat,
    } = chunk;
    if local_nlat > nlat {
        return Err(CrdError::Chunk(format!(
            "local_nlat = {local_nlat} cannot exceed the number of latitudes {nlat}"
        )));
    }
    let full_north = nlat_north(kind, nlat);
    if local_0_start == 0 && local_nlat == nlat {
        return Ok(full_north);
    }

    let odd = local_nlat % 2 == 1;
    let mut north = local_nlat / 2;
    let equator = nlat / 2;
    let misplaced_equator = || {
        CrdError::Chunk(format!(
            "chunk local_0_start = {local_0_start}, local_nlat = {local_nlat}: a chunk with an \
             odd row count must end at the equator (row {equator}), not at row {}",
            local_0_start + local_nlat / 2
        ))
    };
    if kind == PointKind::GaussLegendre {
        if nmax % 2 == 1 {
            if odd {
                return Err(CrdError::Chunk(format!(
                    "for odd nmax = {nmax}, local_nlat = {local_nlat} must be even"
                )));
            }
        } else if odd {
            if local_0_start + local_nlat / 2 != nmax / 2 {
                return Err(misplaced_equator());
            }
            north += 1;
        }
    } else {
        if local_0_start == 0 && local_nlat > 0 && !odd {
            return Err(CrdError::Chunk(format!(
                "a chunk starting at the north pole needs an odd local_nlat, got {local_nlat}"
            )));
        }
        if odd && local_0_start != 0 && local_0_start + local_nlat / 2 != equator {
            return Err(misplaced_equator());
        }
        if odd {
            north += 1;
        }
    }
    if local_nlat > 0 && local_0_start + north > full_north {
        return Err(CrdError::Chunk(format!(
            "chunk local_0_start = {local_0_start}, local_nlat = {local_nlat} reaches beyond \
             the {nlat} latitudes of the grid"
        )));
    }
    Ok(north)
}

fn check_radius(r: f64) -> Result<(), CrdError> {
    if r.is_finite() && r > 0.0 {
        Ok(())
    } else {
        Err(CrdError::Radius(r))
    }
}

fn check_finite(what: &'static str, values: &[f64]) -> Result<(), CrdError> {
    match values.iter().position(|value| !value.is_finite()) {
        Some(index) => Err(CrdError::NonFinite { what, index }),
        None => Ok(()),
    }
}

fn check_len(what: &'static str, values: &[f64], expected: usize) -> Result<(), CrdError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(CrdError::Length {
            what,
            expected,
            actual: values.len(),
        })
    }
}

fn check_radii(r: &[f64]) -> Result<(), CrdError> {
    r.iter().try_for_each(|value| check_radius(*value))
}

/// Gauss-Legendre node `i` (counted from the north) as `(cos colatitude, weight)`.
fn gl_node(i: usize, nlat: usize) -> Result<(f64, f64), CrdError> {
    let l = nlat as f64;
    let mut z = (PI * ((i + 1) as f64 - 0.25) / (l + 0.5)).cos();
    for _ in 0..GL_NEWTON_MAX_ITER {
        let (mut p1, mut p2) = (1.0, 0.0);
        for j in 1..=nlat {
            let p3 = p2;
            p2 = p1;
            p1 = ((2 * j - 1) as f64 * z * p2 - (j - 1) as f64 * p3) / j as f64;
        }
        let derivative = l * (z * p1 - p2) / (z * z - 1.0);
        let previous = z;
        z -= p1 / derivative;
        if (z - previous).abs() <= GL_NEWTON_TOLERANCE {
            if !z.is_finite() {
                break;
            }
            return Ok((z, 2.0 / ((1.0 - z * z) * derivative * derivative)));
        }
    }
    Err(CrdError::GaussLegendreNode(i))
}

/// Driscoll-Healy weight at colatitude `theta` for `L = nmax + 1`.
fn dh_weight(theta: f64, nmax: usize) -> f64 {
    let l = nmax + 1;
    let c = 2.0 / l as f64;
    let sine = theta.sin();
    if nmax == 0 {
        return c * sine;
    }
    // sin((2k + 1) theta) by the Chebyshev recurrence.
    let two_cos = 2.0 * theta.cos();
    let (mut s0, mut s1) = (0.0, sine);
    let mut sum = sine;
    for k in 1..l {
        let s2 = two_cos * s1 - s0;
        s0 = s1;
        s1 = s2;
        let s2 = two_cos * s1 - s0;
        sum += s2 / (2 * k + 1) as f64;
        s0 = s1;
        s1 = s2;
    }
    c * sine * sum
}

/// Latitudes and weights of a quadrature chunk in local row order.
fn quadrature_rows(
    kind: PointKind,
    nmax: usize,
    chunk: RowChunk,
    north: usize,
) -> Result<(Vec<f64>, Vec<f64>), CrdError> {
    let (nlat, _) = quadrature_shape(kind, nmax).ok_or(CrdError::NotQuadrature(kind.as_str()))?;
    let RowChunk {
        local_0_start,
        local_nlat,
    } = chunk;
    let equator = equator_index(kind, nmax);

    // (global north row, latitude, weight)
    let band: Vec<(usize, f64, f64)> = (local_0_start..local_0_start + north)
        .into_par_iter()
        .map(|i| {
            if kind == PointKind::GaussLegendre {
                let (z, w) = gl_node(i, nlat)?;
                let lat = if Some(i) == equator { 0.0 } else { z.asin() };
                Ok((i, lat, w))
            } else {
                let theta = PI / (2.0 * (nmax + 1) as f64) * i as f64;
                let lat = if Some(i) == equator { 0.0 } else { PI_2 - theta };
                Ok((i, lat, dh_weight(theta, nmax)))
            }
        })
        .collect::<Result<_, CrdError>>()?;

    let mut lat = vec![0.0; local_nlat];
    let mut w = vec![0.0; local_nlat];
    let pole_shift = usize::from(kind.is_driscoll_healy() && local_0_start == 0);
    for (offset, (i, value, weight)) in band.into_iter().enumerate() {
        lat[offset] = value;
        w[offset] = weight;
        let has_mirror = Some(i) != equator && !(kind.is_driscoll_healy() && i == 0);
        if has_mirror {
            let south = local_nlat - 1 - offset + pole_shift;
            lat[south] = -value;
            w[south] = weight;
        }
    }
    Ok((lat, w))
}

/// Pairs every row `[lower, upper]` lying north of the equator with a row
/// `[-upper, -lower]` of the same radius. Points use `lower == upper`.
fn mirror_pairs(keys: &[(f64, f64)], radii: &[f64]) -> Vec<RowPair> {
    let key = |lower: f64, upper: f64, r: f64| (lower.to_bits(), upper.to_bits(), r.to_bits());
    let mut southern: HashMap<(u64, u64, u64), Vec<usize>> = HashMap::new();
    for (index, ((lower, upper), r)) in keys.iter().zip(radii).enumerate().rev() {
        if *upper < 0.0 {
            southern.entry(key(*lower, *upper, *r)).or_default().push(index);
        }
    }

    let mut mirror_of = vec![None; keys.len()];
    let mut is_mirror = vec![false; keys.len()];
    for (index, ((lower, upper), r)) in keys.iter().zip(radii).enumerate() {
        if *lower <= 0.0 {
            continue;
        }
        if let Some(mirror) = southern
            .get_mut(&key(-upper, -lower, *r))
            .and_then(|candidates| candidates.pop())
        {
            mirror_of[index] = Some(mirror);
            is_mirror[mirror] = true;
        }
    }
    (0..keys.len())
        .filter(|row| !is_mirror[*row])
        .map(|row| RowPair {
            row,
            mirror: mirror_of[row],
        })
        .collect()
}

#[derive(Clone)]
pub struct PointSet {
    kind: PointKind,
    nlat: usize,
    nlon: usize,
    lat: Vec<f64>,
    lon: Vec<f64>,
    r: Vec<f64>,
    w: Vec<f64>,
    quadrature_nmax: Option<usize>,
    rows: RowChunk,
    comm: Option<SharedCommunicator>,
}

impl fmt::Debug for PointSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointSet")
            .field("kind", &self.kind)
            .field("nlat", &self.nlat)
            .field("nlon", &self.nlon)
            .field("rows", &self.rows)
            .field("distributed", &self.is_distributed())
            .finish()
    }
}

impl PointSet {
    /// Scattered points; the three slices have one entry per point.
    pub fn scattered(lat: Vec<f64>, lon: Vec<f64>, r: Vec<f64>) -> HarmResult<Self> {
        let n = lat.len();
        check_len("longitudes", &lon, n)?;
        check_len("radii", &r, n)?;
        Self::checked(PointKind::Scattered, n, n, lat, lon, r)
    }

    /// Custom grid: `lat` and `r` per row, `lon` per column.
    pub fn grid(lat: Vec<f64>, lon: Vec<f64>, r: Vec<f64>) -> HarmResult<Self> {
        check_len("radii", &r, lat.len())?;
        let (nlat, nlon) = (lat.len(), lon.len());
        Self::checked(PointKind::Grid, nlat, nlon, lat, lon, r)
    }

    pub fn gl(nmax: usize, r: f64) -> HarmResult<Self> {
        Self::quadrature(PointKind::GaussLegendre, nmax, r)
    }

    pub fn dh1(nmax: usize, r: f64) -> HarmResult<Self> {
        Self::quadrature(PointKind::DriscollHealy1, nmax, r)
    }

    pub fn dh2(nmax: usize, r: f64) -> HarmResult<Self> {
        Self::quadrature(PointKind::DriscollHealy2, nmax, r)
    }

    /// Full quadrature grid of the given kind.
    pub fn quadrature(kind: PointKind, nmax: usize, r: f64) -> HarmResult<Self> {
        let (nlat, _) = quadrature_shape(kind, nmax).ok_or(CrdError::NotQuadrature(kind.as_str()))?;
        let set = Self::quadrature_local(
            kind,
            nmax,
            r,
            RowChunk {
                local_0_start: 0,
                local_nlat: nlat,
            },
        )?;
        tracing::debug!(kind = kind.as_str(), nmax, nlat, nlon = set.nlon, "built quadrature grid");
        Ok(set)
    }

    fn quadrature_local(kind: PointKind, nmax: usize, r: f64, chunk: RowChunk) -> HarmResult<Self> {
        check_radius(r)?;
        let (nlat, nlon) = quadrature_shape(kind, nmax).ok_or(CrdError::NotQuadrature(kind.as_str()))?;
        let north = local_nlat_north(kind, nmax, chunk)?;
        let (lat, w) = quadrature_rows(kind, nmax, chunk, north)?;
        let step = longitude_step(nlon);
        let lon = (0..nlon).map(|j| step * j as f64).collect();
        Ok(Self {
            kind,
            nlat,
            nlon,
            r: vec![r; chunk.local_nlat],
            lat,
            lon,
            w,
            quadrature_nmax: Some(nmax),
            rows: chunk,
            comm: None,
        })
    }

    /// Collective. Latitude chunk of a quadrature grid.
    pub fn quadrature_chunk(
        kind: PointKind,
        nmax: usize,
        r: f64,
        chunk: RowChunk,
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = Self::quadrature_local(kind, nmax, r, chunk);
        let mut set = crate::propagate!(agree(comm.as_ref(), local), "PointSet::quadrature_chunk")?;
        set.comm = Some(comm);
        crate::propagate!(set.check_distribution(), "PointSet::quadrature_chunk")?;
        Ok(set)
    }

    pub fn gl_chunk(nmax: usize, r: f64, chunk: RowChunk, comm: SharedCommunicator) -> HarmResult<Self> {
        Self::quadrature_chunk(PointKind::GaussLegendre, nmax, r, chunk, comm)
    }

    pub fn dh1_chunk(nmax: usize, r: f64, chunk: RowChunk, comm: SharedCommunicator) -> HarmResult<Self> {
        Self::quadrature_chunk(PointKind::DriscollHealy1, nmax, r, chunk, comm)
    }

    pub fn dh2_chunk(nmax: usize, r: f64, chunk: RowChunk, comm: SharedCommunicator) -> HarmResult<Self> {
        Self::quadrature_chunk(PointKind::DriscollHealy2, nmax, r, chunk, comm)
    }

    /// Collective. Rows `local_0_start..` of a custom grid with `nlat` rows in total.
    pub fn grid_chunk(
        lat: Vec<f64>,
        lon: Vec<f64>,
        r: Vec<f64>,
        nlat: usize,
        local_0_start: usize,
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = check_len("radii", &r, lat.len())
            .map_err(HarmError::from)
            .and_then(|()| {
                let local_nlat = lat.len();
                let nlon = lon.len();
                Self::checked(PointKind::Grid, local_nlat, nlon, lat, lon, r)
            });
        Self::distribute(local, nlat, local_0_start, comm)
    }

    /// Collective. Points `local_0_start..` of a scattered set of `npoint` points.
    pub fn scattered_chunk(
        lat: Vec<f64>,
        lon: Vec<f64>,
        r: Vec<f64>,
        npoint: usize,
        local_0_start: usize,
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = check_len("longitudes", &lon, lat.len())
            .and_then(|()| check_len("radii", &r, lat.len()))
            .map_err(HarmError::from)
            .and_then(|()| {
                let n = lat.len();
                Self::checked(PointKind::Scattered, n, n, lat, lon, r)
            });
        Self::distribute(local, npoint, local_0_start, comm)
    }

    fn distribute(
        local: HarmResult<Self>,
        nlat: usize,
        local_0_start: usize,
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let mut set = crate::propagate!(agree(comm.as_ref(), local), "PointSet::distribute")?;
        set.rows = RowChunk {
            local_0_start,
            local_nlat: set.nlat,
        };
        set.nlat = nlat;
        if set.kind == PointKind::Scattered {
            set.nlon = nlat;
        }
        set.comm = Some(comm);
        crate::propagate!(set.check_distribution(), "PointSet::distribute")?;
        Ok(set)
    }

    fn checked(
        kind: PointKind,
        nlat: usize,
        nlon: usize,
        lat: Vec<f64>,
        lon: Vec<f64>,
        r: Vec<f64>,
    ) -> HarmResult<Self> {
        check_finite("latitude", &lat)?;
        check_finite("longitude", &lon)?;
        check_radii(&r)?;
        Ok(Self {
            kind,
            nlat,
            nlon,
            lat,
            lon,
            r,
            w: Vec::new(),
            quadrature_nmax: None,
            rows: RowChunk {
                local_0_start: 0,
                local_nlat: nlat,
            },
            comm: None,
        })
    }

    pub fn kind(&self) -> PointKind {
        self.kind
    }

    /// Global number of latitudes (points for scattered sets).
    pub fn nlat(&self) -> usize {
        self.nlat
    }

    pub fn nlon(&self) -> usize {
        self.nlon
    }

    pub fn local_nlat(&self) -> usize {
        self.rows.local_nlat
    }

    pub fn local_0_start(&self) -> usize {
        self.rows.local_0_start
    }

    pub fn rows(&self) -> RowChunk {
        self.rows
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    pub fn r(&self) -> &[f64] {
        &self.r
    }

    /// Quadrature weights per local row (empty for non-quadrature sets).
    pub fn weights(&self) -> &[f64] {
        &self.w
    }

    /// Degree resolved by a quadrature grid.
    pub fn quadrature_nmax(&self) -> Option<usize> {
        self.quadrature_nmax
    }

    /// Number of locally held evaluation points.
    pub fn npoint(&self) -> usize {
        if self.kind.is_grid() {
            self.rows.local_nlat * self.nlon
        } else {
            self.rows.local_nlat
        }
    }

    /// Columns per local row of the output layout.
    pub fn row_width(&self) -> usize {
        if self.kind.is_grid() { self.nlon } else { 1 }
    }

    pub fn is_empty(&self) -> bool {
        self.npoint() == 0
    }

    pub fn is_distributed(&self) -> bool {
        self.comm.is_some()
    }

    pub fn comm(&self) -> Option<&SharedCommunicator> {
        self.comm.as_ref()
    }

    /// Local rows, paired with their equatorial mirrors where the grid is
    /// symmetric. Scattered points are never paired.
    pub fn row_pairs(&self) -> Vec<RowPair> {
        if !self.kind.is_grid() {
            return (0..self.lat.len())
                .map(|row| RowPair { row, mirror: None })
                .collect();
        }
        let keys: Vec<(f64, f64)> = self.lat.iter().map(|lat| (*lat, *lat)).collect();
        mirror_pairs(&keys, &self.r)
    }

    /// Longitude of local point `row` (scattered) or column `col` (grids).
    pub fn lon_of(&self, row: usize, col: usize) -> f64 {
        if self.kind.is_grid() { self.lon[col] } else { self.lon[row] }
    }

    /// Collective. Validates a distributed descriptor across ranks; no-op for
    /// local descriptors.
    pub fn check_distribution(&self) -> HarmResult<()> {
        let Some(comm) = &self.comm else {
            return Ok(());
        };
        let kind_tag = self.kind as u64;
        let nmax_tag = self.quadrature_nmax.map_or(u64::MAX, |nmax| nmax as u64);
        check_all_equal(
            comm.as_ref(),
            &[kind_tag, self.nlat as u64, self.nlon as u64, nmax_tag],
            "point kind, shape and quadrature degree",
        )?;
        if self.kind.is_grid() {
            let lon_bits: Vec<u64> = self.lon.iter().map(|lon| lon.to_bits()).collect();
            check_all_equal(comm.as_ref(), &lon_bits, "grid longitudes")?;
        }
        let gathered = comm.all_gather_u64(&[
            self.rows.local_0_start as u64,
            self.rows.local_nlat as u64,
        ]);
        let chunks: Vec<RowChunk> = gathered
            .chunks_exact(2)
            .map(|pair| RowChunk {
                local_0_start: pair[0] as usize,
                local_nlat: pair[1] as usize,
            })
            .collect();
        Ok(check_row_partition(
            self.kind,
            self.nlat,
            self.quadrature_nmax,
            &chunks,
        )?)
    }
}

fn longitude_step(nlon: usize) -> f64 {
    PI2 / nlon as f64
}

/// Checks that the chunks of all ranks tile the rows of the descriptor.
pub fn check_row_partition(
    kind: PointKind,
    nlat: usize,
    quadrature_nmax: Option<usize>,
    chunks: &[RowChunk],
) -> Result<(), CrdError> {
    let total: usize = chunks.iter().map(|chunk| chunk.local_nlat).sum();
    if total != nlat {
        return Err(CrdError::Chunk(format!(
            "local row counts sum to {total} over all processes, expected {nlat}"
        )));
    }
    let starts_at_zero = chunks
        .iter()
        .filter(|chunk| chunk.local_nlat > 0 && chunk.local_0_start == 0)
        .count();
    if starts_at_zero > 1 {
        return Err(CrdError::Chunk(
            "more than one process holds a chunk starting at row 0".to_string(),
        ));
    }

    // Ranges that must tile `0..span`.
    let (span, mut ranges): (usize, Vec<(usize, usize)>) = match quadrature_nmax {
        Some(nmax) if kind.is_quadrature() => {
            let mut ranges = Vec::with_capacity(chunks.len());
            for chunk in chunks.iter().filter(|chunk| chunk.local_nlat > 0) {
                let north = local_nlat_north(kind, nmax, *chunk)?;
                ranges.push((chunk.local_0_start, chunk.local_0_start + north));
            }
            (nlat_north(kind, nlat), ranges)
        }
        _ => (
            nlat,
            chunks
                .iter()
                .filter(|chunk| chunk.local_nlat > 0)
                .map(|chunk| (chunk.local_0_start, chunk.local_0_start + chunk.local_nlat))
                .collect(),
        ),
    };
    ranges.sort_unstable();
    let mut next = 0;
    for (start, end) in ranges {
        if start != next {
            return Err(CrdError::Chunk(format!(
                "latitude chunks leave a gap or overlap at row {next} (next chunk starts at {start})"
            )));
        }
        next = end;
    }
    if next != span {
        return Err(CrdError::Chunk(format!(
            "latitude chunks cover rows 0..{next}, expected 0..{span}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CellSet {
    kind: CellKind,
    nlat: usize,
    nlon: usize,
    latmin: Vec<f64>,
    latmax: Vec<f64>,
    lonmin: Vec<f64>,
    lonmax: Vec<f64>,
    r: Vec<f64>,
    rows: RowChunk,
    comm: Option<SharedCommunicator>,
}

impl fmt::Debug for CellSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSet")
            .field("kind", &self.kind)
            .field("nlat", &self.nlat)
            .field("nlon", &self.nlon)
            .field("rows", &self.rows)
            .field("distributed", &self.is_distributed())
            .finish()
    }
}

impl CellSet {
    /// Cell grid: latitude bounds and radius per row, longitude bounds per column.
    pub fn grid(
        latmin: Vec<f64>,
        latmax: Vec<f64>,
        lonmin: Vec<f64>,
        lonmax: Vec<f64>,
        r: Vec<f64>,
    ) -> HarmResult<Self> {
        Self::checked(CellKind::Grid, latmin, latmax, lonmin, lonmax, r)
    }

    /// Scattered cells; all five slices have one entry per cell.
    pub fn scattered(
        latmin: Vec<f64>,
        latmax: Vec<f64>,
        lonmin: Vec<f64>,
        lonmax: Vec<f64>,
        r: Vec<f64>,
    ) -> HarmResult<Self> {
        if latmin.len() != lonmin.len() {
            return Err(CrdError::Length {
                what: "cell longitudes (scattered cells need nlat == nlon)",
                expected: latmin.len(),
                actual: lonmin.len(),
            }
            .into());
        }
        Self::checked(CellKind::Scattered, latmin, latmax, lonmin, lonmax, r)
    }

    /// Global equal-angular cell grid, `nlat` rows from north to south and
    /// `nlon` columns starting at longitude zero.
    pub fn global_grid(nlat: usize, nlon: usize, r: f64) -> HarmResult<Self> {
        if nlat == 0 || nlon == 0 {
            return Err(CrdError::NoCells.into());
        }
        let dlat = PI / nlat as f64;
        // Southern edges are exact negatives of the northern ones.
        let edges: Vec<f64> = (0..=nlat)
            .map(|k| match (2 * k).cmp(&nlat) {
                std::cmp::Ordering::Less => PI_2 - dlat * k as f64,
                std::cmp::Ordering::Equal => 0.0,
                std::cmp::Ordering::Greater => -(PI_2 - dlat * (nlat - k) as f64),
            })
            .collect();
        let dlon = longitude_step(nlon);
        let latmax = edges[..nlat].to_vec();
        let latmin = edges[1..].to_vec();
        let lonmin: Vec<f64> = (0..nlon).map(|j| dlon * j as f64).collect();
        let lonmax: Vec<f64> = (0..nlon).map(|j| dlon * (j + 1) as f64).collect();
        Self::grid(latmin, latmax, lonmin, lonmax, vec![r; nlat])
    }

    /// Collective. Rows `local_0_start..` of a cell grid with `nlat` rows in total.
    #[allow(clippy::too_many_arguments)]
    pub fn grid_chunk(
        latmin: Vec<f64>,
        latmax: Vec<f64>,
        lonmin: Vec<f64>,
        lonmax: Vec<f64>,
        r: Vec<f64>,
        nlat: usize,
        local_0_start: usize,
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = Self::grid(latmin, latmax, lonmin, lonmax, r);
        let mut set = crate::propagate!(agree(comm.as_ref(), local), "CellSet::grid_chunk")?;
        set.rows = RowChunk {
            local_0_start,
            local_nlat: set.nlat,
        };
        set.nlat = nlat;
        set.comm = Some(comm);
        crate::propagate!(set.check_distribution(), "CellSet::grid_chunk")?;
        Ok(set)
    }

    fn checked(
        kind: CellKind,
        latmin: Vec<f64>,
        latmax: Vec<f64>,
        lonmin: Vec<f64>,
        lonmax: Vec<f64>,
        r: Vec<f64>,
    ) -> HarmResult<Self> {
        let nlat = latmin.len();
        let nlon = lonmin.len();
        if nlat == 0 || nlon == 0 {
            return Err(CrdError::NoCells.into());
        }
        check_len("maximum cell latitudes", &latmax, nlat)?;
        check_len("maximum cell longitudes", &lonmax, nlon)?;
        check_len("cell radii", &r, nlat)?;
        for (what, values) in [
            ("minimum latitude", &latmin),
            ("maximum latitude", &latmax),
            ("minimum longitude", &lonmin),
            ("maximum longitude", &lonmax),
        ] {
            check_finite(what, values)?;
        }
        check_radii(&r)?;
        if let Some(index) = latmin.iter().zip(&latmax).position(|(lo, hi)| hi <= lo) {
            return Err(CrdError::CellBounds {
                axis: "latitude",
                index,
            }
            .into());
        }
        if let Some(index) = lonmin.iter().zip(&lonmax).position(|(lo, hi)| hi <= lo) {
            return Err(CrdError::CellBounds {
                axis: "longitude",
                index,
            }
            .into());
        }
        Ok(Self {
            kind,
            nlat,
            nlon,
            latmin,
            latmax,
            lonmin,
            lonmax,
            r,
            rows: RowChunk {
                local_0_start: 0,
                local_nlat: nlat,
            },
            comm: None,
        })
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn nlat(&self) -> usize {
        self.nlat
    }

    pub fn nlon(&self) -> usize {
        self.nlon
    }

    pub fn local_nlat(&self) -> usize {
        self.rows.local_nlat
    }

    pub fn rows(&self) -> RowChunk {
        self.rows
    }

    pub fn latmin(&self) -> &[f64] {
        &self.latmin
    }

    pub fn latmax(&self) -> &[f64] {
        &self.latmax
    }

    pub fn lonmin(&self) -> &[f64] {
        &self.lonmin
    }

    pub fn lonmax(&self) -> &[f64] {
        &self.lonmax
    }

    pub fn r(&self) -> &[f64] {
        &self.r
    }

    pub fn ncell(&self) -> usize {
        match self.kind {
            CellKind::Grid => self.rows.local_nlat * self.nlon,
            CellKind::Scattered => self.rows.local_nlat,
        }
    }

    pub fn row_width(&self) -> usize {
        match self.kind {
            CellKind::Grid => self.nlon,
            CellKind::Scattered => 1,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.comm.is_some()
    }

    pub fn comm(&self) -> Option<&SharedCommunicator> {
        self.comm.as_ref()
    }

    /// Longitude bounds of local cell `row` (scattered) or column `col` (grids).
    pub fn lon_bounds(&self, row: usize, col: usize) -> (f64, f64) {
        let index = match self.kind {
            CellKind::Grid => col,
            CellKind::Scattered => row,
        };
        (self.lonmin[index], self.lonmax[index])
    }

    /// Local rows paired with rows covering the mirrored latitude band.
    pub fn row_pairs(&self) -> Vec<RowPair> {
        if self.kind == CellKind::Scattered {
            return (0..self.latmin.len())
                .map(|row| RowPair { row, mirror: None })
                .collect();
        }
        let keys: Vec<(f64, f64)> = self
            .latmin
            .iter()
            .zip(&self.latmax)
            .map(|(lo, hi)| (*lo, *hi))
            .collect();
        mirror_pairs(&keys, &self.r)
    }

    /// Collective. Validates a distributed cell grid across ranks.
    pub fn check_distribution(&self) -> HarmResult<()> {
        let Some(comm) = &self.comm else {
            return Ok(());
        };
        check_all_equal(
            comm.as_ref(),
            &[self.kind as u64, self.nlat as u64, self.nlon as u64],
            "cell kind and shape",
        )?;
        let bounds: Vec<u64> = self
            .lonmin
            .iter()
            .chain(&self.lonmax)
            .map(|lon| lon.to_bits())
            .collect();
        if self.kind == CellKind::Grid {
            check_all_equal(comm.as_ref(), &bounds, "cell longitudes")?;
        }
        let gathered = comm.all_gather_u64(&[
            self.rows.local_0_start as u64,
            self.rows.local_nlat as u64,
        ]);
        let chunks: Vec<RowChunk> = gathered
            .chunks_exact(2)
            .map(|pair| RowChunk {
                local_0_start: pair[0] as usize,
                local_nlat: pair[1] as usize,
            })
            .collect();
        Ok(check_row_partition(PointKind::Grid, self.nlat, None, &chunks)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CellSet, CrdError, PointKind, PointSet, RowChunk, RowPair, check_row_partition,
        dh1_shape, dh2_shape, equator_index, gl_shape, local_nlat_north, nmax_from_nlat,
    };
    use crate::common::constants::PI_2;
    use crate::modules::comm::LocalCluster;
    use crate::numerics::{assert_scalar_close, stable_sum};

    #[test]
    fn shapes_and_degrees_are_consistent() {
        for nmax in [0, 1, 7, 10] {
            assert_eq!(nmax_from_nlat(PointKind::GaussLegendre, gl_shape(nmax).0), Some(nmax));
            assert_eq!(nmax_from_nlat(PointKind::DriscollHealy1, dh1_shape(nmax).0), Some(nmax));
            assert_eq!(nmax_from_nlat(PointKind::DriscollHealy2, dh2_shape(nmax).0), Some(nmax));
        }
        assert_eq!(equator_index(PointKind::GaussLegendre, 3), None);
        assert_eq!(equator_index(PointKind::GaussLegendre, 4), Some(2));
        assert_eq!(equator_index(PointKind::DriscollHealy1, 3), Some(4));
    }

    #[test]
    fn gauss_legendre_weights_sum_to_two_and_nodes_are_symmetric() {
        for nmax in [0, 1, 2, 9, 30] {
            let grid = PointSet::gl(nmax, 1.0).expect("gl grid");
            let sum = stable_sum(grid.weights());
            assert_scalar_close(&format!("nmax = {nmax}"), 2.0, sum, 1.0e-13, 0.0);
            let lat = grid.lat();
            for i in 0..lat.len() {
                assert_eq!(lat[i], -lat[lat.len() - 1 - i]);
                if i + 1 < lat.len() {
                    assert!(lat[i] > lat[i + 1], "rows must run north to south");
                }
            }
        }
    }

    #[test]
    fn driscoll_healy_grids_start_at_north_pole() {
        let grid = PointSet::dh1(4, 2.0).expect("dh1");
        assert_eq!(grid.lat()[0], PI_2);
        assert_eq!(grid.lat()[5], 0.0);
        assert!(grid.lat().iter().all(|lat| *lat > -PI_2));
        assert_scalar_close("weights", 2.0, stable_sum(grid.weights()), 1.0e-12, 0.0);
        let dh2 = PointSet::dh2(4, 2.0).expect("dh2");
        assert_eq!(dh2.nlon(), 20);
        assert_eq!(dh2.lat(), grid.lat());
    }

    #[test]
    fn quadrature_rows_pair_with_their_mirrors() {
        let grid = PointSet::dh1(3, 1.0).expect("dh1");
        let pairs = grid.row_pairs();
        assert_eq!(pairs[0], RowPair { row: 0, mirror: None });
        assert_eq!(pairs[1], RowPair { row: 1, mirror: Some(7) });
        assert!(pairs.iter().any(|pair| pair.row == 4 && pair.mirror.is_none()));
        let covered: usize = pairs.iter().map(|pair| 1 + usize::from(pair.mirror.is_some())).sum();
        assert_eq!(covered, grid.local_nlat());
    }

    #[test]
    fn scattered_points_require_matching_lengths_and_positive_radii() {
        assert!(PointSet::scattered(vec![0.1, 0.2], vec![0.0], vec![1.0, 1.0]).is_err());
        let error = PointSet::grid(vec![0.1], vec![0.0], vec![0.0]).expect_err("zero radius");
        assert_eq!(error.code(), "INPUT.CRD_RADIUS");
        let empty = PointSet::scattered(Vec::new(), Vec::new(), Vec::new()).expect("empty set");
        assert!(empty.is_empty());
    }

    #[test]
    fn cells_require_ordered_bounds() {
        let error = CellSet::grid(vec![0.2], vec![0.1], vec![0.0], vec![1.0], vec![1.0])
            .expect_err("inverted latitude bounds");
        assert_eq!(error.code(), "INPUT.CRD_CELL");
        assert!(
            CellSet::scattered(vec![0.0, 0.1], vec![0.1, 0.2], vec![0.0], vec![0.1], vec![1.0, 1.0])
                .is_err()
        );
        let global = CellSet::global_grid(4, 8, 1.0).expect("global cells");
        assert_eq!(global.ncell(), 32);
        assert_eq!(global.latmin()[3], -PI_2);
        let pairs = global.row_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], RowPair { row: 0, mirror: Some(3) });
    }

    #[test]
    fn quadrature_chunks_follow_equator_rules() {
        // nmax = 4: GL has 5 rows with the equator at row 2.
        let north = local_nlat_north(
            PointKind::GaussLegendre,
            4,
            RowChunk { local_0_start: 1, local_nlat: 3 },
        );
        assert_eq!(north, Ok(2));
        assert!(matches!(
            local_nlat_north(
                PointKind::GaussLegendre,
                4,
                RowChunk { local_0_start: 0, local_nlat: 3 },
            ),
            Err(CrdError::Chunk(_))
        ));
        assert!(
            local_nlat_north(
                PointKind::GaussLegendre,
                3,
                RowChunk { local_0_start: 0, local_nlat: 3 },
            )
            .is_err()
        );
        assert!(
            local_nlat_north(
                PointKind::DriscollHealy1,
                2,
                RowChunk { local_0_start: 0, local_nlat: 2 },
            )
            .is_err()
        );
    }

    #[test]
    fn partition_check_detects_gaps() {
        let ok = [
            RowChunk { local_0_start: 0, local_nlat: 2 },
            RowChunk { local_0_start: 2, local_nlat: 3 },
        ];
        assert!(check_row_partition(PointKind::Grid, 5, None, &ok).is_ok());
        let gap = [
            RowChunk { local_0_start: 0, local_nlat: 2 },
            RowChunk { local_0_start: 3, local_nlat: 3 },
        ];
        assert!(check_row_partition(PointKind::Grid, 5, None, &gap).is_err());
    }

    #[test]
    fn distributed_gl_chunks_reassemble_full_grid() {
        let nmax = 6;
        let full = PointSet::gl(nmax, 1.0).expect("gl");
        // 7 rows, equator at 3: rank 0 holds rows 0..2 plus mirrors, rank 1 the rest.
        let chunks = [
            RowChunk { local_0_start: 0, local_nlat: 4 },
            RowChunk { local_0_start: 2, local_nlat: 3 },
        ];
        let results = LocalCluster::run(2, move |comm| {
            let chunk = chunks[comm.rank()];
            let set = PointSet::gl_chunk(nmax, 1.0, chunk, comm).expect("chunk");
            set.lat().to_vec()
        });
        let mut all: Vec<f64> = results.into_iter().flatten().collect();
        all.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(all, full.lat());
    }

    #[test]
    fn inconsistent_chunks_fail_on_every_rank() {
        let results = LocalCluster::run(2, |comm| {
            let lat = vec![0.1, 0.2];
            PointSet::grid_chunk(lat, vec![0.0], vec![1.0, 1.0], 3, 0, comm).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }
}
