//! Fully normalized associated Legendre functions `P̄nm(sin lat)`.
//!
//! Columns of one order are built from the sectorial `P̄mm`, which is carried
//! as an X-number so that high orders near the poles do not underflow, and
//! then run through the standard three-term recursion in degree. The same
//! recursion coefficients drive the latitude-band integrals used by cell
//! synthesis. [`Pnmj`] holds the Fourier coefficients of `P̄nm(cos θ)` in
//! co-latitude.

use crate::common::constants::PI_2;
use crate::modules::shc::{coefficient_count, order_offset};
use crate::numerics::XNum;

/// Square roots shared by every recursion up to degree `nmax`.
#[derive(Debug, Clone)]
pub struct LegendreTables {
    nmax: usize,
    r: Vec<f64>,
    ri: Vec<f64>,
}

impl LegendreTables {
    pub fn new(nmax: usize) -> Self {
        let len = 2 * nmax + 4;
        let r: Vec<f64> = (0..len).map(|k| (k as f64).sqrt()).collect();
        let ri = r
            .iter()
            .map(|value| if *value == 0.0 { 0.0 } else { 1.0 / value })
            .collect();
        Self { nmax, r, ri }
    }

    pub fn nmax(&self) -> usize {
        self.nmax
    }

    /// Factor taking `P̄_{m-1,m-1}` to `P̄_mm` (before the `cos lat` factor).
    pub fn sectorial_factor(&self, m: usize) -> f64 {
        match m {
            0 => 1.0,
            1 => self.r[3],
            _ => self.r[2 * m + 1] * self.ri[2 * m],
        }
    }

    /// Recursion coefficients of order `m`.
    pub fn order(&self, m: usize) -> OrderRecursion {
        let nmax = self.nmax;
        let (r, ri) = (&self.r, &self.ri);
        let mut anm = vec![0.0; nmax + 1];
        let mut bnm = vec![0.0; nmax + 1];
        let mut enm = vec![0.0; nmax + 1];
        if m < nmax {
            anm[m + 1] = r[2 * m + 3];
        }
        for n in (m + 2)..=nmax {
            let w = r[2 * n + 1] * ri[n - m] * ri[n + m];
            anm[n] = r[2 * n - 1] * w;
            bnm[n] = r[n - m - 1] * r[n + m - 1] * ri[2 * n - 3] * w;
        }
        for n in (m + 1)..=nmax {
            enm[n] = r[2 * n + 1] * r[n - m] * r[n + m] * ri[2 * n - 1];
        }
        let gm = if m >= 3 {
            r[m] * r[2 * m + 1] * r[2 * m - 1] * ri[m - 1] / (2 * m + 2) as f64
        } else {
            0.0
        };
        OrderRecursion {
            m,
            nmax,
            anm,
            bnm,
            enm,
            gm,
        }
    }

    /// `P̄nm(sin lat)` for all `0 <= m <= n <= nmax` in the order-major layout
    /// of [`Shc`](crate::modules::shc::Shc).
    pub fn triangle(&self, lat: f64) -> Vec<f64> {
        let (t, u) = lat.sin_cos();
        let mut out = vec![0.0; coefficient_count(self.nmax)];
        let mut sectorial = Sectorial::new(u);
        for m in 0..=self.nmax {
            let rec = self.order(m);
            sectorial.advance_to(m, self);
            let start = order_offset(self.nmax, m);
            let len = self.nmax + 1 - m;
            fill_column(&rec, t, sectorial.value(), &mut out[start..start + len]);
        }
        out
    }
}

/// Degree recursion of one order, indexed by degree.
#[derive(Debug, Clone)]
pub struct OrderRecursion {
    m: usize,
    nmax: usize,
    anm: Vec<f64>,
    bnm: Vec<f64>,
    enm: Vec<f64>,
    gm: f64,
}

impl OrderRecursion {
    pub fn m(&self) -> usize {
        self.m
    }

    pub fn nmax(&self) -> usize {
        self.nmax
    }

    pub fn anm(&self, n: usize) -> f64 {
        self.anm[n]
    }

    pub fn bnm(&self, n: usize) -> f64 {
        self.bnm[n]
    }

    /// `sqrt((2n+1)(n-m)(n+m)/(2n-1))`, zero for `n == m`.
    pub fn enm(&self, n: usize) -> f64 {
        self.enm[n]
    }
}

/// Running `P̄mm` of one latitude as the order sweep advances.
#[derive(Debug, Clone, Copy)]
pub struct Sectorial {
    u: f64,
    m: usize,
    value: XNum,
}

impl Sectorial {
    /// Starts at `P̄00 = 1` for a latitude with `cos(lat) = u`.
    pub fn new(u: f64) -> Self {
        Self {
            u,
            m: 0,
            value: XNum::new(1.0),
        }
    }

    pub fn advance_to(&mut self, m: usize, tables: &LegendreTables) {
        while self.m < m {
            self.m += 1;
            self.value = self.value.scale(tables.sectorial_factor(self.m) * self.u);
        }
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn value(&self) -> XNum {
        self.value
    }
}

/// Writes `P̄nm(t)`, `n = m..=nmax`, into `out[n - m]` starting from the
/// sectorial `pmm`. The X-number recursion switches to plain `f64` as soon
/// as both previous values are representable.
pub fn fill_column(rec: &OrderRecursion, t: f64, pmm: XNum, out: &mut [f64]) {
    let m = rec.m;
    let len = (rec.nmax + 1 - m).min(out.len());
    if len == 0 {
        return;
    }
    out[0] = pmm.to_f64();
    if len == 1 {
        return;
    }
    let mut y = pmm;
    let mut x = pmm.scale(rec.anm[m + 1] * t);
    out[1] = x.to_f64();

    let mut k = 2;
    while k < len && !(x.is_representable() && y.is_representable()) {
        let n = m + k;
        let z = XNum::lsum2(rec.anm[n] * t, x, -rec.bnm[n], y);
        out[k] = z.to_f64();
        y = x;
        x = z;
        k += 1;
    }
    let (mut yf, mut xf) = (y.to_f64(), x.to_f64());
    while k < len {
        let n = m + k;
        let z = rec.anm[n] * t * xf - rec.bnm[n] * yf;
        out[k] = z;
        yf = xf;
        xf = z;
        k += 1;
    }
}

/// Writes `P̄nm` into `column` like [`fill_column`] together with
/// `P̄mm q'_n(t)` and `P̄mm q''_n(t)` into `dq1` and `dq2`, where
/// `P̄nm = P̄mm q_n(t)` and `q_n` is the polynomial of the degree recursion.
/// Latitude derivatives follow from these without dividing anything but the
/// sectorial factor by `cos lat`.
pub fn fill_column_with_derivatives(
    rec: &OrderRecursion,
    t: f64,
    pmm: XNum,
    column: &mut [f64],
    dq1: &mut [f64],
    dq2: &mut [f64],
) {
    let m = rec.m;
    let len = (rec.nmax + 1 - m)
        .min(column.len())
        .min(dq1.len())
        .min(dq2.len());
    if len == 0 {
        return;
    }
    column[0] = pmm.to_f64();
    dq1[0] = 0.0;
    dq2[0] = 0.0;

    // [previous, current] of the value and both derivatives
    let zero = XNum::new(0.0);
    let (mut p, mut d1, mut d2) = ([zero, pmm], [zero, zero], [zero, zero]);
    let representable = |x: &[XNum; 2]| x[0].is_representable() && x[1].is_representable();
    let mut k = 1;
    while k < len && !(representable(&p) && representable(&d1) && representable(&d2)) {
        let n = m + k;
        let (a, at, b) = (rec.anm[n], rec.anm[n] * t, -rec.bnm[n]);
        let pn = XNum::lsum2(at, p[1], b, p[0]);
        let d1n = XNum::lsum2(1.0, XNum::lsum2(at, d1[1], b, d1[0]), a, p[1]);
        let d2n = XNum::lsum2(1.0, XNum::lsum2(at, d2[1], b, d2[0]), 2.0 * a, d1[1]);
        column[k] = pn.to_f64();
        dq1[k] = d1n.to_f64();
        dq2[k] = d2n.to_f64();
        p = [p[1], pn];
        d1 = [d1[1], d1n];
        d2 = [d2[1], d2n];
        k += 1;
    }
    let mut p = [p[0].to_f64(), p[1].to_f64()];
    let mut d1 = [d1[0].to_f64(), d1[1].to_f64()];
    let mut d2 = [d2[0].to_f64(), d2[1].to_f64()];
    while k < len {
        let n = m + k;
        let (a, at, b) = (rec.anm[n], rec.anm[n] * t, rec.bnm[n]);
        let pn = at * p[1] - b * p[0];
        let d1n = a * p[1] + at * d1[1] - b * d1[0];
        let d2n = 2.0 * a * d1[1] + at * d2[1] - b * d2[0];
        column[k] = pn;
        dq1[k] = d1n;
        dq2[k] = d2n;
        p = [p[1], pn];
        d1 = [d1[1], d1n];
        d2 = [d2[1], d2n];
        k += 1;
    }
}

/// Integrals `∫ P̄nm(t) dt` between the sines of two latitudes, advanced order
/// by order for one latitude band.
#[derive(Debug, Clone)]
pub struct BandIntegrals {
    lat: [f64; 2],
    t: [f64; 2],
    u: [f64; 2],
    sectorial: [Sectorial; 2],
    // I_{m-2,m-2} and I_{m-1,m-1}
    imm: [f64; 2],
    columns: [Vec<f64>; 2],
}

impl BandIntegrals {
    pub fn new(latmin: f64, latmax: f64, nmax: usize) -> Self {
        let (t1, u1) = latmin.sin_cos();
        let (t2, u2) = latmax.sin_cos();
        Self {
            lat: [latmin, latmax],
            t: [t1, t2],
            u: [u1, u2],
            sectorial: [Sectorial::new(u1), Sectorial::new(u2)],
            imm: [0.0; 2],
            columns: [vec![0.0; nmax + 1], vec![0.0; nmax + 1]],
        }
    }

    /// Writes the integrals of order `rec.m()` for `n = m..=nmax` into
    /// `out[n - m]`. Orders must be requested in increasing order.
    pub fn column(&mut self, rec: &OrderRecursion, tables: &LegendreTables, out: &mut [f64]) {
        let m = rec.m;
        let nmax = rec.nmax;
        let len = nmax + 1 - m;
        let [t1, t2] = self.t;
        let [u1, u2] = self.u;

        if m == 0 {
            // Legendre polynomials up to degree nmax + 1.
            let (mut p0, mut p1) = ([1.0, 1.0], [t1, t2]);
            out[0] = t2 - t1;
            for n in 1..=nmax {
                let k = (n + 1) as f64;
                let en = (2.0 * k - 1.0) / k;
                let fnn = (k - 1.0) / k;
                let p2 = [en * t1 * p1[0] - fnn * p0[0], en * t2 * p1[1] - fnn * p0[1]];
                out[n] = tables.ri[2 * n + 1] * ((p2[1] - p0[1]) - (p2[0] - p0[0]));
                p0 = p1;
                p1 = p2;
            }
            return;
        }

        for (end, sectorial) in self.sectorial.iter_mut().enumerate() {
            sectorial.advance_to(m, tables);
            fill_column(rec, self.t[end], sectorial.value(), &mut self.columns[end][..len]);
        }
        let [low, high] = &self.columns;

        let imm = match m {
            1 => {
                let value = 0.5
                    * tables.r[3]
                    * ((t2 * u2 - (PI_2 - self.lat[1])) - (t1 * u1 - (PI_2 - self.lat[0])));
                self.imm[0] = value;
                value
            }
            2 => {
                let value = tables.r[15] / 6.0 * (t2 * (3.0 - t2 * t2) - t1 * (3.0 - t1 * t1));
                self.imm[1] = value;
                value
            }
            _ => {
                let value = rec.gm * self.imm[0] + (t2 * high[0] - t1 * low[0]) / (m + 1) as f64;
                self.imm = [self.imm[1], value];
                value
            }
        };
        out[0] = imm;
        if len == 1 {
            return;
        }
        out[1] = -(rec.anm[m + 1] / (m + 2) as f64) * (u2 * u2 * high[0] - u1 * u1 * low[0]);
        for k in 2..len {
            let n = m + k;
            let hm = (n as f64 - 2.0) / (n + 1) as f64;
            out[k] = hm * rec.bnm[n] * out[k - 2]
                - (rec.anm[n] / (n + 1) as f64) * (u2 * u2 * high[k - 1] - u1 * u1 * low[k - 1]);
        }
    }
}

/// Storage order of [`Pnmj`] coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnmjOrdering {
    /// Order, then degree, then wave-number index.
    Mnj,
    /// Order, then wave-number index, then degree.
    Mjn,
}

/// Fourier coefficients of `P̄nm(cos θ)`:
/// `P̄nm(cos θ) = Σ_j P_nmj T(k θ)` with `k = 2j + (n mod 2)` and `T = cos`
/// for even `m`, `sin` for odd `m`.
#[derive(Debug, Clone)]
pub struct Pnmj {
    nmax: usize,
    ordering: PnmjOrdering,
    values: Vec<f64>,
    starts: Vec<usize>,
}

impl Pnmj {
    /// Number of stored coefficients for degree `nmax`.
    pub fn length(nmax: usize) -> usize {
        (0..=nmax).map(|n| (n + 1) * (n / 2 + 1)).sum()
    }

    /// Wave number of index `j` for degree `n`.
    pub const fn j2k(n: usize, j: usize) -> usize {
        2 * j + n % 2
    }

    /// Index `j` of wave number `k`, the inverse of [`Pnmj::j2k`] for the
    /// degree whose parity matches `k`.
    pub const fn k2j(k: usize) -> usize {
        k / 2
    }

    pub fn new(nmax: usize, ordering: PnmjOrdering) -> Self {
        let starts = match ordering {
            PnmjOrdering::Mnj => {
                let mut starts = Vec::with_capacity(coefficient_count(nmax));
                let mut next = 0;
                for m in 0..=nmax {
                    for n in m..=nmax {
                        starts.push(next);
                        next += n / 2 + 1;
                    }
                }
                starts
            }
            PnmjOrdering::Mjn => {
                let mut starts = Vec::with_capacity((nmax + 1) * (nmax / 2 + 1));
                let mut next = 0;
                for m in 0..=nmax {
                    for j in 0..=nmax / 2 {
                        starts.push(next);
                        next += nmax + 1 - (2 * j).max(m);
                    }
                }
                starts
            }
        };
        let mut pnmj = Self {
            nmax,
            ordering,
            values: vec![0.0; Self::length(nmax)],
            starts,
        };
        pnmj.compute();
        pnmj
    }

    pub fn nmax(&self) -> usize {
        self.nmax
    }

    pub fn ordering(&self) -> PnmjOrdering {
        self.ordering
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn index(&self, m: usize, n: usize, j: usize) -> usize {
        match self.ordering {
            PnmjOrdering::Mnj => self.starts[order_offset(self.nmax, m) + (n - m)] + j,
            PnmjOrdering::Mjn => {
                self.starts[m * (self.nmax / 2 + 1) + j] + (n - (2 * j).max(m))
            }
        }
    }

    /// Coefficient `P_nmj`; requires `m <= n <= nmax` and `j <= n / 2`.
    pub fn get(&self, m: usize, n: usize, j: usize) -> f64 {
        self.values[self.index(m, n, j)]
    }

    /// Evaluates the series at co-latitude `theta`.
    pub fn evaluate(&self, n: usize, m: usize, theta: f64) -> f64 {
        (0..=n / 2)
            .map(|j| {
                let k = Self::j2k(n, j) as f64 * theta;
                let basis = if m % 2 == 0 { k.cos() } else { k.sin() };
                self.get(m, n, j) * basis
            })
            .sum()
    }

    fn store(&mut self, n: usize, m: usize, coefficients: &[XNum]) {
        for (j, value) in coefficients.iter().enumerate() {
            let index = self.index(m, n, j);
            self.values[index] = value.to_f64();
        }
    }

    fn compute(&mut self) {
        let nmax = self.nmax;
        for first_large in [6, 5] {
            let first_small = first_large % 2;
            let mut diagonal = Vec::new();
            for n in (first_small..=nmax.min(first_large - 2)).step_by(2) {
                for m in 0..=n {
                    let coefficients = low_degree(n, m);
                    self.store(n, m, &coefficients);
                    if m == n {
                        diagonal = coefficients;
                    }
                }
            }
            for n in (first_large..=nmax).step_by(2) {
                let (pnn, pnn1) = next_diagonal(n, &diagonal);
                self.store(n, n, &pnn);
                self.store(n, n - 1, &pnn1);
                let mut p2 = pnn.clone();
                let mut p1 = pnn1;
                for m in (0..=n - 2).rev() {
                    let p0 = lower_order(n, m, &p2, &p1);
                    self.store(n, m, &p0);
                    p2 = std::mem::replace(&mut p1, p0);
                }
                diagonal = pnn;
            }
        }
    }
}

/// Closed-form coefficients for `n <= 4`.
fn low_degree(n: usize, m: usize) -> Vec<XNum> {
    let s = f64::sqrt;
    let values: Vec<f64> = match (n, m) {
        (0, _) => vec![1.0],
        (1, _) => vec![s(3.0)],
        (2, 0) => vec![s(5.0) / 4.0, 3.0 * s(5.0) / 4.0],
        (2, 1) => vec![0.0, s(15.0) / 2.0],
        (2, _) => vec![s(15.0) / 4.0, -s(15.0) / 4.0],
        (3, 0) => vec![3.0 * s(7.0) / 8.0, 5.0 * s(7.0) / 8.0],
        (3, 1) => vec![s(42.0) / 16.0, 5.0 * s(42.0) / 16.0],
        (3, 2) => vec![s(105.0) / 8.0, -s(105.0) / 8.0],
        (3, _) => vec![3.0 * s(70.0) / 16.0, -s(70.0) / 16.0],
        (_, 0) => vec![27.0 / 64.0, 15.0 / 16.0, 105.0 / 64.0],
        (_, 1) => vec![0.0, 3.0 * s(10.0) / 16.0, 21.0 * s(10.0) / 32.0],
        (_, 2) => vec![9.0 * s(5.0) / 32.0, 3.0 * s(5.0) / 8.0, -21.0 * s(5.0) / 32.0],
        (_, 3) => vec![0.0, 3.0 * s(70.0) / 16.0, -3.0 * s(70.0) / 32.0],
        _ => vec![9.0 * s(35.0) / 64.0, -3.0 * s(35.0) / 16.0, 3.0 * s(35.0) / 64.0],
    };
    values.into_iter().map(XNum::new).collect()
}

/// `P_{n,n,j}` and `P_{n,n-1,j}` from `P_{n-2,n-2,j}`.
fn next_diagonal(n: usize, old: &[XNum]) -> (Vec<XNum>, Vec<XNum>) {
    let even = n % 2 == 0;
    let nf = n as f64;
    let gamma = 0.125 * ((2.0 * nf + 1.0) * (2.0 * nf - 1.0) / (nf * (nf - 1.0))).sqrt();
    let gamma2 = 2.0 * gamma;
    let jx = n / 2;
    let mut pnn = vec![XNum::new(0.0); jx + 1];

    let interior = if even {
        pnn[0] = XNum::lsum2(gamma2, old[0], -gamma, old[1]);
        let tmp = XNum::lsum2(-gamma2, old[0], gamma2, old[1]);
        pnn[1] = XNum::lsum2(1.0, tmp, -gamma, old[2]);
        2..jx - 1
    } else {
        pnn[0] = XNum::lsum2(3.0 * gamma, old[0], -gamma, old[1]);
        1..jx - 1
    };
    for j in interior {
        let tmp = XNum::lsum2(-gamma, old[j - 1], gamma2, old[j]);
        pnn[j] = XNum::lsum2(1.0, tmp, -gamma, old[j + 1]);
    }
    pnn[jx - 1] = XNum::lsum2(-gamma, old[jx - 2], gamma2, old[jx - 1]);
    pnn[jx] = old[jx - 1].scale(-gamma);

    let pnn1 = if even {
        let alpha2 = 2.0 * (2.0 / nf).sqrt();
        pnn.iter()
            .enumerate()
            .map(|(j, value)| {
                if j == 0 {
                    XNum::new(0.0)
                } else {
                    value.scale(-(j as f64) * alpha2)
                }
            })
            .collect()
    } else {
        let alpha = (2.0 / nf).sqrt();
        pnn.iter()
            .enumerate()
            .map(|(j, value)| value.scale((2 * j + 1) as f64 * alpha))
            .collect()
    };
    (pnn, pnn1)
}

/// `P_{n,m,j}` from `P_{n,m+2,j}` and `P_{n,m+1,j}`.
fn lower_order(n: usize, m: usize, p2: &[XNum], p1: &[XNum]) -> Vec<XNum> {
    let (nf, mf) = (n as f64, m as f64);
    let u = if m == 0 {
        (0.5 / (nf * (nf + 1.0))).sqrt()
    } else {
        (1.0 / ((nf - mf) * (nf + mf + 1.0))).sqrt()
    };
    let beta = ((nf - mf - 1.0) * (nf + mf + 2.0)).sqrt() * u;
    let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
    if n % 2 == 0 {
        let alpha2 = 4.0 * u;
        (0..p2.len())
            .map(|j| {
                if j == 0 {
                    p2[0].scale(beta)
                } else {
                    XNum::lsum2(sign * j as f64 * alpha2, p1[j], beta, p2[j])
                }
            })
            .collect()
    } else {
        let alpha = 2.0 * u;
        (0..p2.len())
            .map(|j| XNum::lsum2(sign * (2 * j + 1) as f64 * alpha, p1[j], beta, p2[j]))
            .collect()
    }
}
