//! Point rows at the poles.
//!
//! At `cos(lat) = 0` only orders 0, 1 and 2 contribute to values, first and
//! second derivatives. The series is expanded to second order in the
//! angular distance from the pole and differentiated in the tangent plane,
//! then projected onto the local north and west directions of each
//! longitude.

use super::{Derivatives, radial_factor};

fn k0(n: f64) -> f64 {
    (2.0 * n + 1.0).sqrt()
}

fn k1(n: f64) -> f64 {
    ((2.0 * n + 1.0) * n * (n + 1.0) / 2.0).sqrt()
}

fn k2(n: f64) -> f64 {
    (2.0 * (2.0 * n + 1.0) * (n - 1.0) * n * (n + 1.0) * (n + 2.0)).sqrt() / 8.0
}

/// Sums split by the parity of `n + m`: `[even, odd]`.
#[derive(Debug, Clone, Copy, Default)]
struct Sums {
    v: [f64; 2],
    a0: [f64; 2],
    gx: [f64; 2],
    gy: [f64; 2],
    a2c: [f64; 2],
    a2s: [f64; 2],
}

/// Value, tangent-plane gradient and Hessian of one radial derivative at a
/// pole.
#[derive(Debug, Clone, Copy)]
struct Local {
    v: f64,
    grad: [f64; 2],
    hess: [[f64; 2]; 2],
}

#[derive(Debug, Clone)]
pub(crate) struct PoleSums {
    per_dr: Vec<Sums>,
}

fn dot(x: [f64; 2], y: [f64; 2]) -> f64 {
    x[0] * y[0] + x[1] * y[1]
}

fn quad(h: [[f64; 2]; 2], x: [f64; 2], y: [f64; 2]) -> f64 {
    x[0] * (h[0][0] * y[0] + h[0][1] * y[1]) + x[1] * (h[1][0] * y[0] + h[1][1] * y[1])
}

/// Local north and west unit vectors in the tangent plane of a pole.
fn frame(lon: f64, south: bool) -> ([f64; 2], [f64; 2]) {
    let (s, c) = lon.sin_cos();
    let north = if south { [c, s] } else { [-c, -s] };
    (north, [s, -c])
}

impl PoleSums {
    pub(crate) fn new(max_dr: usize) -> Self {
        Self {
            per_dr: vec![Sums::default(); max_dr + 1],
        }
    }

    pub(crate) fn add_order(&mut self, m: usize, c: &[f64], s: &[f64], rpow: &[f64], r: f64) {
        if m > 2 {
            return;
        }
        for (dr, sums) in self.per_dr.iter_mut().enumerate() {
            for (k, (&cnm, &snm)) in c.iter().zip(s).enumerate() {
                let n = m + k;
                let nf = n as f64;
                let f = rpow[n] * radial_factor(n, dr, r);
                let p = k % 2;
                match m {
                    0 => {
                        sums.v[p] += f * k0(nf) * cnm;
                        sums.a0[p] -= f * k0(nf) * nf * (nf + 1.0) / 2.0 * cnm;
                    }
                    1 => {
                        sums.gx[p] += f * k1(nf) * cnm;
                        sums.gy[p] += f * k1(nf) * snm;
                    }
                    _ => {
                        sums.a2c[p] += f * k2(nf) * cnm;
                        sums.a2s[p] += f * k2(nf) * snm;
                    }
                }
            }
        }
    }

    fn local(&self, dr: usize, south: bool) -> Local {
        let sums = &self.per_dr[dr];
        let sign = if south { -1.0 } else { 1.0 };
        let pick = |x: [f64; 2]| x[0] + sign * x[1];
        let (a0, a2c, a2s) = (pick(sums.a0), pick(sums.a2c), pick(sums.a2s));
        Local {
            v: pick(sums.v),
            grad: [pick(sums.gx), pick(sums.gy)],
            hess: [[a0 + 2.0 * a2c, 2.0 * a2s], [2.0 * a2s, a0 - 2.0 * a2c]],
        }
    }

    /// One term of the general derivative, before the `mu/R` scaling.
    pub(crate) fn term(&self, d: Derivatives, lon: f64, south: bool, r: f64) -> f64 {
        let (north, west) = frame(lon, south);
        let local = self.local(d.dr, south);
        match (d.dlat, d.dlon) {
            (0, 0) => local.v,
            (1, 0) => dot(north, local.grad) / r,
            (0, 1) => -dot(west, local.grad) / r,
            (2, 0) => quad(local.hess, north, north) / (r * r),
            _ => f64::NAN,
        }
    }

    pub(crate) fn grad1(&self, lon: f64, south: bool, r: f64) -> [f64; 3] {
        let (north, west) = frame(lon, south);
        let h0 = self.local(0, south);
        let h1 = self.local(1, south);
        [dot(north, h0.grad) / r, dot(west, h0.grad) / r, h1.v]
    }

    pub(crate) fn grad2(&self, lon: f64, south: bool, r: f64) -> [f64; 6] {
        let (north, west) = frame(lon, south);
        let h0 = self.local(0, south);
        let h1 = self.local(1, south);
        let h2 = self.local(2, south);
        let r2 = r * r;
        [
            h1.v / r + quad(h0.hess, north, north) / r2,
            quad(h0.hess, north, west) / r2,
            dot(north, h1.grad) / r - dot(north, h0.grad) / r2,
            h1.v / r + quad(h0.hess, west, west) / r2,
            dot(west, h1.grad) / r - dot(west, h0.grad) / r2,
            h2.v,
        ]
    }
}
