//! Order/longitude transforms for one latitude row.
//!
//! Synthesis maps Fourier coefficients `(a_m, b_m)` to
//! `f(lon_j) = sum_m a_m cos(m lon_j) + b_m sin(m lon_j)`; analysis computes the
//! same sums the other way round. Equally spaced rows that close the full
//! circle go through rustfft, everything else through direct sums.

use crate::common::constants::PI2;
use crate::numerics::within_tolerance;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

#[derive(Clone)]
enum Plan {
    Fft {
        lon0: f64,
        inverse: Arc<dyn Fft<f64>>,
        forward: Arc<dyn Fft<f64>>,
    },
    Direct,
}

#[derive(Clone)]
pub struct RowTransform {
    lons: Vec<f64>,
    plan: Plan,
}

impl std::fmt::Debug for RowTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowTransform")
            .field("nlon", &self.lons.len())
            .field("fft", &self.uses_fft())
            .finish()
    }
}

impl RowTransform {
    /// Builds a transform for the given longitudes. `fft_tolerance` is the
    /// session's decision; with `Some(tolerance)` the FFT path is taken if the
    /// longitudes are equally spaced over the full circle within `tolerance`.
    pub fn new(lons: &[f64], fft_tolerance: Option<f64>) -> Self {
        let full_circle = fft_tolerance.is_some_and(|tolerance| is_full_circle(lons, tolerance));
        let plan = if full_circle {
            let mut planner = FftPlanner::<f64>::new();
            Plan::Fft {
                lon0: lons[0],
                inverse: planner.plan_fft_inverse(lons.len()),
                forward: planner.plan_fft_forward(lons.len()),
            }
        } else {
            Plan::Direct
        };
        Self {
            lons: lons.to_vec(),
            plan,
        }
    }

    pub fn nlon(&self) -> usize {
        self.lons.len()
    }

    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    pub fn uses_fft(&self) -> bool {
        matches!(self.plan, Plan::Fft { .. })
    }

    /// Writes `sum_m a[m] cos(m lon) + b[m] sin(m lon)` into `out`.
    pub fn synthesize(&self, a: &[f64], b: &[f64], out: &mut [f64]) {
        debug_assert_eq!(a.len(), b.len());
        debug_assert_eq!(out.len(), self.lons.len());
        match &self.plan {
            Plan::Fft { lon0, inverse, .. } => {
                let n = self.lons.len();
                let mut spectrum = vec![Complex64::new(0.0, 0.0); n];
                for (m, (&am, &bm)) in a.iter().zip(b).enumerate() {
                    if am == 0.0 && bm == 0.0 {
                        continue;
                    }
                    let (s, c) = (m as f64 * lon0).sin_cos();
                    spectrum[m % n] += Complex64::new(am, -bm) * Complex64::new(c, s);
                }
                inverse.process(&mut spectrum);
                for (value, z) in out.iter_mut().zip(&spectrum) {
                    *value = z.re;
                }
            }
            Plan::Direct => {
                for (value, &lon) in out.iter_mut().zip(&self.lons) {
                    let mut sum = 0.0;
                    for (m, (&am, &bm)) in a.iter().zip(b).enumerate() {
                        let (s, c) = (m as f64 * lon).sin_cos();
                        sum += am * c + bm * s;
                    }
                    *value = sum;
                }
            }
        }
    }

    /// Computes `a[m] = sum_j f_j cos(m lon_j)` and `b[m] = sum_j f_j sin(m lon_j)`
    /// for `m < a.len()`.
    pub fn analyze(&self, values: &[f64], a: &mut [f64], b: &mut [f64]) {
        debug_assert_eq!(values.len(), self.lons.len());
        debug_assert_eq!(a.len(), b.len());
        match &self.plan {
            Plan::Fft { lon0, forward, .. } => {
                let n = self.lons.len();
                let mut spectrum: Vec<Complex64> =
                    values.iter().map(|&v| Complex64::new(v, 0.0)).collect();
                forward.process(&mut spectrum);
                for (m, (am, bm)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
                    let (s, c) = (m as f64 * lon0).sin_cos();
                    let z = spectrum[m % n] * Complex64::new(c, -s);
                    *am = z.re;
                    *bm = -z.im;
                }
            }
            Plan::Direct => {
                for (m, (am, bm)) in a.iter_mut().zip(b.iter_mut()).enumerate() {
                    let mut sum_c = 0.0;
                    let mut sum_s = 0.0;
                    for (&value, &lon) in values.iter().zip(&self.lons) {
                        let (s, c) = (m as f64 * lon).sin_cos();
                        sum_c += value * c;
                        sum_s += value * s;
                    }
                    *am = sum_c;
                    *bm = sum_s;
                }
            }
        }
    }
}

/// True when `lons` are `lon0 + 2 pi j / n` for `j = 0..n` up to `tolerance`.
pub fn is_full_circle(lons: &[f64], tolerance: f64) -> bool {
    let n = lons.len();
    if n < 2 {
        return false;
    }
    let step = PI2 / n as f64;
    lons.iter()
        .enumerate()
        .all(|(j, &lon)| within_tolerance(lon - lons[0], j as f64 * step, tolerance, tolerance, 1.0))
}
