//! Closed-form integrals of trigonometric products and of products of
//! spherical harmonics over latitude/longitude rectangles.
//!
//! The longitude family `cc`, `cs`, `sc`, `ss` fills one integral per
//! consecutive interval `[u0 + j du, u0 + (j + 1) du]`. The co-latitude family
//! carries the `sin` area factor and integrates a single interval.

use crate::domain::{HarmError, HarmResult};
use crate::modules::leg::Pnmj;

/// Frequencies closer than this to zero are treated as zero.
const FREQUENCY_EPS: f64 = 100.0 * f64::EPSILON;

fn is_zero(k: f64) -> bool {
    k.abs() <= FREQUENCY_EPS
}

/// `∫ cos(k x) dx` over `[x0, x0 + dx]`.
fn int_cos(k: f64, x0: f64, dx: f64) -> f64 {
    if is_zero(k) {
        return dx;
    }
    2.0 * (k * (x0 + 0.5 * dx)).cos() * (0.5 * k * dx).sin() / k
}

/// `∫ sin(k x) dx` over `[x0, x0 + dx]`.
fn int_sin(k: f64, x0: f64, dx: f64) -> f64 {
    if is_zero(k) {
        return 0.0;
    }
    2.0 * (k * (x0 + 0.5 * dx)).sin() * (0.5 * k * dx).sin() / k
}

fn fill(u0: f64, du: f64, out: &mut [f64], integral: impl Fn(f64) -> f64) {
    for (j, value) in out.iter_mut().enumerate() {
        *value = integral(u0 + j as f64 * du);
    }
}

/// `∫ cos(a1 x) cos(a2 x) dx` over each interval.
pub fn cc(u0: f64, du: f64, a1: f64, a2: f64, out: &mut [f64]) {
    fill(u0, du, out, |x0| {
        0.5 * (int_cos(a1 - a2, x0, du) + int_cos(a1 + a2, x0, du))
    });
}

/// `∫ cos(a1 x) sin(a2 x) dx` over each interval.
pub fn cs(u0: f64, du: f64, a1: f64, a2: f64, out: &mut [f64]) {
    if is_zero(a2) {
        out.fill(0.0);
        return;
    }
    fill(u0, du, out, |x0| {
        0.5 * (int_sin(a2 + a1, x0, du) + int_sin(a2 - a1, x0, du))
    });
}

/// `∫ sin(a1 x) cos(a2 x) dx` over each interval.
pub fn sc(u0: f64, du: f64, a1: f64, a2: f64, out: &mut [f64]) {
    cs(u0, du, a2, a1, out);
}

/// `∫ sin(a1 x) sin(a2 x) dx` over each interval.
pub fn ss(u0: f64, du: f64, a1: f64, a2: f64, out: &mut [f64]) {
    if is_zero(a1) || is_zero(a2) {
        out.fill(0.0);
        return;
    }
    fill(u0, du, out, |x0| {
        0.5 * (int_cos(a1 - a2, x0, du) - int_cos(a1 + a2, x0, du))
    });
}

// ∫ cos(k x) sin x dx
fn cos_sin(k: f64, x0: f64, dx: f64) -> f64 {
    0.5 * (int_sin(1.0 + k, x0, dx) + int_sin(1.0 - k, x0, dx))
}

// ∫ sin(k x) sin x dx
fn sin_sin(k: f64, x0: f64, dx: f64) -> f64 {
    0.5 * (int_cos(k - 1.0, x0, dx) - int_cos(k + 1.0, x0, dx))
}

/// `∫ cos(a1 x) cos(a2 x) sin x dx` over `[u0, u0 + du]`.
pub fn ccs(u0: f64, du: f64, a1: f64, a2: f64) -> f64 {
    0.5 * (cos_sin(a1 - a2, u0, du) + cos_sin(a1 + a2, u0, du))
}

/// `∫ cos(a1 x) sin(a2 x) sin x dx` over `[u0, u0 + du]`.
pub fn css(u0: f64, du: f64, a1: f64, a2: f64) -> f64 {
    0.5 * (sin_sin(a2 + a1, u0, du) + sin_sin(a2 - a1, u0, du))
}

/// `∫ sin(a1 x) cos(a2 x) sin x dx` over `[u0, u0 + du]`.
pub fn scs(u0: f64, du: f64, a1: f64, a2: f64) -> f64 {
    css(u0, du, a2, a1)
}

/// `∫ sin(a1 x) sin(a2 x) sin x dx` over `[u0, u0 + du]`.
pub fn sss(u0: f64, du: f64, a1: f64, a2: f64) -> f64 {
    0.5 * (cos_sin(a1 - a2, u0, du) - cos_sin(a1 + a2, u0, du))
}

fn check_degrees(n1: usize, m1: usize, n2: usize, m2: usize, pnmj: &Pnmj) -> HarmResult<()> {
    for (label, n, m) in [("n1", n1, m1), ("n2", n2, m2)] {
        if n > pnmj.nmax() {
            return Err(HarmError::invalid_argument(
                "INPUT.INTEG_DEGREE",
                format!("{label} = {n} exceeds the table degree {}", pnmj.nmax()),
            ));
        }
        if m > n {
            return Err(HarmError::invalid_argument(
                "INPUT.INTEG_DEGREE",
                format!("order {m} exceeds degree {label} = {n}"),
            ));
        }
    }
    Ok(())
}

/// `∫ P̄_{n1,m1}(cos θ) P̄_{n2,m2}(cos θ) sin θ dθ` over `[cltmin, cltmax]`.
pub fn pn1m1pn2m2(
    cltmin: f64,
    cltmax: f64,
    n1: usize,
    m1: usize,
    n2: usize,
    m2: usize,
    pnmj: &Pnmj,
) -> HarmResult<f64> {
    if cltmin > cltmax {
        return Err(HarmError::invalid_argument(
            "INPUT.INTEG_BOUNDS",
            format!("co-latitude bounds are reversed: {cltmin} > {cltmax}"),
        ));
    }
    check_degrees(n1, m1, n2, m2, pnmj)?;

    let trig: fn(f64, f64, f64, f64) -> f64 = match (m1 % 2, m2 % 2) {
        (0, 0) => ccs,
        (0, _) => css,
        (_, 0) => scs,
        _ => sss,
    };
    let dclt = cltmax - cltmin;
    let mut total = 0.0;
    for j1 in 0..=n1 / 2 {
        let p1 = pnmj.get(m1, n1, j1);
        if p1 == 0.0 {
            continue;
        }
        let k1 = Pnmj::j2k(n1, j1) as f64;
        for j2 in 0..=n2 / 2 {
            let k2 = Pnmj::j2k(n2, j2) as f64;
            total += p1 * pnmj.get(m2, n2, j2) * trig(cltmin, dclt, k1, k2);
        }
    }
    Ok(total)
}

/// Integral of the product of two real spherical harmonics over a
/// co-latitude/longitude rectangle. `i = false` selects `cos(m λ)`,
/// `i = true` selects `sin(m λ)`.
#[allow(clippy::too_many_arguments)]
pub fn yi1n1m1yi2n2m2(
    cltmin: f64,
    cltmax: f64,
    lonmin: f64,
    lonmax: f64,
    i1: bool,
    n1: usize,
    m1: usize,
    i2: bool,
    n2: usize,
    m2: usize,
    pnmj: &Pnmj,
) -> HarmResult<f64> {
    if lonmin > lonmax {
        return Err(HarmError::invalid_argument(
            "INPUT.INTEG_BOUNDS",
            format!("longitude bounds are reversed: {lonmin} > {lonmax}"),
        ));
    }
    let ip = crate::propagate!(
        pn1m1pn2m2(cltmin, cltmax, n1, m1, n2, m2, pnmj),
        "yi1n1m1yi2n2m2"
    )?;

    let mut il = [0.0];
    let (a1, a2, dlon) = (m1 as f64, m2 as f64, lonmax - lonmin);
    match (i1, i2) {
        (false, false) => cc(lonmin, dlon, a1, a2, &mut il),
        (false, true) => cs(lonmin, dlon, a1, a2, &mut il),
        (true, false) => sc(lonmin, dlon, a1, a2, &mut il),
        (true, true) => ss(lonmin, dlon, a1, a2, &mut il),
    }
    Ok(ip * il[0])
}

#[cfg(test)]
mod tests {
    use super::{cc, ccs, cs, pn1m1pn2m2, sc, ss, sss, yi1n1m1yi2n2m2};
    use crate::common::constants::{FOUR_PI, PI, PI_2};
    use crate::modules::leg::{Pnmj, PnmjOrdering};
    use crate::numerics::{assert_scalar_close, stable_sum};

    fn simpson(a: f64, b: f64, f: impl Fn(f64) -> f64) -> f64 {
        let steps = 2000;
        let h = (b - a) / steps as f64;
        (0..=steps)
            .map(|i| {
                let weight = match i {
                    0 => 1.0,
                    i if i == steps => 1.0,
                    i if i % 2 == 1 => 4.0,
                    _ => 2.0,
                };
                weight * f(a + i as f64 * h)
            })
            .sum::<f64>()
            * h
            / 3.0
    }

    #[test]
    fn longitude_integrals_match_quadrature() {
        let (u0, du) = (0.3, 0.4);
        for (a1, a2) in [(0.0, 0.0), (2.0, 2.0), (3.0, 5.0), (4.0, 1.0), (0.0, 3.0)] {
            let mut out = [0.0; 3];
            cc(u0, du, a1, a2, &mut out);
            for (j, value) in out.iter().enumerate() {
                let x0 = u0 + j as f64 * du;
                let expected = simpson(x0, x0 + du, |x| (a1 * x).cos() * (a2 * x).cos());
                assert_scalar_close(&format!("cc({a1},{a2})[{j}]"), expected, *value, 1.0e-12, 0.0);
            }
            cs(u0, du, a1, a2, &mut out);
            let expected = simpson(u0, u0 + du, |x| (a1 * x).cos() * (a2 * x).sin());
            assert_scalar_close(&format!("cs({a1},{a2})"), expected, out[0], 1.0e-12, 0.0);
            sc(u0, du, a1, a2, &mut out);
            let expected = simpson(u0, u0 + du, |x| (a1 * x).sin() * (a2 * x).cos());
            assert_scalar_close(&format!("sc({a1},{a2})"), expected, out[0], 1.0e-12, 0.0);
            ss(u0, du, a1, a2, &mut out);
            let expected = simpson(u0, u0 + du, |x| (a1 * x).sin() * (a2 * x).sin());
            assert_scalar_close(&format!("ss({a1},{a2})"), expected, out[0], 1.0e-12, 0.0);
        }
    }

    #[test]
    fn latitude_integrals_carry_the_area_factor() {
        let (u0, du) = (0.2, 1.1);
        for (a1, a2) in [(0.0, 0.0), (1.0, 1.0), (2.0, 5.0), (3.0, 0.0)] {
            let expected = simpson(u0, u0 + du, |x| (a1 * x).cos() * (a2 * x).cos() * x.sin());
            assert_scalar_close("ccs", expected, ccs(u0, du, a1, a2), 1.0e-12, 0.0);
            let expected = simpson(u0, u0 + du, |x| (a1 * x).sin() * (a2 * x).sin() * x.sin());
            assert_scalar_close("sss", expected, sss(u0, du, a1, a2), 1.0e-12, 0.0);
        }
    }

    #[test]
    fn legendre_functions_are_orthogonal_on_split_domains() {
        let nmax = 10;
        let pnmj = Pnmj::new(nmax, PnmjOrdering::Mnj);
        for m in [0, 1, 4] {
            for n1 in m..=nmax {
                for n2 in m..=nmax {
                    let whole = pn1m1pn2m2(0.0, PI, n1, m, n2, m, &pnmj).expect("integral");
                    let expected = if n1 == n2 {
                        if m == 0 { 2.0 } else { 4.0 }
                    } else {
                        0.0
                    };
                    assert_scalar_close(&format!("n1={n1} n2={n2} m={m}"), expected, whole, 1.0e-12, 0.0);

                    let split = 0.7;
                    let north = pn1m1pn2m2(0.0, split, n1, m, n2, m, &pnmj).expect("north");
                    let south = pn1m1pn2m2(split, PI, n1, m, n2, m, &pnmj).expect("south");
                    assert_scalar_close("split", whole, north + south, 1.0e-12, 0.0);
                }
            }
        }
    }

    #[test]
    fn spherical_harmonics_are_orthonormal_over_quadrants() {
        let nmax = 4;
        let pnmj = Pnmj::new(nmax, PnmjOrdering::Mjn);
        let quadrants = [
            (0.0, PI_2, 0.0, PI),
            (PI_2, PI, 0.0, PI),
            (0.0, PI_2, PI, 2.0 * PI),
            (PI_2, PI, PI, 2.0 * PI),
        ];
        for n1 in 0..=nmax {
            for m1 in 0..=n1 {
                for n2 in 0..=nmax {
                    for m2 in 0..=n2 {
                        for (i1, i2) in [(false, false), (false, true), (true, false), (true, true)] {
                            let expected = if i1 == i2 && n1 == n2 && m1 == m2 && !(i1 && m1 == 0) {
                                FOUR_PI
                            } else {
                                0.0
                            };
                            let parts: Vec<f64> = quadrants
                                .iter()
                                .map(|&(c0, c1, l0, l1)| {
                                    yi1n1m1yi2n2m2(c0, c1, l0, l1, i1, n1, m1, i2, n2, m2, &pnmj)
                                        .expect("integral")
                                })
                                .collect();
                            assert_scalar_close(
                                &format!("({i1},{n1},{m1}) x ({i2},{n2},{m2})"),
                                expected,
                                stable_sum(&parts),
                                1.0e-11,
                                0.0,
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let pnmj = Pnmj::new(3, PnmjOrdering::Mnj);
        assert!(pn1m1pn2m2(1.0, 0.5, 1, 0, 1, 0, &pnmj).is_err());
        assert!(pn1m1pn2m2(0.0, 1.0, 4, 0, 1, 0, &pnmj).is_err());
        assert!(pn1m1pn2m2(0.0, 1.0, 2, 3, 1, 0, &pnmj).is_err());
        let error = yi1n1m1yi2n2m2(0.0, 1.0, 2.0, 1.0, false, 1, 0, false, 1, 0, &pnmj)
            .expect_err("reversed longitudes");
        assert_eq!(error.code(), "INPUT.INTEG_BOUNDS");
    }
}
