use super::Shc;
use crate::domain::{HarmError, HarmResult};

impl Shc {
    /// Rescales every coefficient of degree `n` by
    /// `(mu / mu_new) * (r_new / r)^(n + 1)` and stores the new constants.
    pub fn rescale(&mut self, mu_new: f64, r_new: f64) -> HarmResult<()> {
        if !(r_new.is_finite() && r_new > 0.0) {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_RADIUS",
                format!("new reference radius must be positive and finite, got {r_new}"),
            ));
        }
        if !(mu_new.is_finite() && mu_new != 0.0) {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_MU",
                format!("new scaling constant must be finite and non-zero, got {mu_new}"),
            ));
        }

        let mu_ratio = self.mu / mu_new;
        let r_ratio = r_new / self.r;
        let mut factors = Vec::with_capacity(self.nmax + 1);
        let mut power = r_ratio;
        for _ in 0..=self.nmax {
            factors.push(mu_ratio * power);
            power *= r_ratio;
        }

        for m in 0..=self.nmax {
            if let Some((c, s)) = self.order_mut(m) {
                for (offset, (cnm, snm)) in c.iter_mut().zip(s.iter_mut()).enumerate() {
                    let factor = factors[m + offset];
                    *cnm *= factor;
                    *snm *= factor;
                }
            }
        }
        self.set_scaling(mu_new, r_new);
        tracing::debug!(nmax = self.nmax, mu = mu_new, r = r_new, "rescaled coefficients");
        Ok(())
    }

    /// Degree variances `sum_m C_nm^2 + S_nm^2` for `n = 0..=nmax`.
    ///
    /// Collective for distributed stores; every rank receives the full vector.
    pub fn dv(&self, nmax: usize) -> HarmResult<Vec<f64>> {
        self.check_truncation(nmax)?;
        let mut dv = vec![0.0; nmax + 1];
        for m in 0..=nmax {
            if let (Some(c), Some(s)) = (self.c_order(m), self.s_order(m)) {
                for n in m..=nmax {
                    dv[n] += c[n - m] * c[n - m] + s[n - m] * s[n - m];
                }
            }
        }
        self.reduce_degrees(&mut dv);
        Ok(dv)
    }

    /// Degree amplitudes, the square roots of [`Shc::dv`].
    pub fn da(&self, nmax: usize) -> HarmResult<Vec<f64>> {
        Ok(self.dv(nmax)?.into_iter().map(f64::sqrt).collect())
    }

    /// Difference degree variances between `self` and `other`.
    pub fn ddv(&self, other: &Shc, nmax: usize) -> HarmResult<Vec<f64>> {
        self.check_truncation(nmax)?;
        other.check_truncation(nmax)?;
        if self.is_distributed() != other.is_distributed() || self.chunks != other.chunks {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_LAYOUT",
                "both stores must share the same order distribution",
            ));
        }
        let mut ddv = vec![0.0; nmax + 1];
        for m in 0..=nmax {
            if let (Some(c1), Some(s1), Some(c2), Some(s2)) = (
                self.c_order(m),
                self.s_order(m),
                other.c_order(m),
                other.s_order(m),
            ) {
                for n in m..=nmax {
                    let dc = c1[n - m] - c2[n - m];
                    let ds = s1[n - m] - s2[n - m];
                    ddv[n] += dc * dc + ds * ds;
                }
            }
        }
        self.reduce_degrees(&mut ddv);
        Ok(ddv)
    }

    /// Difference degree amplitudes, the square roots of [`Shc::ddv`].
    pub fn dda(&self, other: &Shc, nmax: usize) -> HarmResult<Vec<f64>> {
        Ok(self.ddv(other, nmax)?.into_iter().map(f64::sqrt).collect())
    }

    fn check_truncation(&self, nmax: usize) -> HarmResult<()> {
        if nmax > self.nmax {
            return Err(HarmError::invalid_argument(
                "INPUT.NMAX",
                format!("requested degree {nmax} exceeds the store's nmax = {}", self.nmax),
            ));
        }
        Ok(())
    }

    fn reduce_degrees(&self, values: &mut [f64]) {
        if let Some(comm) = self.comm() {
            comm.all_reduce_sum_f64(values);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::modules::comm::LocalCluster;
    use crate::modules::shc::{Shc, distribute_orders};
    use crate::numerics::within_tolerance;

    fn sample(nmax: usize) -> Shc {
        let mut shc = Shc::calloc(nmax, 3.986004415e14, 6378136.3).expect("calloc");
        for n in 0..=nmax {
            for m in 0..=n {
                let c = 1.0e-6 * ((n * 7 + m * 3) % 11) as f64 / (n as f64 + 1.0);
                let s = -1.0e-6 * ((n * 5 + m) % 7) as f64 / (n as f64 + 1.0);
                shc.set_coeffs(n, m, c, s).expect("set");
            }
        }
        shc
    }

    #[test]
    fn rescale_round_trip_with_binary_factors_is_exact() {
        let original = sample(12);
        let mut shc = original.clone();
        shc.rescale(2.0 * original.mu(), 4.0 * original.r()).expect("rescale");
        shc.rescale(original.mu(), original.r()).expect("rescale back");
        for n in 0..=12 {
            for m in 0..=n {
                assert_eq!(shc.coeffs(n, m), original.coeffs(n, m));
            }
        }
    }

    #[test]
    fn rescale_applies_degree_law() {
        let mut shc = Shc::calloc(3, 1.0, 2.0).expect("calloc");
        shc.set_coeffs(3, 1, 1.0, 1.0).expect("set");
        shc.rescale(0.5, 4.0).expect("rescale");
        // (1 / 0.5) * (4 / 2)^4
        assert_eq!(shc.coeffs(3, 1), Some((32.0, 32.0)));
        assert!(shc.rescale(1.0, 0.0).is_err());
    }

    #[test]
    fn degree_amplitudes_are_square_roots_of_variances() {
        let shc = sample(9);
        let dv = shc.dv(9).expect("dv");
        let da = shc.da(9).expect("da");
        for (v, a) in dv.iter().zip(&da) {
            assert_eq!(v.sqrt(), *a);
        }
        assert!(shc.dv(10).is_err());
        let zero = shc.dda(&shc, 9).expect("dda");
        assert!(zero.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn distributed_degree_variances_match_local() {
        let full = sample(10);
        let expected = full.dv(10).expect("dv");
        let full_ref = &full;
        let results = LocalCluster::run(3, move |comm| {
            let chunks = distribute_orders(10, comm.rank(), comm.size(), 2);
            let local = Shc::distribute_from(full_ref, &chunks, comm).expect("distribute");
            local.dv(10).expect("dv")
        });
        for dv in results {
            for (e, a) in expected.iter().zip(&dv) {
                assert!(within_tolerance(*e, *a, 0.0, 1.0e-13, 1.0e-30), "{e} vs {a}");
            }
        }
    }
}
