//! Numeric constants shared by the harmonic engines.

pub const PI: f64 = std::f64::consts::PI;
pub const PI2: f64 = 2.0 * PI;
pub const PI_2: f64 = std::f64::consts::FRAC_PI_2;
pub const FOUR_PI: f64 = 4.0 * PI;

/// Points with `|cos(lat)|` at or below this value are evaluated with the pole
/// formulas.
pub const POLE_COS_THRESHOLD: f64 = 1.0e-14;

/// Stopping tolerance of the Newton iteration for Gauss-Legendre nodes.
pub const GL_NEWTON_TOLERANCE: f64 = 1.0e-15;
pub const GL_NEWTON_MAX_ITER: usize = 100;

/// Largest element count of a single collective message.
pub const MAX_MESSAGE_COUNT: usize = i32::MAX as usize;

/// Highest derivative order handled by the guru synthesis.
pub const MAX_DERIVATIVE_ORDER: usize = 2;

#[cfg(test)]
mod tests {
    use super::{FOUR_PI, PI, PI2, PI_2};

    #[test]
    fn constants_match_expected_relationships() {
        assert!((PI2 - 2.0 * PI).abs() <= f64::EPSILON);
        assert!((2.0 * PI_2 - PI).abs() <= f64::EPSILON);
        assert!((FOUR_PI - 2.0 * PI2).abs() <= f64::EPSILON);
    }
}
