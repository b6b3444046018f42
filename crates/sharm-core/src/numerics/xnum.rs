//! X-numbers: an `f64` mantissa paired with an integer exponent in base
//! `2^960`, so sectorial Legendre values stay representable far below the
//! `f64` underflow limit.

pub const BIG: f64 = f64::from_bits((960 + 1023) << 52);
pub const BIGI: f64 = f64::from_bits((1023 - 960) << 52);
pub const BIGS: f64 = f64::from_bits((480 + 1023) << 52);
pub const BIGSI: f64 = f64::from_bits((1023 - 480) << 52);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XNum {
    pub value: f64,
    pub exponent: i32,
}

impl XNum {
    pub const fn new(value: f64) -> Self {
        Self { value, exponent: 0 }
    }

    pub const fn with_exponent(value: f64, exponent: i32) -> Self {
        Self { value, exponent }
    }

    /// Keeps the mantissa within `[2^-480, 2^480)` in magnitude.
    pub fn normalize(self) -> Self {
        let Self {
            mut value,
            mut exponent,
        } = self;
        let w = value.abs();
        if w == 0.0 {
            return Self::new(0.0);
        }
        if w >= BIGS {
            value *= BIGI;
            exponent += 1;
        } else if w < BIGSI {
            value *= BIG;
            exponent -= 1;
        }
        Self { value, exponent }
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::with_exponent(self.value * factor, self.exponent).normalize()
    }

    pub fn to_f64(self) -> f64 {
        match self.exponent {
            0 => self.value,
            -1 => self.value * BIGI,
            e if e < -1 => 0.0,
            1 => self.value * BIG,
            _ => self.value.signum() * f64::INFINITY,
        }
    }

    /// `f * x + g * y` with exponent alignment.
    pub fn lsum2(f: f64, x: Self, g: f64, y: Self) -> Self {
        // A zero carries no magnitude, so its exponent must not win the alignment.
        if x.value == 0.0 {
            return y.scale(g);
        }
        if y.value == 0.0 {
            return x.scale(f);
        }
        let id = x.exponent - y.exponent;
        let (value, exponent) = match id {
            0 => (f * x.value + g * y.value, x.exponent),
            1 => (f * x.value + g * (y.value * BIGI), x.exponent),
            -1 => (g * y.value + f * (x.value * BIGI), y.exponent),
            d if d > 1 => (f * x.value, x.exponent),
            _ => (g * y.value, y.exponent),
        };
        Self::with_exponent(value, exponent).normalize()
    }

    pub fn is_representable(self) -> bool {
        self.exponent == 0
    }
}
