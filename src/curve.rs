//! Fitted calibration curves.
//!
//! Each rail can carry a degree-4 polynomial fitted against a bench reference
//! meter. A disabled higher-order term is expressed as a zero coefficient, and
//! evaluation falls back to the next lower degree so the fit behaves exactly
//! like the lower-order polynomial it reduces to.

/// Inputs below this raw threshold are treated as "no signal" and evaluate to
/// exactly 0, suppressing near-zero extrapolation artifacts of the fit.
pub const SIGNAL_FLOOR: f32 = 0.5;

/// A fitted polynomial of degree <= 4: `y = x4*x^4 + x3*x^3 + x2*x^2 + x1*x + offset`.
///
/// The all-zero default means "curve disabled" and evaluates to 0 everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationCurve {
    pub x4: f32,
    pub x3: f32,
    pub x2: f32,
    pub x1: f32,
    pub offset: f32,
}

impl CalibrationCurve {
    pub const fn new(x4: f32, x3: f32, x2: f32, x1: f32, offset: f32) -> Self {
        Self { x4, x3, x2, x1, offset }
    }

    /// A linear curve, the common case for a well-behaved front end.
    pub const fn linear(x1: f32, offset: f32) -> Self {
        Self::new(0.0, 0.0, 0.0, x1, offset)
    }

    /// Evaluate the curve at `x`.
    ///
    /// The highest coefficient that is exactly zero drops the effective degree
    /// (quartic -> cubic -> quadratic -> linear), so zero coefficients above
    /// the leading one cannot perturb the result. Evaluation is in Horner form
    /// at the effective degree; given the same `f32` inputs the result is
    /// reproducible bit for bit.
    pub fn evaluate(&self, x: f32) -> f32 {
        if x < SIGNAL_FLOOR {
            return 0.0;
        }

        if self.x4 != 0.0 {
            (((self.x4 * x + self.x3) * x + self.x2) * x + self.x1) * x + self.offset
        } else if self.x3 != 0.0 {
            ((self.x3 * x + self.x2) * x + self.x1) * x + self.offset
        } else if self.x2 != 0.0 {
            (self.x2 * x + self.x1) * x + self.offset
        } else {
            self.x1 * x + self.offset
        }
    }
}
