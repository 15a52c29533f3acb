use crate::basis::{BasisError, BasisFamily, derivative_exponent, fill_design_matrix};
use crate::domain::Domain;
use crate::penalty::{
    PenaltyOptions, checked_value, closed_form_or_quadrature, composite_quadrature_gram,
    symmetric_from_upper,
};
use ndarray::{Array2, ArrayView1};
use std::f64::consts::PI;

/// Unnormalized Fourier basis with period `P`:
///
/// - `B_0(t) = 1`
/// - `B_{2m-1}(t) = sin(ω_m t)`, `B_{2m}(t) = cos(ω_m t)`, `ω_m = 2πm / P`
///
/// Any `basis_size >= 1` is accepted; an even size ends with a sine whose
/// cosine partner is omitted. Defined on all of ℝ.
#[derive(Debug, Clone, PartialEq)]
pub struct FourierBasis {
    domain: Domain,
    basis_size: usize,
    period: f64,
}

/// `amplitude * sin(omega * t + quarter_turns * π/2)`.
///
/// Every derivative of every Fourier basis function has this shape; the phase is
/// kept as a whole number of quarter turns so derivative phase shifts stay exact.
#[derive(Debug, Clone, Copy)]
struct Sinusoid {
    amplitude: f64,
    omega: f64,
    quarter_turns: u8,
}

impl FourierBasis {
    /// Basis whose period equals the domain width.
    pub fn new(domain: Domain, basis_size: usize) -> Result<Self, BasisError> {
        Self::with_period(domain, basis_size, domain.width())
    }

    pub fn with_period(domain: Domain, basis_size: usize, period: f64) -> Result<Self, BasisError> {
        if basis_size == 0 {
            return Err(BasisError::InvalidParameters(
                "Fourier basis needs at least one function".to_string(),
            ));
        }
        if !period.is_finite() || period <= 0.0 {
            return Err(BasisError::InvalidParameters(format!(
                "Fourier period must be finite and positive, got {period}"
            )));
        }
        Ok(Self {
            domain,
            basis_size,
            period,
        })
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    /// Harmonic number of basis function `k` (0 for the constant).
    fn harmonic(k: usize) -> usize {
        k.div_ceil(2)
    }

    fn angular_frequency(&self, harmonic: usize) -> f64 {
        2.0 * PI * harmonic as f64 / self.period
    }

    fn derivative_row(&self, t: f64, derivative_order: usize, power: i32, row: &mut [f64]) {
        row[0] = if derivative_order == 0 { 1.0 } else { 0.0 };
        let quarter = derivative_order % 4;
        for k in 1..self.basis_size {
            let omega = self.angular_frequency(Self::harmonic(k));
            let (sin, cos) = (omega * t).sin_cos();
            // sin -> cos -> -sin -> -cos, and cos -> -sin -> -cos -> sin.
            let cycled = if k % 2 == 1 {
                [sin, cos, -sin, -cos][quarter]
            } else {
                [cos, -sin, -cos, sin][quarter]
            };
            row[k] = omega.powi(power) * cycled;
        }
    }

    fn sinusoid(&self, k: usize, derivative_order: usize, power: i32) -> Sinusoid {
        let shift = (derivative_order % 4) as u8;
        if k == 0 {
            // 1 = sin(0·t + π/2)
            return Sinusoid {
                amplitude: if derivative_order == 0 { 1.0 } else { 0.0 },
                omega: 0.0,
                quarter_turns: 1,
            };
        }
        let omega = self.angular_frequency(Self::harmonic(k));
        let base = if k % 2 == 1 { 0 } else { 1 };
        Sinusoid {
            amplitude: omega.powi(power),
            omega,
            quarter_turns: (base + shift) % 4,
        }
    }

    /// Exact integrals over an arbitrary domain, reducing to the usual
    /// orthogonality relations when the domain spans a whole number of periods.
    fn closed_form_penalty(
        &self,
        derivative_order: usize,
        power: i32,
    ) -> Result<Array2<f64>, BasisError> {
        let (a, b) = (self.domain.lower(), self.domain.upper());
        symmetric_from_upper(self.basis_size, |i, j| {
            let fi = self.sinusoid(i, derivative_order, power);
            let fj = self.sinusoid(j, derivative_order, power);
            let coefficient = fi.amplitude * fj.amplitude;
            if coefficient == 0.0 {
                return Ok(0.0);
            }
            // sin(x + φ) sin(y + ψ) = ½ [cos(x - y + φ - ψ) - cos(x + y + φ + ψ)]
            let difference = integrate_shifted_cosine(
                fi.omega - fj.omega,
                (4 + fi.quarter_turns - fj.quarter_turns) % 4,
                a,
                b,
            );
            let sum = integrate_shifted_cosine(
                fi.omega + fj.omega,
                (fi.quarter_turns + fj.quarter_turns) % 4,
                a,
                b,
            );
            checked_value(
                0.5 * coefficient * (difference - sum),
                &format!("Fourier penalty entry ({i}, {j})"),
            )
        })
    }
}

/// `∫_a^b cos(c t + quarter_turns * π/2) dt`, written with product-to-sum
/// forms so that large `c·a`, `c·b` do not cancel.
fn integrate_shifted_cosine(c: f64, quarter_turns: u8, a: f64, b: f64) -> f64 {
    if c == 0.0 {
        let level = [1.0, 0.0, -1.0, 0.0][quarter_turns as usize];
        return level * (b - a);
    }
    let mid = 0.5 * c * (a + b);
    let half = (0.5 * c * (b - a)).sin();
    // ∫ cos(ct) = 2 cos(mid) half / c ; ∫ sin(ct) = 2 sin(mid) half / c
    let cos_part = 2.0 * mid.cos() * half / c;
    let sin_part = 2.0 * mid.sin() * half / c;
    // cos(x + kπ/2) = cos x, -sin x, -cos x, sin x
    match quarter_turns {
        0 => cos_part,
        1 => -sin_part,
        2 => -cos_part,
        _ => sin_part,
    }
}

impl BasisFamily for FourierBasis {
    fn family_name(&self) -> &'static str {
        "fourier"
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn basis_size(&self) -> usize {
        self.basis_size
    }

    fn max_derivative_order(&self) -> usize {
        i32::MAX as usize
    }

    fn evaluate(
        &self,
        points: ArrayView1<f64>,
        derivative_order: usize,
    ) -> Result<Array2<f64>, BasisError> {
        self.check_derivative_order(derivative_order)?;
        let power = derivative_exponent(derivative_order)?;
        Ok(fill_design_matrix(
            points,
            self.basis_size,
            || (),
            |_, t, row| self.derivative_row(t, derivative_order, power, row),
        ))
    }

    fn penalty_matrix_with(
        &self,
        derivative_order: usize,
        options: &PenaltyOptions,
    ) -> Result<Array2<f64>, BasisError> {
        let power = derivative_exponent(derivative_order)?;
        closed_form_or_quadrature(
            self.family_name(),
            derivative_order,
            options,
            || self.closed_form_penalty(derivative_order, power),
            || {
                composite_quadrature_gram(
                    &self.domain,
                    self.basis_size,
                    options.quadrature_points,
                    options.fallback_subintervals,
                    |t, row| self.derivative_row(t, derivative_order, power, row),
                )
            },
        )
    }
}
