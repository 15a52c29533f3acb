use crate::basis::{BasisError, BasisFamily, derivative_exponent, fill_design_matrix};
use crate::domain::Domain;
use crate::penalty::{
    PenaltyOptions, checked_value, closed_form_or_quadrature, composite_quadrature_gram,
    symmetric_from_upper,
};
use ndarray::{Array2, ArrayView1};

/// Exponential basis `B_k(t) = exp(r_k t)` with real, distinct rates.
///
/// Defined on all of ℝ. Large `|r_k t|` overflows to infinity (or underflows to
/// zero) during evaluation; that is a limit of `f64`, not an error, and the
/// values are returned as computed. Penalty computation does report it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBasis {
    domain: Domain,
    rates: Vec<f64>,
}

impl ExponentialBasis {
    pub fn new(domain: Domain, rates: Vec<f64>) -> Result<Self, BasisError> {
        if rates.is_empty() {
            return Err(BasisError::InvalidParameters(
                "exponential basis needs at least one rate".to_string(),
            ));
        }
        if let Some(&r) = rates.iter().find(|r| !r.is_finite()) {
            return Err(BasisError::InvalidParameters(format!(
                "exponential rate {r} is not finite"
            )));
        }
        for (i, &r) in rates.iter().enumerate() {
            if rates[..i].contains(&r) {
                return Err(BasisError::InvalidParameters(format!(
                    "exponential rate {r} appears more than once"
                )));
            }
        }
        Ok(Self { domain, rates })
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    fn derivative_row(&self, t: f64, power: i32, row: &mut [f64]) {
        for (value, &r) in row.iter_mut().zip(&self.rates) {
            *value = r.powi(power) * (r * t).exp();
        }
    }

    /// `∫_a^b r_i^q r_j^q exp((r_i + r_j) t) dt`, using `expm1` so that nearly
    /// opposite rates do not cancel.
    fn closed_form_penalty(&self, power: i32) -> Result<Array2<f64>, BasisError> {
        let a = self.domain.lower();
        let width = self.domain.width();
        symmetric_from_upper(self.rates.len(), |i, j| {
            let (ri, rj) = (self.rates[i], self.rates[j]);
            let coefficient = ri.powi(power) * rj.powi(power);
            if coefficient == 0.0 {
                return Ok(0.0);
            }
            let s = ri + rj;
            let integral = if s == 0.0 {
                width
            } else {
                (s * a).exp() * (s * width).exp_m1() / s
            };
            checked_value(
                coefficient * integral,
                &format!("exponential penalty entry ({i}, {j})"),
            )
        })
    }
}

impl BasisFamily for ExponentialBasis {
    fn family_name(&self) -> &'static str {
        "exponential"
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn basis_size(&self) -> usize {
        self.rates.len()
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
            self.basis_size(),
            || (),
            |_, t, row| self.derivative_row(t, power, row),
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
            || self.closed_form_penalty(power),
            || {
                composite_quadrature_gram(
                    &self.domain,
                    self.basis_size(),
                    options.quadrature_points,
                    options.fallback_subintervals,
                    |t, row| self.derivative_row(t, power, row),
                )
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    #[test]
    fn test_values_and_derivatives() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let basis = ExponentialBasis::new(domain, vec![0.0, 1.0, -2.0]).unwrap();
        let t = 0.7;
        let values = basis.evaluate(array![t].view(), 0).unwrap();
        assert_abs_diff_eq!(values[[0, 0]], 1.0, epsilon = 1e-15);
        assert_relative_eq!(values[[0, 1]], t.exp(), epsilon = 1e-14);
        assert_relative_eq!(values[[0, 2]], (-2.0 * t).exp(), epsilon = 1e-14);

        let d3 = basis.evaluate(array![t].view(), 3).unwrap();
        assert_eq!(d3[[0, 0]], 0.0);
        assert_relative_eq!(d3[[0, 1]], t.exp(), epsilon = 1e-14);
        assert_relative_eq!(d3[[0, 2]], -8.0 * (-2.0 * t).exp(), epsilon = 1e-14);
    }

    #[test]
    fn test_outside_domain_is_evaluated() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let basis = ExponentialBasis::new(domain, vec![1.0]).unwrap();
        let values = basis.evaluate(array![-1.0].view(), 0).unwrap();
        assert_relative_eq!(values[[0, 0]], (-1.0f64).exp(), epsilon = 1e-14);
    }

    #[test]
    fn test_overflow_is_returned_not_raised() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let basis = ExponentialBasis::new(domain, vec![1000.0]).unwrap();
        let values = basis.evaluate(array![1.0].view(), 0).unwrap();
        assert!(values[[0, 0]].is_infinite());
    }

    #[test]
    fn test_invalid_rates_are_rejected() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        assert!(ExponentialBasis::new(domain, vec![]).is_err());
        assert!(ExponentialBasis::new(domain, vec![1.0, f64::NAN]).is_err());
        assert!(ExponentialBasis::new(domain, vec![1.0, 2.0, 1.0]).is_err());
    }

    #[test]
    fn test_penalty_matches_closed_form() {
        let domain = Domain::new(-1.0, 2.0).unwrap();
        let basis = ExponentialBasis::new(domain, vec![0.5, -0.5, 1.5]).unwrap();
        let r = basis.penalty_matrix(1).unwrap();

        // Opposite rates: ∫ (0.5)(-0.5) dt over a width-3 interval.
        assert_relative_eq!(r[[0, 1]], -0.25 * 3.0, epsilon = 1e-14);
        // ∫ 0.25 e^t dt from -1 to 2
        assert_relative_eq!(
            r[[0, 0]],
            0.25 * (2.0f64.exp() - (-1.0f64).exp()),
            epsilon = 1e-13
        );
        // ∫ 0.75 e^(2t) dt
        assert_relative_eq!(
            r[[0, 2]],
            0.75 * ((4.0f64).exp() - (-2.0f64).exp()) / 2.0,
            epsilon = 1e-13
        );
        assert_eq!(r[[2, 0]], r[[0, 2]]);
    }

    #[test]
    fn test_closed_form_and_quadrature_agree() {
        let domain = Domain::new(0.0, 1.5).unwrap();
        let basis = ExponentialBasis::new(domain, vec![-3.0, 0.2, 2.0]).unwrap();
        for q in 0..=2 {
            let exact = basis.closed_form_penalty(q).unwrap();
            let numeric = composite_quadrature_gram(&domain, 3, 16, 8, |t, row| {
                basis.derivative_row(t, q, row)
            })
            .unwrap();
            for (e, n) in exact.iter().zip(numeric.iter()) {
                assert_relative_eq!(*e, *n, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_overflowing_penalty_is_reported() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let basis = ExponentialBasis::new(domain, vec![400.0]).unwrap();
        assert!(matches!(
            basis.penalty_matrix(0),
            Err(BasisError::NumericalInstability(_))
        ));
    }
}
