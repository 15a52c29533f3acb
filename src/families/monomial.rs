use crate::basis::{BasisError, BasisFamily, derivative_exponent, fill_design_matrix};
use crate::domain::Domain;
use crate::penalty::{
    PenaltyOptions, checked_difference, checked_value, closed_form_or_quadrature,
    composite_quadrature_gram, symmetric_from_upper,
};
use crate::quadrature::MAX_GAUSS_LEGENDRE_POINTS;
use ndarray::{Array2, ArrayView1};
use std::collections::HashSet;

/// Monomial basis `B_k(t) = t^(e_k)`.
///
/// Defined on all of ℝ: points outside the domain are evaluated by the same
/// polynomial. The `d`-th derivative is `[e_k]_d t^(e_k - d)`, identically zero
/// once `d > e_k`.
#[derive(Debug, Clone, PartialEq)]
pub struct MonomialBasis {
    domain: Domain,
    exponents: Vec<usize>,
}

impl MonomialBasis {
    /// Basis `1, t, ..., t^(basis_size - 1)`.
    pub fn new(domain: Domain, basis_size: usize) -> Result<Self, BasisError> {
        Self::with_exponents(domain, (0..basis_size).collect())
    }

    /// Basis with explicit, distinct exponents, kept in the given order.
    pub fn with_exponents(domain: Domain, exponents: Vec<usize>) -> Result<Self, BasisError> {
        if exponents.is_empty() {
            return Err(BasisError::InvalidParameters(
                "monomial basis needs at least one exponent".to_string(),
            ));
        }
        if let Some(&e) = exponents.iter().find(|&&e| i32::try_from(e).is_err()) {
            return Err(BasisError::InvalidParameters(format!(
                "monomial exponent {e} is too large"
            )));
        }
        let mut seen = HashSet::with_capacity(exponents.len());
        if let Some(&dup) = exponents.iter().find(|&&e| !seen.insert(e)) {
            return Err(BasisError::InvalidParameters(format!(
                "monomial exponent {dup} appears more than once"
            )));
        }
        Ok(Self { domain, exponents })
    }

    pub fn exponents(&self) -> &[usize] {
        &self.exponents
    }

    fn derivative_row(&self, t: f64, derivative_order: usize, row: &mut [f64]) {
        for (value, &e) in row.iter_mut().zip(&self.exponents) {
            *value = if derivative_order > e {
                0.0
            } else {
                falling_factorial(e, derivative_order) * t.powi((e - derivative_order) as i32)
            };
        }
    }

    fn closed_form_penalty(
        &self,
        derivative_order: usize,
        options: &PenaltyOptions,
    ) -> Result<Array2<f64>, BasisError> {
        let q = derivative_order;
        let (a, b) = (self.domain.lower(), self.domain.upper());
        symmetric_from_upper(self.exponents.len(), |i, j| {
            let (ei, ej) = (self.exponents[i], self.exponents[j]);
            if ei < q || ej < q {
                return Ok(0.0);
            }
            let p = ei + ej - 2 * q + 1;
            let p_i32 = i32::try_from(p).map_err(|_| {
                BasisError::NumericalInstability(format!(
                    "monomial penalty power {p} is out of range"
                ))
            })?;
            let context = format!("monomial penalty entry ({i}, {j})");
            let span = checked_difference(
                b.powi(p_i32),
                a.powi(p_i32),
                options.cancellation_tolerance,
                &context,
            )?;
            let coefficient = falling_factorial(ei, q) * falling_factorial(ej, q);
            checked_value(coefficient * span / p as f64, &context)
        })
    }
}

/// `[n]_d = n (n-1) ... (n-d+1)`, zero when `d > n`.
fn falling_factorial(n: usize, d: usize) -> f64 {
    if d > n {
        return 0.0;
    }
    ((n - d + 1)..=n).fold(1.0, |acc, k| acc * k as f64)
}

impl BasisFamily for MonomialBasis {
    fn family_name(&self) -> &'static str {
        "monomial"
    }

    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn basis_size(&self) -> usize {
        self.exponents.len()
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
        Ok(fill_design_matrix(
            points,
            self.basis_size(),
            || (),
            |_, t, row| self.derivative_row(t, derivative_order, row),
        ))
    }

    fn penalty_matrix_with(
        &self,
        derivative_order: usize,
        options: &PenaltyOptions,
    ) -> Result<Array2<f64>, BasisError> {
        derivative_exponent(derivative_order)?;
        closed_form_or_quadrature(
            self.family_name(),
            derivative_order,
            options,
            || self.closed_form_penalty(derivative_order, options),
            || {
                // Exact for the highest-degree product when the table allows it.
                let max_exponent = self.exponents.iter().copied().max().unwrap_or(0);
                let exact_points = max_exponent.saturating_sub(derivative_order) + 1;
                let points = options
                    .quadrature_points
                    .max(exact_points)
                    .min(MAX_GAUSS_LEGENDRE_POINTS);
                composite_quadrature_gram(
                    &self.domain,
                    self.basis_size(),
                    points,
                    options.fallback_subintervals,
                    |t, row| self.derivative_row(t, derivative_order, row),
                )
            },
        )
    }
}
