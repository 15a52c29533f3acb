use crate::basis::{BasisError, BasisFamily};
use crate::domain::Domain;
use crate::quadrature::{MAX_GAUSS_LEGENDRE_POINTS, gauss_legendre};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

pub fn default_quadrature_points() -> usize {
    16
}

pub fn default_fallback_subintervals() -> usize {
    64
}

pub fn default_allow_quadrature_fallback() -> bool {
    true
}

pub fn default_cancellation_tolerance() -> f64 {
    1e-10
}

/// Knobs for penalty matrix computation.
///
/// They only affect the numerical paths: closed-form penalties ignore them
/// unless the closed form is abandoned, and B-spline penalties always use a
/// rule that is exact for the piecewise-polynomial integrand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyOptions {
    /// Gauss-Legendre points per sub-interval when a closed form falls back to quadrature.
    #[serde(default = "default_quadrature_points")]
    pub quadrature_points: usize,
    /// Number of equal sub-intervals of the domain used by the fallback.
    #[serde(default = "default_fallback_subintervals")]
    pub fallback_subintervals: usize,
    /// When false, an unstable closed form is reported instead of retried numerically.
    #[serde(default = "default_allow_quadrature_fallback")]
    pub allow_quadrature_fallback: bool,
    /// A closed-form difference `hi - lo` whose magnitude is at most this
    /// fraction of `max(|hi|, |lo|)` is treated as catastrophic cancellation.
    #[serde(default = "default_cancellation_tolerance")]
    pub cancellation_tolerance: f64,
}

impl Default for PenaltyOptions {
    fn default() -> Self {
        Self {
            quadrature_points: default_quadrature_points(),
            fallback_subintervals: default_fallback_subintervals(),
            allow_quadrature_fallback: default_allow_quadrature_fallback(),
            cancellation_tolerance: default_cancellation_tolerance(),
        }
    }
}

impl PenaltyOptions {
    pub fn validate(&self) -> Result<(), BasisError> {
        if self.quadrature_points == 0 || self.quadrature_points > MAX_GAUSS_LEGENDRE_POINTS {
            return Err(BasisError::InvalidParameters(format!(
                "quadrature_points must be in 1..={}, got {}",
                MAX_GAUSS_LEGENDRE_POINTS, self.quadrature_points
            )));
        }
        if self.fallback_subintervals == 0 {
            return Err(BasisError::InvalidParameters(
                "fallback_subintervals must be at least 1".to_string(),
            ));
        }
        if !self.cancellation_tolerance.is_finite() || self.cancellation_tolerance < 0.0 {
            return Err(BasisError::InvalidParameters(format!(
                "cancellation_tolerance must be finite and non-negative, got {}",
                self.cancellation_tolerance
            )));
        }
        Ok(())
    }
}

/// Computes roughness penalty matrices
/// `R(q)[i, j] = ∫ B_i^(q)(t) B_j^(q)(t) dt` over a basis domain.
///
/// Each family supplies its own kernel (closed forms for monomial, exponential
/// and Fourier systems, span-wise Gauss-Legendre quadrature for B-splines);
/// this type validates the request and the returned Gram matrix.
#[derive(Debug, Clone, Default)]
pub struct PenaltyMatrixComputer {
    options: PenaltyOptions,
}

impl PenaltyMatrixComputer {
    pub fn new(options: PenaltyOptions) -> Result<Self, BasisError> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &PenaltyOptions {
        &self.options
    }

    /// Returns a fresh, symmetric `basis_size x basis_size` penalty matrix.
    pub fn compute<B: BasisFamily + ?Sized>(
        &self,
        basis: &B,
        derivative_order: usize,
    ) -> Result<Array2<f64>, BasisError> {
        basis.check_derivative_order(derivative_order)?;
        log::debug!(
            "Computing {} penalty matrix: basis_size={}, derivative_order={}",
            basis.family_name(),
            basis.basis_size(),
            derivative_order
        );
        let gram = basis.penalty_matrix_with(derivative_order, &self.options)?;
        verify_gram_matrix(&gram, basis.basis_size())?;
        Ok(gram)
    }
}

/// Cheap sanity checks every Gram matrix must pass: square of the right size,
/// finite, exactly symmetric, non-negative diagonal.
fn verify_gram_matrix(gram: &Array2<f64>, basis_size: usize) -> Result<(), BasisError> {
    if gram.dim() != (basis_size, basis_size) {
        return Err(BasisError::NumericalInstability(format!(
            "penalty matrix has shape {:?}, expected ({basis_size}, {basis_size})",
            gram.dim()
        )));
    }
    ensure_finite(gram, "penalty matrix")?;
    let scale = gram
        .diag()
        .iter()
        .fold(0.0f64, |acc, &v| acc.max(v.abs()))
        .max(f64::MIN_POSITIVE);
    for i in 0..basis_size {
        if gram[[i, i]] < -1e-12 * scale {
            return Err(BasisError::NumericalInstability(format!(
                "penalty matrix diagonal entry {i} is negative ({:.3e})",
                gram[[i, i]]
            )));
        }
        for j in (i + 1)..basis_size {
            if gram[[i, j]] != gram[[j, i]] {
                return Err(BasisError::NumericalInstability(format!(
                    "penalty matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn ensure_finite(matrix: &Array2<f64>, what: &str) -> Result<(), BasisError> {
    if let Some(((i, j), v)) = matrix.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(BasisError::NumericalInstability(format!(
            "{what} entry ({i}, {j}) is not finite ({v})"
        )));
    }
    Ok(())
}

/// Copies the upper triangle onto the lower one.
pub(crate) fn mirror_upper_triangle(matrix: &mut Array2<f64>) {
    let n = matrix.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            matrix[[j, i]] = matrix[[i, j]];
        }
    }
}

/// Builds a symmetric matrix from `entry(i, j)` evaluated for `j >= i` only.
pub(crate) fn symmetric_from_upper<F>(n: usize, mut entry: F) -> Result<Array2<f64>, BasisError>
where
    F: FnMut(usize, usize) -> Result<f64, BasisError>,
{
    let mut matrix = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in i..n {
            matrix[[i, j]] = entry(i, j)?;
        }
    }
    mirror_upper_triangle(&mut matrix);
    Ok(matrix)
}

/// `hi - lo`, rejected when the subtraction cancels almost every significant digit.
///
/// An exactly zero difference is accepted: it arises from symmetric domains,
/// where the true integral vanishes.
pub(crate) fn checked_difference(
    hi: f64,
    lo: f64,
    tolerance: f64,
    context: &str,
) -> Result<f64, BasisError> {
    let diff = hi - lo;
    if !diff.is_finite() {
        return Err(BasisError::NumericalInstability(format!(
            "{context}: closed form overflowed ({hi:e} - {lo:e})"
        )));
    }
    let scale = hi.abs().max(lo.abs());
    if diff != 0.0 && diff.abs() <= tolerance * scale {
        return Err(BasisError::NumericalInstability(format!(
            "{context}: catastrophic cancellation ({hi:e} - {lo:e} = {diff:e})"
        )));
    }
    Ok(diff)
}

pub(crate) fn checked_value(value: f64, context: &str) -> Result<f64, BasisError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(BasisError::NumericalInstability(format!(
            "{context}: closed form produced a non-finite value ({value})"
        )))
    }
}

/// Runs `closed_form`; if it reports `NumericalInstability` and the options
/// allow it, retries with `quadrature`.
pub(crate) fn closed_form_or_quadrature<E, Q>(
    family: &str,
    derivative_order: usize,
    options: &PenaltyOptions,
    closed_form: E,
    quadrature: Q,
) -> Result<Array2<f64>, BasisError>
where
    E: FnOnce() -> Result<Array2<f64>, BasisError>,
    Q: FnOnce() -> Result<Array2<f64>, BasisError>,
{
    match closed_form() {
        Err(BasisError::NumericalInstability(reason)) if options.allow_quadrature_fallback => {
            log::warn!(
                "{} penalty (derivative order {}): closed form abandoned ({}); using Gauss-Legendre quadrature",
                family,
                derivative_order,
                reason
            );
            quadrature()
        }
        other => other,
    }
}

/// Composite Gauss-Legendre Gram matrix over `subintervals` equal pieces of the domain.
///
/// `derivative_row(t, row)` must write every basis derivative at `t` into `row`.
pub(crate) fn composite_quadrature_gram<F>(
    domain: &Domain,
    num_basis: usize,
    points: usize,
    subintervals: usize,
    mut derivative_row: F,
) -> Result<Array2<f64>, BasisError>
where
    F: FnMut(f64, &mut [f64]),
{
    let rule = gauss_legendre(points.clamp(1, MAX_GAUSS_LEGENDRE_POINTS))?;
    let subintervals = subintervals.max(1);
    let h = domain.width() / subintervals as f64;

    let mut gram = Array2::<f64>::zeros((num_basis, num_basis));
    let mut row = vec![0.0; num_basis];
    for s in 0..subintervals {
        let a = domain.lower() + s as f64 * h;
        let b = if s + 1 == subintervals {
            domain.upper()
        } else {
            domain.lower() + (s + 1) as f64 * h
        };
        for (t, w) in rule.mapped(a, b) {
            derivative_row(t, &mut row);
            for i in 0..num_basis {
                let wi = w * row[i];
                if wi == 0.0 {
                    continue;
                }
                for j in i..num_basis {
                    gram[[i, j]] += wi * row[j];
                }
            }
        }
    }
    mirror_upper_triangle(&mut gram);
    ensure_finite(&gram, "quadrature penalty matrix")?;
    Ok(gram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_options_are_valid() {
        let options = PenaltyOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.quadrature_points, 16);
        assert_eq!(options.fallback_subintervals, 64);
        assert!(options.allow_quadrature_fallback);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let bad_points = PenaltyOptions {
            quadrature_points: 0,
            ..PenaltyOptions::default()
        };
        assert!(matches!(
            PenaltyMatrixComputer::new(bad_points),
            Err(BasisError::InvalidParameters(_))
        ));

        let bad_tolerance = PenaltyOptions {
            cancellation_tolerance: -1.0,
            ..PenaltyOptions::default()
        };
        assert!(bad_tolerance.validate().is_err());

        let bad_subintervals = PenaltyOptions {
            fallback_subintervals: 0,
            ..PenaltyOptions::default()
        };
        assert!(bad_subintervals.validate().is_err());
    }

    #[test]
    fn test_checked_difference_flags_cancellation_but_not_exact_zero() {
        assert_eq!(checked_difference(1.0, -1.0, 1e-10, "t").unwrap(), 2.0);
        assert_eq!(checked_difference(1.0, 1.0, 1e-10, "t").unwrap(), 0.0);
        assert!(matches!(
            checked_difference(1e8 + 1e-4, 1e8, 1e-10, "t"),
            Err(BasisError::NumericalInstability(_))
        ));
        assert!(matches!(
            checked_difference(f64::INFINITY, 1.0, 1e-10, "t"),
            Err(BasisError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_closed_form_or_quadrature_respects_fallback_switch() {
        let unstable = || Err(BasisError::NumericalInstability("overflow".to_string()));
        let numeric = || Ok(Array2::<f64>::eye(2));

        let options = PenaltyOptions::default();
        let result = closed_form_or_quadrature("test", 0, &options, unstable, numeric).unwrap();
        assert_eq!(result, Array2::<f64>::eye(2));

        let strict = PenaltyOptions {
            allow_quadrature_fallback: false,
            ..PenaltyOptions::default()
        };
        assert!(matches!(
            closed_form_or_quadrature("test", 0, &strict, unstable, numeric),
            Err(BasisError::NumericalInstability(_))
        ));
    }

    #[test]
    fn test_composite_quadrature_gram_for_linear_functions() {
        // Basis {1, t} on [0, 2]: Gram = [[2, 2], [2, 8/3]].
        let domain = Domain::new(0.0, 2.0).unwrap();
        let gram = composite_quadrature_gram(&domain, 2, 2, 3, |t, row| {
            row[0] = 1.0;
            row[1] = t;
        })
        .unwrap();
        assert_abs_diff_eq!(gram[[0, 0]], 2.0, epsilon = 1e-13);
        assert_abs_diff_eq!(gram[[0, 1]], 2.0, epsilon = 1e-13);
        assert_abs_diff_eq!(gram[[1, 0]], 2.0, epsilon = 1e-13);
        assert_abs_diff_eq!(gram[[1, 1]], 8.0 / 3.0, epsilon = 1e-13);
    }

    #[test]
    fn test_verify_gram_matrix_rejects_asymmetry_and_non_finite() {
        let mut gram = Array2::<f64>::eye(3);
        assert!(verify_gram_matrix(&gram, 3).is_ok());
        assert!(verify_gram_matrix(&gram, 2).is_err());

        gram[[0, 1]] = 0.5;
        assert!(verify_gram_matrix(&gram, 3).is_err());

        gram[[1, 0]] = 0.5;
        gram[[2, 2]] = f64::NAN;
        assert!(verify_gram_matrix(&gram, 3).is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: PenaltyOptions =
            serde_json::from_str(r#"{"quadrature_points": 24}"#).unwrap();
        assert_eq!(options.quadrature_points, 24);
        assert_eq!(options.fallback_subintervals, 64);
        assert!(options.allow_quadrature_fallback);
        assert_eq!(options.cancellation_tolerance, 1e-10);
    }
}
