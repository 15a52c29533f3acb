use crate::basis::{Basis, BasisError, BasisFamily};
use crate::domain::Domain;
use crate::families::{BSplineBasis, ExponentialBasis, FourierBasis, MonomialBasis};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Knot placement for a B-spline basis described in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BSplineKnotSpec {
    /// Full knot vector, including any repeated boundary knots.
    Provided(Vec<f64>),
    /// Clamped knots with equally spaced interior knots over the domain.
    Uniform { basis_size: usize },
}

/// Serializable description of a basis system, resolved against a domain by
/// [`build_basis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "family")]
pub enum BasisSpec {
    Monomial {
        #[serde(default)]
        basis_size: usize,
        /// Overrides `basis_size` when present.
        #[serde(default)]
        exponents: Option<Vec<usize>>,
    },
    Exponential {
        rates: Vec<f64>,
    },
    Fourier {
        basis_size: usize,
        /// Defaults to the domain width.
        #[serde(default)]
        period: Option<f64>,
    },
    #[serde(rename = "bspline")]
    BSpline {
        order: usize,
        knots: BSplineKnotSpec,
    },
}

/// Constructs the basis a [`BasisSpec`] describes on `domain`.
pub fn build_basis(domain: Domain, spec: &BasisSpec) -> Result<Basis, BasisError> {
    let basis: Basis = match spec {
        BasisSpec::Monomial {
            basis_size,
            exponents,
        } => match exponents {
            Some(exponents) => MonomialBasis::with_exponents(domain, exponents.clone())?.into(),
            None => MonomialBasis::new(domain, *basis_size)?.into(),
        },
        BasisSpec::Exponential { rates } => ExponentialBasis::new(domain, rates.clone())?.into(),
        BasisSpec::Fourier { basis_size, period } => match period {
            Some(period) => FourierBasis::with_period(domain, *basis_size, *period)?.into(),
            None => FourierBasis::new(domain, *basis_size)?.into(),
        },
        BasisSpec::BSpline { order, knots } => match knots {
            BSplineKnotSpec::Provided(knots) => {
                BSplineBasis::new(domain, *order, Array1::from_vec(knots.clone()))?.into()
            }
            BSplineKnotSpec::Uniform { basis_size } => {
                BSplineBasis::with_uniform_knots(domain, *order, *basis_size)?.into()
            }
        },
    };
    log::debug!(
        "built {} basis with {} functions on [{}, {}]",
        basis.family_name(),
        basis.basis_size(),
        domain.lower(),
        domain.upper()
    );
    Ok(basis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_each_family_from_json() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let cases = [
            (r#"{"family":"monomial","basis_size":4}"#, "monomial", 4),
            (
                r#"{"family":"monomial","exponents":[0,2,5]}"#,
                "monomial",
                3,
            ),
            (
                r#"{"family":"exponential","rates":[-1.0,0.0,2.5]}"#,
                "exponential",
                3,
            ),
            (r#"{"family":"fourier","basis_size":5}"#, "fourier", 5),
            (
                r#"{"family":"bspline","order":4,"knots":{"uniform":{"basis_size":7}}}"#,
                "bspline",
                7,
            ),
            (
                r#"{"family":"bspline","order":2,"knots":{"provided":[0.0,0.0,0.5,1.0,1.0]}}"#,
                "bspline",
                3,
            ),
        ];
        for (json, family, size) in cases {
            let spec: BasisSpec = serde_json::from_str(json).unwrap();
            let basis = build_basis(domain, &spec).unwrap();
            assert_eq!(basis.family_name(), family, "{json}");
            assert_eq!(basis.basis_size(), size, "{json}");
        }
    }

    #[test]
    fn test_fourier_period_override() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let spec: BasisSpec =
            serde_json::from_str(r#"{"family":"fourier","basis_size":3,"period":2.0}"#).unwrap();
        match build_basis(domain, &spec).unwrap() {
            Basis::Fourier(fourier) => assert_eq!(fourier.period(), 2.0),
            other => panic!("expected a Fourier basis, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_parameters_surface_from_construction() {
        let domain = Domain::new(0.0, 1.0).unwrap();
        let spec = BasisSpec::BSpline {
            order: 2,
            knots: BSplineKnotSpec::Provided(vec![0.0, 0.0, 0.7, 0.4, 1.0, 1.0]),
        };
        assert!(matches!(
            build_basis(domain, &spec),
            Err(BasisError::InvalidParameters(_))
        ));

        let spec = BasisSpec::Monomial {
            basis_size: 0,
            exponents: None,
        };
        assert!(matches!(
            build_basis(domain, &spec),
            Err(BasisError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_spec_round_trips_through_json() {
        let spec = BasisSpec::BSpline {
            order: 3,
            knots: BSplineKnotSpec::Uniform { basis_size: 6 },
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains(r#""family":"bspline""#));
        let back: BasisSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
