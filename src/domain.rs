use crate::basis::BasisError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Closed interval `[lower, upper]` on which a basis system is defined.
///
/// Bounds are validated once at construction and never change afterwards, so a
/// `Domain` can be copied freely between every basis built on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DomainBounds", into = "DomainBounds")]
pub struct Domain {
    lower: f64,
    upper: f64,
}

/// Raw, unvalidated bounds as they appear in serialized configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct DomainBounds {
    lower: f64,
    upper: f64,
}

impl TryFrom<DomainBounds> for Domain {
    type Error = BasisError;

    fn try_from(bounds: DomainBounds) -> Result<Self, Self::Error> {
        Domain::new(bounds.lower, bounds.upper)
    }
}

impl From<Domain> for DomainBounds {
    fn from(domain: Domain) -> Self {
        Self {
            lower: domain.lower,
            upper: domain.upper,
        }
    }
}

impl Domain {
    /// Fails with `InvalidParameters` unless both bounds are finite and `lower < upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self, BasisError> {
        if !lower.is_finite() || !upper.is_finite() {
            return Err(BasisError::InvalidParameters(format!(
                "domain bounds must be finite, got [{lower}, {upper}]"
            )));
        }
        if lower >= upper {
            return Err(BasisError::InvalidParameters(format!(
                "domain lower bound ({lower}) must be strictly less than upper bound ({upper})"
            )));
        }
        Ok(Self { lower, upper })
    }

    #[inline]
    pub fn lower(&self) -> f64 {
        self.lower
    }

    #[inline]
    pub fn upper(&self) -> f64 {
        self.upper
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Inclusive membership test on both ends.
    #[inline]
    pub fn contains(&self, t: f64) -> bool {
        self.lower <= t && t <= self.upper
    }

    /// `n` equally spaced points covering the domain, both endpoints included.
    pub fn grid(&self, n: usize) -> Array1<f64> {
        Array1::linspace(self.lower, self.upper, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_rejects_reversed_and_empty_bounds() {
        assert!(matches!(
            Domain::new(1.0, 0.0),
            Err(BasisError::InvalidParameters(_))
        ));
        assert!(matches!(
            Domain::new(2.0, 2.0),
            Err(BasisError::InvalidParameters(_))
        ));
        assert!(matches!(
            Domain::new(f64::NEG_INFINITY, 0.0),
            Err(BasisError::InvalidParameters(_))
        ));
        assert!(matches!(
            Domain::new(0.0, f64::NAN),
            Err(BasisError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_domain_accessors_and_membership() {
        let domain = Domain::new(-1.0, 3.0).unwrap();
        assert_eq!(domain.lower(), -1.0);
        assert_eq!(domain.upper(), 3.0);
        assert_eq!(domain.width(), 4.0);
        assert!(domain.contains(-1.0));
        assert!(domain.contains(3.0));
        assert!(!domain.contains(3.000_001));

        let grid = domain.grid(5);
        assert_eq!(grid.len(), 5);
        assert_eq!(grid[0], -1.0);
        assert_eq!(grid[4], 3.0);
    }
}
