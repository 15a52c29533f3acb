//! Concrete basis families.

pub mod bspline;
pub mod exponential;
pub mod fourier;
pub mod monomial;

pub use bspline::BSplineBasis;
pub use exponential::ExponentialBasis;
pub use fourier::FourierBasis;
pub use monomial::MonomialBasis;
