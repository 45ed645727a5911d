//! Curve fitting and the analyses built on it.
//!
//! Responsibilities:
//!
//! - point-estimate fits for the parametric families
//! - LOWESS smoothing
//! - bootstrap ensembles and confidence bands
//! - avidity index, correlation matrix and flow density helpers

pub mod avidity;
pub mod bootstrap;
pub mod correlation;
pub mod density;
pub mod fitter;
pub mod lowess;

pub use bootstrap::*;
pub use fitter::*;
pub use self::lowess::*;
