//! Mathematical utilities: least squares, Levenberg–Marquardt, summary statistics, grids.

pub mod grid;
pub mod lm;
pub mod ols;
pub mod stats;

pub use grid::*;
pub use lm::*;
pub use ols::*;
pub use stats::*;
