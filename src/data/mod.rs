//! Synthetic demo datasets for `assay demo` and the TUI.

pub mod sample;

pub use sample::*;
