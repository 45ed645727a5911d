//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - validated inputs (`Observations`, `BootstrapConfig`, `LowessConfig`, `GridSpec`)
//! - curve families and fitted parameters (`ModelKind`, `CurveParams`)
//! - outputs (`FitQuality`, `Band`, `CurveFile`)

pub mod types;

pub use types::*;
