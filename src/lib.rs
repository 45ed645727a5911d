//! `assay-curves` library crate.
//!
//! The binary (`assay`) is a thin wrapper around this library so that:
//!
//! - fitting, bands and inversion are testable without spawning processes
//! - the CLI, the demo command and the TUI share one pipeline

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod tui;
