//! Closed-form curve families.
//!
//! Models are implemented as small, pure functions so that fitting, banding and
//! inversion code can stay generic over the model kind.

pub mod model;

pub use model::*;
