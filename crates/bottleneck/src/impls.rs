//! Engines that experiments can run on.

pub use engine_impls::*;
