//! This crate contains implementations of the [`NetworkEngine`](bottleneck_core::NetworkEngine)
//! trait, and the bridge to ns-3 for experiments that run out of process.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

pub mod fluid;
pub mod ns3;

pub use crate::fluid::FluidEngine;
pub use crate::ns3::Ns3Backend;
