//! `Bottleneck` is a harness for congestion-control experiments on dumbbell topologies. Given
//! the shape of the dumbbell, the bulk flows to start across it and the transport stack to use,
//! it sets up a simulation, samples per-flow throughput, congestion windows and the bottleneck
//! queue into time-series files, and ends with a per-flow summary.

#![warn(unreachable_pub, missing_docs)]

pub mod core;
pub mod impls;
