//! Core Bottleneck data structures, traits, and routines. The most common entry point is
//! [`Experiment::run`], which drives a [network engine](NetworkEngine) through one
//! [experiment configuration](ExperimentConfig) and returns a [`Report`].

pub use bottleneck_core::*;
