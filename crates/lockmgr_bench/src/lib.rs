//! Benchmarks for the lock manager.
//!
//! The benchmarks live under `benches/`; this library only holds shared
//! workload helpers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
