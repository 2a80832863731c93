//! A multi-core MESI cache coherence simulator.
//!
//! Every simulated core replays its own stream of `RD`/`WR` instructions
//! against a small direct-mapped private cache. All cores share one memory
//! image and one table of per-address locks; the coherence manager keeps the
//! private caches consistent with each other and with memory.

pub mod error;
pub mod mesi;
pub mod utils;

pub use error::{InvariantViolation, SimError};
