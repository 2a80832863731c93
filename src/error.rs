use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::mesi::{Addr, MesiState};

/// Simulator errors. Stream, parse and bounds errors stay local to one core
/// and never abort a run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("core {core}: cannot open instruction stream {}: {source}", .path.display())]
    StreamOpen {
        core: usize,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unparsable instruction {line:?}: {reason}")]
    Parse { line: String, reason: &'static str },

    #[error("address {addr} outside of memory [0, {memory_size})")]
    Bounds { addr: i64, memory_size: usize },

    #[error("invalid system configuration: {0}")]
    Config(String),
}

/// A coherence invariant that does not hold at a quiescent point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("address {addr}: core {owner} holds it {state} but core {other} has a valid copy")]
    SharedOwnership {
        addr: Addr,
        owner: usize,
        state: MesiState,
        other: usize,
    },

    #[error("address {addr}: sharers {first} and {second} disagree on its value")]
    DivergentSharers {
        addr: Addr,
        first: usize,
        second: usize,
    },

    #[error("address {addr}: core {core} caches {cached} but memory holds {memory}")]
    StaleCleanCopy {
        addr: Addr,
        core: usize,
        cached: i8,
        memory: i8,
    },
}
