use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};

use log::{info, warn};
use parking_lot::Mutex;

use super::common::*;
use super::system::Simulation;
use crate::error::SimError;

// trace output

/// Consumer of the per-instruction trace. Shared by all core threads.
pub trait TraceSink: Sync {
    fn emit(&self, record: &TraceRecord);
}

/// prints one line per record to stdout
pub struct StdoutSink;

impl TraceSink for StdoutSink {
    fn emit(&self, record: &TraceRecord) {
        let mut out = io::stdout().lock();
        if let Err(e) = writeln!(out, "{record}") {
            warn!("dropping trace line: {e}");
        }
    }
}

/// keeps every record in arrival order
#[derive(Default)]
pub struct CollectingSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }
    pub fn for_core(&self, core: usize) -> Vec<TraceRecord> {
        self.records.lock().iter().filter(|r| r.core == core).copied().collect()
    }
}

impl TraceSink for CollectingSink {
    fn emit(&self, record: &TraceRecord) {
        self.records.lock().push(*record);
    }
}

// per-core counters

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreStats {
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,     // sibling lines this core invalidated
    pub downgrades: u64,        // sibling lines this core demoted to Shared
    pub writebacks: u64,
    pub rejected: u64,          // instructions that failed the bounds check
}

impl CoreStats {
    fn count(&mut self, r: &TraceRecord) {
        match r.kind {
            OpKind::Read => self.reads += 1,
            OpKind::Write => self.writes += 1,
        }
        if r.hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        self.invalidations += r.invalidations as u64;
        self.downgrades += r.downgrades as u64;
        self.writebacks += r.writebacks as u64;
    }
}

impl fmt::Display for CoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reads, {} writes, {} hits, {} misses, \
             {} invalidations, {} downgrades, {} writebacks, {} rejected",
            self.reads,
            self.writes,
            self.hits,
            self.misses,
            self.invalidations,
            self.downgrades,
            self.writebacks,
            self.rejected
        )
    }
}

// cores

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreState {
    Running,
    Finished,
}

/// Replays one instruction stream, strictly in order, through the
/// coherence manager of its core.
pub struct Core<'s> {
    pub id: usize,
    pub state: CoreState,
    insts: VecDeque<Operation>,
    sim: &'s Simulation,
    stats: CoreStats,
}

impl<'s> Core<'s> {
    pub fn new(id: usize, sim: &'s Simulation, insts: Instructions) -> Self {
        let state = if insts.is_empty() { CoreState::Finished } else { CoreState::Running };
        Core {
            id,
            state,
            insts: insts.into(),
            sim,
            stats: CoreStats::default(),
        }
    }

    pub fn stats(&self) -> CoreStats {
        self.stats
    }

    /// bounds-check `op` and hand it to the coherence manager
    pub fn execute(&self, op: Operation) -> Result<TraceRecord, SimError> {
        let addr = self.sim.spec().addr(op.addr())?;
        let manager = self.sim.manager(self.id);
        Ok(match op {
            Operation::Read { .. } => manager.read(addr),
            Operation::Write { value, .. } => manager.write(addr, value),
        })
    }

    /// execute the next instruction
    pub fn tick(&mut self, sink: &dyn TraceSink) -> CoreState {
        if self.state == CoreState::Finished {
            return self.state;
        }
        if let Some(op) = self.insts.pop_front() {
            match self.execute(op) {
                Ok(record) => {
                    self.stats.count(&record);
                    sink.emit(&record);
                }
                Err(e) => {
                    warn!("core {}: skipping {} {}: {e}", self.id, op.kind(), op.addr());
                    self.stats.rejected += 1;
                }
            }
        }
        if self.insts.is_empty() {
            info!("core {} finished: {}", self.id, self.stats);
            self.state = CoreState::Finished;
        }
        self.state
    }

    pub fn run(mut self, sink: &dyn TraceSink) -> CoreStats {
        while self.tick(sink) == CoreState::Running {}
        self.stats
    }
}
