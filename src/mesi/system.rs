use std::collections::BTreeMap;
use std::fmt;
use std::thread;

use log::{error, info};
use parking_lot::Mutex;

use super::bus::{AddressLockTable, SharedMemory};
use super::cache::{CacheLine, CacheTable};
use super::coherence::CoherenceManager;
use super::common::*;
use super::processor::{Core, CoreStats, TraceSink};
use crate::error::{InvariantViolation, SimError};

/// Everything the cores share: the memory image, the address lock table and
/// every core's private cache. Built once per run and handed to each core by
/// reference, so independent simulations can live side by side.
pub struct Simulation {
    spec: SystemSpec,
    memory: SharedMemory,
    locks: AddressLockTable,
    caches: Vec<Mutex<CacheTable>>,
}

impl Simulation {
    pub fn new(spec: SystemSpec) -> Result<Self, SimError> {
        spec.validate()?;
        Ok(Self {
            memory: SharedMemory::new(spec.memory_size),
            locks: AddressLockTable::new(spec.memory_size),
            caches: (0..spec.num_cores)
                .map(|_| Mutex::new(CacheTable::new(spec.cache_size)))
                .collect(),
            spec,
        })
    }

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }
    pub fn num_cores(&self) -> usize {
        self.caches.len()
    }

    pub(crate) fn memory(&self) -> &SharedMemory {
        &self.memory
    }
    pub(crate) fn locks(&self) -> &AddressLockTable {
        &self.locks
    }
    pub(crate) fn caches(&self) -> &[Mutex<CacheTable>] {
        &self.caches
    }

    /// The coherence manager acting on behalf of `core`.
    ///
    /// Panics if `core` is not below `num_cores()`.
    pub fn manager(&self, core: usize) -> CoherenceManager<'_> {
        assert!(core < self.num_cores(), "no core {core}");
        CoherenceManager::new(core, self)
    }

    /// Run one thread per core over its instruction stream and wait for all
    /// of them. Stream `i` belongs to core `i`; missing streams are empty and
    /// surplus streams are dropped.
    pub fn run(&self, mut streams: Vec<Instructions>, sink: &dyn TraceSink) -> Vec<CoreStats> {
        streams.resize_with(self.num_cores(), Vec::new);
        info!("starting {} core(s)", streams.len());
        let stats = thread::scope(|s| {
            let handles = streams
                .into_iter()
                .enumerate()
                .map(|(id, insts)| s.spawn(move || Core::new(id, self, insts).run(sink)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .enumerate()
                .map(|(id, h)| {
                    h.join().unwrap_or_else(|_| {
                        error!("core {id} panicked");
                        CoreStats::default()
                    })
                })
                .collect::<Vec<_>>()
        });
        info!("all cores finished");
        stats
    }

    /// write every Modified line of `core` back to memory
    pub fn flush(&self, core: usize) -> usize {
        self.manager(core).flush()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            caches: self.caches.iter().map(|c| c.lock().lines().to_vec()).collect(),
            memory: self.memory.image(),
        }
    }

    /// Only meaningful while no core is mid-transaction.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        self.snapshot().check_invariants()
    }
}

/// Copy of all caches and the memory image at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub caches: Vec<Vec<CacheLine>>,
    pub memory: Vec<Value>,
}

impl Snapshot {
    /// valid copies of each address, as (core, line)
    fn holders(&self) -> BTreeMap<Addr, Vec<(usize, CacheLine)>> {
        let mut holders: BTreeMap<Addr, Vec<(usize, CacheLine)>> = BTreeMap::new();
        for (core, lines) in self.caches.iter().enumerate() {
            for line in lines.iter().filter(|l| l.state.is_valid()) {
                if let Some(addr) = line.addr {
                    holders.entry(addr).or_default().push((core, *line));
                }
            }
        }
        holders
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (addr, copies) in self.holders() {
            if let Some((owner, line)) = copies.iter().find(|(_, l)| l.state.is_owned()) {
                if let Some((other, _)) = copies.iter().find(|(c, _)| c != owner) {
                    return Err(InvariantViolation::SharedOwnership {
                        addr,
                        owner: *owner,
                        state: line.state,
                        other: *other,
                    });
                }
            }
            let mut sharers = copies.iter().filter(|(_, l)| l.state == MesiState::Shared);
            if let Some((first, line)) = sharers.next() {
                if let Some((second, _)) = sharers.find(|(_, l)| l.value != line.value) {
                    return Err(InvariantViolation::DivergentSharers {
                        addr,
                        first: *first,
                        second: *second,
                    });
                }
            }
            let memory = self.memory[addr.get()];
            let stale = copies
                .iter()
                .find(|(_, l)| l.state != MesiState::Modified && l.value != memory);
            if let Some((core, line)) = stale {
                return Err(InvariantViolation::StaleCleanCopy {
                    addr,
                    core: *core,
                    cached: line.value,
                    memory,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (core, lines) in self.caches.iter().enumerate() {
            writeln!(f, "core {core} cache:")?;
            for (slot, line) in lines.iter().enumerate() {
                match line.addr {
                    Some(addr) => writeln!(
                        f,
                        "  slot {slot}: address {addr}, state {}, value {}",
                        line.state, line.value
                    )?,
                    None => writeln!(f, "  slot {slot}: empty")?,
                }
            }
        }
        write!(f, "memory: {:?}", self.memory)
    }
}
