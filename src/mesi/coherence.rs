use log::{debug, trace};
use parking_lot::MutexGuard;

use super::bus::AddressGuard;
use super::cache::{CacheLine, CacheTable};
use super::common::*;
use super::system::Simulation;

/*
    Locking discipline:
    - a core locks its own cache table only for short, non-blocking sections
      and never while waiting for an address lock
    - an address lock is taken before any cache table it leads to, and a core
      holds at most one address lock at a time
    - other cores' lines are only ever invalidated or downgraded to Shared,
      and only under the address lock of that line
 */

/// outcome of probing the sibling caches before a read fill
#[derive(Default)]
struct Snoop {
    sharers: usize,
    downgrades: usize,
    writebacks: usize,
}

/// The MESI state machine, acting for one core on the shared simulation.
pub struct CoherenceManager<'s> {
    core: usize,
    sim: &'s Simulation,
}

impl<'s> CoherenceManager<'s> {
    pub(crate) fn new(core: usize, sim: &'s Simulation) -> Self {
        Self { core, sim }
    }

    // helper functions

    fn own(&self) -> MutexGuard<'s, CacheTable> {
        self.sim.caches()[self.core].lock()
    }
    fn hit(
        &self,
        kind: OpKind,
        addr: Addr,
        value: Value,
        prev: MesiState,
        new: MesiState,
    ) -> TraceRecord {
        trace!("core {}: {kind} {addr} hit {prev} -> {new}", self.core);
        TraceRecord {
            core: self.core,
            kind,
            addr,
            value,
            hit: true,
            prev_state: prev,
            new_state: new,
            evicted: None,
            invalidations: 0,
            downgrades: 0,
            writebacks: 0,
        }
    }
    /// the line a fill actually replaced, if it held another valid address
    fn evicted(replaced: &CacheLine, addr: Addr) -> Option<(Addr, MesiState)> {
        match replaced.addr {
            Some(v) if v != addr && replaced.state.is_valid() => Some((v, replaced.state)),
            _ => None,
        }
    }

    /// Write a Modified victim back before its slot is reused and return its
    /// address if that happened. The victim's own lock is taken and released
    /// here, before the caller locks `addr`. A victim that is no longer
    /// Modified by then is left for the fill to replace.
    fn evict(&self, addr: Addr, victim: &CacheLine) -> Option<Addr> {
        let v = match victim.addr {
            Some(v) if v != addr && victim.state == MesiState::Modified => v,
            _ => return None,
        };
        let guard = self.sim.locks().acquire(self.core, v);
        let mut table = self.own();
        let slot = table.slot_for(v);
        let line = table.lines()[slot];
        if line.addr != Some(v) || line.state != MesiState::Modified {
            // a sibling touched v in the meantime
            debug!("core {}: victim {v} is {} by now, no writeback", self.core, line.state);
            return None;
        }
        self.sim.memory().store(&guard, line.value);
        table.set_state(slot, MesiState::Invalid);
        debug!("core {}: wrote back {v} = {} on eviction", self.core, line.value);
        Some(v)
    }

    /// invalidation broadcast for the address `guard` locks
    fn invalidate_others(&self, guard: &AddressGuard<'_>) -> usize {
        let addr = guard.addr();
        let mut count = 0;
        for (id, cache) in self.sim.caches().iter().enumerate() {
            if id == self.core {
                continue;
            }
            if let Some(line) = cache.lock().invalidate(addr) {
                debug!("core {}: invalidated {addr} in core {id} (was {})", self.core, line.state);
                count += 1;
            }
        }
        count
    }

    /// Probe sibling caches before a read fill. Owned copies elsewhere are
    /// downgraded to Shared, a dirty one after writing it back.
    fn snoop_read(&self, guard: &AddressGuard<'_>) -> Snoop {
        let addr = guard.addr();
        let mut snoop = Snoop::default();
        for (id, cache) in self.sim.caches().iter().enumerate() {
            if id == self.core {
                continue;
            }
            let mut table = cache.lock();
            let Some(slot) = table.lookup(addr) else { continue };
            let line = table.lines()[slot];
            match line.state {
                MesiState::Modified => {
                    self.sim.memory().store(guard, line.value);
                    table.set_state(slot, MesiState::Shared);
                    debug!("core {}: core {id} wrote back {addr} = {}", self.core, line.value);
                    snoop.writebacks += 1;
                    snoop.downgrades += 1;
                }
                MesiState::Exclusive => {
                    table.set_state(slot, MesiState::Shared);
                    snoop.downgrades += 1;
                }
                MesiState::Shared | MesiState::Invalid => (),
            }
            snoop.sharers += 1;
        }
        snoop
    }

    /// invalidate siblings, write memory and fill Modified, all under `guard`
    fn write_locked(&self, guard: &AddressGuard<'_>, value: Value) -> TraceRecord {
        let addr = guard.addr();
        let invalidations = self.invalidate_others(guard);
        self.sim.memory().store(guard, value);
        let replaced = self.own().fill(addr, value, MesiState::Modified);
        trace!("core {}: WR {addr} miss I -> M", self.core);
        TraceRecord {
            core: self.core,
            kind: OpKind::Write,
            addr,
            value,
            hit: false,
            prev_state: MesiState::Invalid,
            new_state: MesiState::Modified,
            evicted: Self::evicted(&replaced, addr),
            invalidations,
            downgrades: 0,
            writebacks: 0,
        }
    }

    // processor requests

    pub fn read(&self, addr: Addr) -> TraceRecord {
        let victim = {
            let table = self.own();
            let line = *table.line_for(addr);
            if line.holds(addr) {
                return self.hit(OpKind::Read, addr, line.value, line.state, line.state);
            }
            line
        };
        self.read_miss(addr, victim)
    }

    pub fn write(&self, addr: Addr, value: Value) -> TraceRecord {
        let victim = {
            let mut table = self.own();
            let slot = table.slot_for(addr);
            let line = table.lines()[slot];
            if line.holds(addr) && line.state.is_owned() {
                // no other copy can exist, so no bus activity
                table.update(slot, value, MesiState::Modified);
                return self.hit(OpKind::Write, addr, value, line.state, MesiState::Modified);
            }
            line
        };
        if victim.holds(addr) {
            self.upgrade(addr, value)
        } else {
            self.write_miss(addr, value, victim)
        }
    }

    /// write every Modified line back to memory, keeping it as Exclusive
    pub fn flush(&self) -> usize {
        let dirty = self
            .own()
            .lines()
            .iter()
            .filter(|l| l.state == MesiState::Modified)
            .filter_map(|l| l.addr)
            .collect::<Vec<_>>();
        dirty
            .into_iter()
            .map(|addr| {
                let guard = self.sim.locks().acquire(self.core, addr);
                let mut table = self.own();
                match table.lookup(addr) {
                    Some(slot) if table.lines()[slot].state == MesiState::Modified => {
                        let value = table.lines()[slot].value;
                        self.sim.memory().store(&guard, value);
                        table.set_state(slot, MesiState::Exclusive);
                        debug!("core {}: flushed {addr} = {value}", self.core);
                        1
                    }
                    _ => 0,
                }
            })
            .sum()
    }

    // transactions

    fn read_miss(&self, addr: Addr, victim: CacheLine) -> TraceRecord {
        let written_back = self.evict(addr, &victim);
        let guard = self.sim.locks().acquire(self.core, addr);
        let snoop = self.snoop_read(&guard);
        let value = self.sim.memory().load(&guard);
        let state = if snoop.sharers > 0 { MesiState::Shared } else { MesiState::Exclusive };
        let replaced = self.own().fill(addr, value, state);
        drop(guard);
        trace!("core {}: RD {addr} miss I -> {state}", self.core);
        TraceRecord {
            core: self.core,
            kind: OpKind::Read,
            addr,
            value,
            hit: false,
            prev_state: MesiState::Invalid,
            new_state: state,
            evicted: match written_back {
                Some(v) => Some((v, MesiState::Modified)),
                None => Self::evicted(&replaced, addr),
            },
            invalidations: 0,
            downgrades: snoop.downgrades,
            writebacks: usize::from(written_back.is_some()) + snoop.writebacks,
        }
    }

    fn write_miss(&self, addr: Addr, value: Value, victim: CacheLine) -> TraceRecord {
        let written_back = self.evict(addr, &victim);
        let guard = self.sim.locks().acquire(self.core, addr);
        let mut record = self.write_locked(&guard, value);
        if let Some(v) = written_back {
            record.evicted = Some((v, MesiState::Modified));
            record.writebacks += 1;
        }
        record
    }

    /// Shared -> Modified on a write hit
    fn upgrade(&self, addr: Addr, value: Value) -> TraceRecord {
        let guard = self.sim.locks().acquire(self.core, addr);
        // only holders of this lock can invalidate us, so the answer is stable
        let still_shared = self.own().lookup(addr).is_some();
        if !still_shared {
            debug!("core {}: lost shared {addr} before upgrade, writing as miss", self.core);
            return self.write_locked(&guard, value);
        }
        let invalidations = self.invalidate_others(&guard);
        {
            let mut table = self.own();
            let slot = table.slot_for(addr);
            table.update(slot, value, MesiState::Modified);
        }
        drop(guard);
        let mut record =
            self.hit(OpKind::Write, addr, value, MesiState::Shared, MesiState::Modified);
        record.invalidations = invalidations;
        record
    }
}
