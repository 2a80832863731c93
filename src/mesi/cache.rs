use super::common::*;

// cache lines

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLine {
    pub addr: Option<Addr>,     // None until the slot is first filled
    pub value: Value,
    pub state: MesiState,
}

impl CacheLine {
    /// true if this line is a valid copy of `addr`
    pub fn holds(&self, addr: Addr) -> bool {
        self.addr == Some(addr) && self.state.is_valid()
    }
}

// direct-mapped cache table

/// One core's private cache. Each address maps to exactly one slot
/// (`addr mod len`); filling a slot replaces whatever was resident.
#[derive(Clone, Debug)]
pub struct CacheTable {
    lines: Vec<CacheLine>,
}

impl CacheTable {
    /// `size` must be non-zero, which `SystemSpec::validate` guarantees.
    pub fn new(size: usize) -> Self {
        Self { lines: vec![CacheLine::default(); size] }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }

    pub fn slot_for(&self, addr: Addr) -> usize {
        addr.slot(self.lines.len())
    }
    /// slot holding a valid copy of `addr`, if any
    pub fn lookup(&self, addr: Addr) -> Option<usize> {
        let slot = self.slot_for(addr);
        self.lines[slot].holds(addr).then_some(slot)
    }
    /// the line currently resident where `addr` maps, whatever it holds
    pub fn line_for(&self, addr: Addr) -> &CacheLine {
        &self.lines[self.slot_for(addr)]
    }

    /// overwrite the mapped slot, returning the line that was resident
    pub fn fill(&mut self, addr: Addr, value: Value, state: MesiState) -> CacheLine {
        let slot = self.slot_for(addr);
        std::mem::replace(&mut self.lines[slot], CacheLine { addr: Some(addr), value, state })
    }
    pub fn update(&mut self, slot: usize, value: Value, state: MesiState) {
        let line = &mut self.lines[slot];
        line.value = value;
        line.state = state;
    }
    pub fn set_state(&mut self, slot: usize, state: MesiState) {
        self.lines[slot].state = state;
    }
    /// drop a valid copy of `addr`, returning it as it was before
    pub fn invalidate(&mut self, addr: Addr) -> Option<CacheLine> {
        let slot = self.lookup(addr)?;
        let before = self.lines[slot];
        self.lines[slot].state = MesiState::Invalid;
        Some(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SystemSpec {
        SystemSpec::default()
    }

    #[test]
    fn starts_empty_and_invalid() {
        let t = CacheTable::new(2);
        assert_eq!(t.len(), 2);
        assert!(t.lines().iter().all(|l| l.addr.is_none() && l.state == MesiState::Invalid));
        assert_eq!(t.lookup(spec().addr(0).unwrap()), None);
    }

    #[test]
    fn direct_mapping() {
        let t = CacheTable::new(2);
        let s = spec();
        assert_eq!(t.slot_for(s.addr(4).unwrap()), 0);
        assert_eq!(t.slot_for(s.addr(5).unwrap()), 1);
        assert_eq!(t.slot_for(s.addr(23).unwrap()), 1);
    }

    #[test]
    fn fill_evicts_resident_line() {
        let s = spec();
        let mut t = CacheTable::new(2);
        let (a, b) = (s.addr(3).unwrap(), s.addr(5).unwrap());
        t.fill(a, 9, MesiState::Modified);
        assert_eq!(t.lookup(a), Some(1));

        let evicted = t.fill(b, 4, MesiState::Shared);
        assert_eq!(evicted, CacheLine { addr: Some(a), value: 9, state: MesiState::Modified });
        assert_eq!(t.lookup(a), None);
        assert_eq!(t.lookup(b), Some(1));
    }

    #[test]
    fn invalid_line_is_a_miss() {
        let s = spec();
        let mut t = CacheTable::new(2);
        let a = s.addr(6).unwrap();
        t.fill(a, 1, MesiState::Shared);
        assert!(t.invalidate(a).is_some());
        assert_eq!(t.lookup(a), None);
        assert_eq!(t.line_for(a).addr, Some(a));
        // already invalid, nothing left to drop
        assert_eq!(t.invalidate(a), None);
    }
}
