use std::sync::atomic::{AtomicI8, Ordering};

use log::trace;
use parking_lot::{Mutex, MutexGuard};

use super::common::*;

// per-address bus locks

/// One lock per memory address. Holding an address's lock is what entitles a
/// core to touch other cores' copies of that address or the memory cell
/// behind it. A core never holds more than one of these at a time.
pub struct AddressLockTable {
    locks: Vec<Mutex<()>>,
}

/// Proof that the calling core owns the lock of `addr`. Released on drop.
pub struct AddressGuard<'a> {
    addr: Addr,
    core: usize,
    _lock: MutexGuard<'a, ()>,
}

impl AddressLockTable {
    pub fn new(memory_size: usize) -> Self {
        Self { locks: (0..memory_size).map(|_| Mutex::new(())).collect() }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// block until no other core holds the lock of `addr`
    pub fn acquire(&self, core: usize, addr: Addr) -> AddressGuard<'_> {
        let lock = self.locks[addr.get()].lock();
        trace!("core {core} locked address {addr}");
        AddressGuard { addr, core, _lock: lock }
    }
}

impl AddressGuard<'_> {
    pub fn addr(&self) -> Addr {
        self.addr
    }
}

impl Drop for AddressGuard<'_> {
    fn drop(&mut self) {
        trace!("core {} released address {}", self.core, self.addr);
    }
}

// shared memory

/// The flat memory image behind all caches. Cells are read and written only
/// through a guard for their address, so ordering comes from the lock.
pub struct SharedMemory {
    cells: Box<[AtomicI8]>,
}

impl SharedMemory {
    pub fn new(size: usize) -> Self {
        Self { cells: (0..size).map(|_| AtomicI8::new(0)).collect() }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn load(&self, guard: &AddressGuard<'_>) -> Value {
        self.cells[guard.addr.get()].load(Ordering::Relaxed)
    }
    pub fn store(&self, guard: &AddressGuard<'_>, value: Value) {
        self.cells[guard.addr.get()].store(value, Ordering::Relaxed);
    }

    /// unsynchronized copy of every cell, meaningful once all cores are idle
    pub fn image(&self) -> Vec<Value> {
        self.cells.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use super::*;

    #[test]
    fn memory_starts_zeroed() {
        let mem = SharedMemory::new(24);
        assert_eq!(mem.len(), 24);
        assert!(mem.image().iter().all(|&v| v == 0));
    }

    #[test]
    fn store_goes_through_guard() {
        let spec = SystemSpec::default();
        let locks = AddressLockTable::new(spec.memory_size);
        let mem = SharedMemory::new(spec.memory_size);
        let a = spec.addr(7).unwrap();
        {
            let g = locks.acquire(0, a);
            mem.store(&g, -3);
            assert_eq!(mem.load(&g), -3);
        }
        assert_eq!(mem.image()[7], -3);
    }

    #[test]
    fn lock_is_mutually_exclusive() {
        let spec = SystemSpec::default();
        let locks = AddressLockTable::new(spec.memory_size);
        let a = spec.addr(1).unwrap();
        let inside = AtomicUsize::new(0);
        thread::scope(|s| {
            for core in 0..4 {
                let (locks, inside) = (&locks, &inside);
                s.spawn(move || {
                    for _ in 0..1000 {
                        let _g = locks.acquire(core, a);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
    }
}
