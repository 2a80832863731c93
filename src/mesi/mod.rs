mod bus;
mod cache;
mod coherence;
mod common;
mod processor;
mod system;

pub use bus::{AddressGuard, AddressLockTable, SharedMemory};
pub use cache::{CacheLine, CacheTable};
pub use coherence::CoherenceManager;
pub use common::*;
pub use processor::{CollectingSink, Core, CoreState, CoreStats, StdoutSink, TraceSink};
pub use system::{Simulation, Snapshot};
