use std::env;
use std::fmt;
use std::path::PathBuf;

use log::warn;

use crate::error::SimError;

// system specs

#[derive(Clone, Debug)]
pub struct SystemSpec {         // unit     reasonable defaults
    pub memory_size: usize,     // bytes    24
    pub cache_size: usize,      // lines    2
    pub num_cores: usize,       //          1
    pub input_dir: PathBuf,     //          "."
    pub input_prefix: String,   //          "input_"
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            memory_size: 24,
            cache_size: 2,
            num_cores: 1,
            input_dir: PathBuf::from("."),
            input_prefix: "input_".into(),
        }
    }
}

impl SystemSpec {
    /// Defaults, overridden by `MESI_MEMORY_SIZE`, `MESI_CACHE_SIZE` and
    /// `MESI_INPUT_DIR` where those are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like `from_env`, reading the variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut spec = SystemSpec::default();
        if let Some(n) = size_from(&lookup, "MESI_MEMORY_SIZE") {
            spec.memory_size = n;
        }
        if let Some(n) = size_from(&lookup, "MESI_CACHE_SIZE") {
            spec.cache_size = n;
        }
        if let Some(dir) = lookup("MESI_INPUT_DIR") {
            spec.input_dir = PathBuf::from(dir);
        }
        spec
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.memory_size == 0 {
            return Err(SimError::Config("memory size must be at least one byte".into()));
        }
        if self.cache_size == 0 {
            return Err(SimError::Config("cache must hold at least one line".into()));
        }
        if self.num_cores == 0 {
            return Err(SimError::Config("at least one core is required".into()));
        }
        Ok(())
    }

    /// bounds-check a raw instruction address against the memory size
    pub fn addr(&self, raw: i64) -> Result<Addr, SimError> {
        match usize::try_from(raw) {
            Ok(a) if a < self.memory_size => Ok(Addr(a)),
            _ => Err(SimError::Bounds { addr: raw, memory_size: self.memory_size }),
        }
    }
}

fn size_from(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("ignoring {key}={raw:?}: not a size");
            None
        }
    }
}

// addresses and values

pub type Value = i8;

/// A memory address already checked against the memory size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(usize);

impl Addr {
    pub fn get(&self) -> usize {
        self.0
    }
    /// direct-mapped slot of this address in a cache of `cache_size` lines
    pub fn slot(&self, cache_size: usize) -> usize {
        self.0 % cache_size
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// line states

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MesiState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

impl MesiState {
    pub fn is_valid(&self) -> bool {
        !matches!(self, MesiState::Invalid)
    }
    /// Modified or Exclusive: no other cache may hold a valid copy
    pub fn is_owned(&self) -> bool {
        matches!(self, MesiState::Modified | MesiState::Exclusive)
    }
}

impl fmt::Display for MesiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            MesiState::Invalid => "I",
            MesiState::Shared => "S",
            MesiState::Exclusive => "E",
            MesiState::Modified => "M",
        };
        f.write_str(c)
    }
}

// instructions

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Read => f.write_str("RD"),
            OpKind::Write => f.write_str("WR"),
        }
    }
}

/// A parsed instruction. The address is not bounds-checked yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Read { addr: i64 },
    Write { addr: i64, value: Value },
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Read { .. } => OpKind::Read,
            Operation::Write { .. } => OpKind::Write,
        }
    }
    pub fn addr(&self) -> i64 {
        match self {
            Operation::Read { addr } | Operation::Write { addr, .. } => *addr,
        }
    }
}

pub type Instructions = Vec<Operation>;

// trace output

/// What one executed instruction did to the issuing core's cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub core: usize,
    pub kind: OpKind,
    pub addr: Addr,
    pub value: Value,
    pub hit: bool,
    pub prev_state: MesiState,
    pub new_state: MesiState,
    pub evicted: Option<(Addr, MesiState)>,
    pub invalidations: usize,
    pub downgrades: usize,
    pub writebacks: usize,
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "core {}: {} {}: {} [{} {} -> {}]",
            self.core,
            self.kind,
            self.addr,
            self.value,
            if self.hit { "hit" } else { "miss" },
            self.prev_state,
            self.new_state,
        )?;
        if let Some((addr, state)) = self.evicted {
            write!(f, " evicted {addr} ({state})")?;
        }
        if self.invalidations > 0 {
            write!(f, " invalidated {}", self.invalidations)?;
        }
        if self.downgrades > 0 {
            write!(f, " downgraded {}", self.downgrades)?;
        }
        if self.writebacks > 0 {
            write!(f, " wrote back {}", self.writebacks)?;
        }
        Ok(())
    }
}
