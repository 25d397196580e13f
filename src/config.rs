// Configuration
use num_complex::Complex64;
use std::path::PathBuf;

use crate::error::{Result, SimError};

pub type Real = f64;
pub type Complex = Complex64;
/// Basis-state index inside the full distributed vector.
pub type StateInteger = u64;

pub mod constants {
    pub const RECP_SQRT_2: super::Real = std::f64::consts::FRAC_1_SQRT_2;

    /// 2^16 amplitudes (1 MiB of Complex128) per cache tile.
    pub const DEFAULT_NUM_ON_CACHE_QUBITS: usize = 16;
    pub const DEFAULT_MAX_OPERATED_QUBITS: usize = 6;
    pub const DEFAULT_MAX_FUSED_QUBITS: usize = 10;

    /// Largest page-qubit count a container accepts.
    pub const MAX_NUM_PAGE_QUBITS: usize = 16;

    /// Rank that draws measurement outcomes.
    pub const ROOT_RANK: usize = 0;
}

/// Selects the family of inner loops the dispatcher may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// One parallel sweep per page, no cache tiling.
    Plain,
    /// Tile in-page sweeps into blocks of `2^num_on_cache_qubits` amplitudes.
    CacheAware { num_on_cache_qubits: usize },
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        ExecutionPolicy::CacheAware {
            num_on_cache_qubits: constants::DEFAULT_NUM_ON_CACHE_QUBITS,
        }
    }
}

/// Construction parameters of a [`crate::DistributedState`].
///
/// The operand limits live here rather than in process-wide constants so that
/// containers with different limits can coexist.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Qubits addressed inside one rank (L).
    pub num_local_qubits: usize,
    /// The top `num_page_qubits` local qubits select the page. Zero means flat storage.
    pub num_page_qubits: usize,
    /// Independent circuit instances held by every rank.
    pub num_data_blocks: usize,
    pub policy: ExecutionPolicy,
    pub max_operated_qubits: usize,
    pub max_fused_qubits: usize,
    /// Worker threads of the container's pool; 0 picks the rayon default.
    pub num_threads: usize,
    /// Seed of the root rank's measurement RNG.
    pub seed: u64,
    /// Map amplitudes onto this file instead of anonymous memory.
    pub backing_store: Option<PathBuf>,
    /// Physical slot of every logical qubit at construction.
    pub initial_permutation: Option<Vec<usize>>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            num_local_qubits: 1,
            num_page_qubits: 0,
            num_data_blocks: 1,
            policy: ExecutionPolicy::default(),
            max_operated_qubits: constants::DEFAULT_MAX_OPERATED_QUBITS,
            max_fused_qubits: constants::DEFAULT_MAX_FUSED_QUBITS,
            num_threads: 0,
            seed: 0,
            backing_store: None,
            initial_permutation: None,
        }
    }
}

impl StateConfig {
    pub fn new(num_local_qubits: usize) -> Self {
        Self {
            num_local_qubits,
            ..Self::default()
        }
    }

    pub fn with_page_qubits(mut self, num_page_qubits: usize) -> Self {
        self.num_page_qubits = num_page_qubits;
        self
    }

    pub fn with_data_blocks(mut self, num_data_blocks: usize) -> Self {
        self.num_data_blocks = num_data_blocks;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_operated_qubits(mut self, max: usize) -> Self {
        self.max_operated_qubits = max;
        self
    }

    pub fn with_max_fused_qubits(mut self, max: usize) -> Self {
        self.max_fused_qubits = max;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_backing_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.backing_store = Some(path.into());
        self
    }

    pub fn with_initial_permutation(mut self, slots: Vec<usize>) -> Self {
        self.initial_permutation = Some(slots);
        self
    }

    /// Operand limit actually enforced: a gate may never need more local
    /// slots than exist.
    pub fn effective_max_operated_qubits(&self) -> usize {
        self.max_operated_qubits.min(self.num_local_qubits)
    }

    pub fn effective_max_fused_qubits(&self) -> usize {
        self.max_fused_qubits.min(self.num_local_qubits)
    }

    /// Checks the configuration against the communicator it will run on.
    pub fn validate(&self, num_ranks: usize) -> Result<()> {
        if self.num_page_qubits > constants::MAX_NUM_PAGE_QUBITS
            || (self.num_page_qubits > 0 && self.num_page_qubits >= self.num_local_qubits)
        {
            return Err(SimError::UnsupportedPageCount {
                num_page_qubits: self.num_page_qubits,
            });
        }
        if self.num_local_qubits == 0 {
            return Err(SimError::InvalidConfiguration(
                "at least one local qubit is required".into(),
            ));
        }
        // Element offsets and the page table are usize-indexed.
        if self.num_local_qubits >= usize::BITS as usize - 5 {
            return Err(SimError::InvalidConfiguration(format!(
                "{} local qubits do not fit in addressable memory",
                self.num_local_qubits
            )));
        }
        if num_ranks == 0 || !num_ranks.is_power_of_two() {
            return Err(SimError::InvalidConfiguration(format!(
                "number of ranks must be a power of two, got {num_ranks}"
            )));
        }
        if self.num_data_blocks == 0 {
            return Err(SimError::InvalidConfiguration(
                "at least one data block is required".into(),
            ));
        }
        if self.max_operated_qubits == 0 || self.max_fused_qubits == 0 {
            return Err(SimError::InvalidConfiguration(
                "operand limits must be positive".into(),
            ));
        }
        if let ExecutionPolicy::CacheAware { num_on_cache_qubits } = self.policy {
            if num_on_cache_qubits == 0 {
                return Err(SimError::InvalidConfiguration(
                    "cache tiles need at least one qubit".into(),
                ));
            }
        }
        if let Some(slots) = &self.initial_permutation {
            let num_qubits = self.num_local_qubits + num_ranks.trailing_zeros() as usize;
            if slots.len() != num_qubits {
                return Err(SimError::InvalidConfiguration(format!(
                    "initial permutation has {} entries for {} qubits",
                    slots.len(),
                    num_qubits
                )));
            }
        }
        Ok(())
    }
}
