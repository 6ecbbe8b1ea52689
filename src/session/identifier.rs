//! Packet identifier allocation.
//!
//! Identifiers are unique among the ones currently outstanding on this session
//! only. Each allocator is owned by a single session so identifiers never leak
//! between clients.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::utils::ClientError;

/// Number of random draws before the identifier space is considered exhausted.
pub const MAX_ATTEMPTS: u32 = 65_535;

#[derive(Debug)]
pub struct IdAllocator {
    in_use: HashSet<u16>,
    rng: StdRng,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            in_use: HashSet::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic allocator, used to make identifier sequences reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            in_use: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Picks a random identifier in `1..=65535` that is not in use.
    pub fn allocate(&mut self) -> Result<u16, ClientError> {
        for _ in 0..MAX_ATTEMPTS {
            let id = self.rng.gen_range(1..=u16::MAX);
            if self.in_use.insert(id) {
                return Ok(id);
            }
        }
        Err(ClientError::ExhaustedIdentifierSpace)
    }

    /// Marks a caller-chosen identifier as in use. Returns `false` if it already was.
    pub fn reserve(&mut self, id: u16) -> bool {
        self.in_use.insert(id)
    }

    /// Returns `id` to the free set. Returns `false` if it was not in use.
    pub fn release(&mut self, id: u16) -> bool {
        self.in_use.remove(&id)
    }

    pub fn is_in_use(&self, id: u16) -> bool {
        self.in_use.contains(&id)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}
