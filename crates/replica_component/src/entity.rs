//! Entity type and allocation utilities.
//!
//! An [`Entity`] is a lightweight `u64` identifier with no inherent data.
//! Ids are handed out by an [`EntityAllocator`], which recycles deleted ids
//! only after a grace period so that events still in flight never resolve a
//! stale id to a brand new entity.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A unique entity identifier.
///
/// Entities are pure identifiers and carry no data of their own. Components
/// are attached to entities to give them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u64);

impl Entity {
    /// The null / invalid entity sentinel.
    pub const INVALID: Entity = Entity(0);

    /// Create an entity from a raw `u64` identifier.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw `u64` identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is a valid (non-zero) entity.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Default number of ticks a released id waits before it can be reused.
pub const DEFAULT_GRACE_TICKS: u64 = 2;

/// Allocates entity ids and recycles released ones after a grace period.
///
/// Released ids are parked together with the tick they were released on.
/// [`EntityAllocator::advance`] moves every parked id whose grace period has
/// elapsed onto the free list; [`EntityAllocator::allocate`] prefers the free
/// list over minting a new id.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: u64,
    grace_ticks: u64,
    parked: VecDeque<(Entity, u64)>,
    free: VecDeque<Entity>,
    live: u64,
}

impl EntityAllocator {
    /// Creates a new allocator. IDs start at 1 (0 is reserved for [`Entity::INVALID`]).
    #[must_use]
    pub fn new() -> Self {
        Self::with_grace_ticks(DEFAULT_GRACE_TICKS)
    }

    /// Creates an allocator with a custom reuse grace period.
    #[must_use]
    pub fn with_grace_ticks(grace_ticks: u64) -> Self {
        Self {
            next_id: 1,
            grace_ticks,
            parked: VecDeque::new(),
            free: VecDeque::new(),
            live: 0,
        }
    }

    /// Allocates an entity ID, reusing a recycled one when available.
    pub fn allocate(&mut self) -> Entity {
        self.live += 1;
        if let Some(entity) = self.free.pop_front() {
            return entity;
        }
        let id = self.next_id;
        self.next_id += 1;
        Entity(id)
    }

    /// Parks `entity` so it becomes reusable `grace_ticks` after `tick`.
    pub fn release(&mut self, entity: Entity, tick: u64) {
        self.live = self.live.saturating_sub(1);
        self.parked.push_back((entity, tick));
    }

    /// Moves every parked id whose grace period has elapsed at `tick` onto
    /// the free list.
    ///
    /// Ids are parked in release order, so the scan stops at the first id
    /// that is still cooling down.
    pub fn advance(&mut self, tick: u64) {
        while let Some(&(entity, released_at)) = self.parked.front() {
            if tick.saturating_sub(released_at) < self.grace_ticks {
                break;
            }
            self.parked.pop_front();
            self.free.push_back(entity);
        }
    }

    /// Returns the number of currently allocated (not released) ids.
    #[must_use]
    pub fn live_count(&self) -> u64 {
        self.live
    }

    /// Returns the number of ids waiting out their grace period.
    #[must_use]
    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Returns the configured grace period in ticks.
    #[must_use]
    pub fn grace_ticks(&self) -> u64 {
        self.grace_ticks
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}
