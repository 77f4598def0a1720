//! Per-tick neighbor snapshot and query cache.
//!
//! At the start of every tick the world copies each agent's kinematics into
//! a [`Snapshot`]. All neighbor queries during that tick are answered from
//! the snapshot, so no agent ever sees another agent half-way through its
//! own update.
//!
//! Many agents in a flock ask nearly the same question. The
//! [`NeighborCache`] quantizes `(center, radius)` to a grid of step
//! `quantum` and remembers the candidate list for each key. Candidates are
//! fetched around the quantized center with the radius widened by one
//! quantum, which always covers the caller's true query sphere, and then
//! exact-filtered against the caller's own center and radius. A cache hit
//! therefore returns exactly what a miss would have.

use std::collections::HashMap;

use flockwork_agents::{Neighbor, NeighborSource};
use flockwork_types::AgentId;
use flockwork_world::SpatialHash;
use glam::Vec3;
use serde::Serialize;

/// Quantized query centers beyond this many quanta from the origin bypass
/// the cache, since the `i32` key space can no longer represent them.
const MAX_QUANTIZED_COORD: f32 = 1.0e6;

/// Kinematic copy of every agent, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Vec<Neighbor>,
}

impl Snapshot {
    /// Rebuild from agents yielded in ascending id order.
    pub fn rebuild<I>(&mut self, agents: I)
    where
        I: IntoIterator<Item = Neighbor>,
    {
        self.entries.clear();
        self.entries.extend(agents);
        debug_assert!(self.entries.windows(2).all(|w| matches!(w, [a, b] if a.id < b.id)));
    }

    /// Look up an agent.
    pub fn get(&self, id: AgentId) -> Option<&Neighbor> {
        self.entries
            .binary_search_by_key(&id, |n| n.id)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    /// Every entry in id order.
    pub fn entries(&self) -> &[Neighbor] {
        &self.entries
    }

    /// Number of agents captured.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Queries answered from a stored candidate list.
    pub hits: u64,
    /// Queries that had to walk the spatial index.
    pub misses: u64,
}

type QueryKey = (i32, i32, i32, i32);

/// Memoized neighbor candidates, valid for a single tick.
#[derive(Debug, Clone)]
pub struct NeighborCache {
    enabled: bool,
    quantum: f32,
    tick: Option<u64>,
    entries: HashMap<QueryKey, Vec<AgentId>>,
    stats: CacheStats,
}

impl NeighborCache {
    /// Create a cache with the given quantization step.
    ///
    /// A non-positive `quantum` disables caching.
    pub fn new(enabled: bool, quantum: f32) -> Self {
        Self {
            enabled: enabled && quantum.is_finite() && quantum > 0.0,
            quantum,
            tick: None,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Whether queries are memoized.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Running counters.
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything stored for an earlier tick.
    ///
    /// Returns `true` if the cache was invalidated.
    pub fn begin_tick(&mut self, tick: u64) -> bool {
        if self.tick == Some(tick) {
            return false;
        }
        self.tick = Some(tick);
        self.entries.clear();
        true
    }

    /// Drop everything regardless of the tick counter. Used when agents are
    /// teleported, spawned, or removed mid-tick.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    #[allow(clippy::cast_possible_truncation)]
    fn key(&self, center: Vec3, radius: f32) -> Option<QueryKey> {
        let scaled = center / self.quantum;
        if !center.is_finite()
            || !radius.is_finite()
            || scaled.abs().max_element() > MAX_QUANTIZED_COORD
            || radius / self.quantum > MAX_QUANTIZED_COORD
        {
            return None;
        }
        let grid = scaled.round();
        Some((
            grid.x as i32,
            grid.y as i32,
            grid.z as i32,
            (radius.max(0.0) / self.quantum).ceil() as i32,
        ))
    }

    /// Candidate ids for a query, from the cache when possible.
    fn candidates(&mut self, index: &SpatialHash<AgentId>, center: Vec3, radius: f32, out: &mut Vec<AgentId>) {
        let key = if self.enabled { self.key(center, radius) } else { None };
        let Some(key) = key else {
            index.query_into(center, radius, out);
            return;
        };
        if let Some(stored) = self.entries.get(&key) {
            self.stats.hits = self.stats.hits.saturating_add(1);
            out.clear();
            out.extend_from_slice(stored);
            return;
        }
        self.stats.misses = self.stats.misses.saturating_add(1);
        let (gx, gy, gz, rk) = key;
        let grid_center = Vec3::new(gx as f32, gy as f32, gz as f32) * self.quantum;
        let widened = (rk as f32 + 1.0) * self.quantum;
        index.query_into(grid_center, widened, out);
        self.entries.insert(key, out.clone());
    }
}

/// [`NeighborSource`] over one tick's snapshot, spatial index, and cache.
#[derive(Debug)]
pub struct SnapshotNeighbors<'a> {
    snapshot: &'a Snapshot,
    index: &'a SpatialHash<AgentId>,
    cache: &'a mut NeighborCache,
    scratch: Vec<AgentId>,
}

impl<'a> SnapshotNeighbors<'a> {
    /// Bundle the per-tick query state.
    pub const fn new(snapshot: &'a Snapshot, index: &'a SpatialHash<AgentId>, cache: &'a mut NeighborCache) -> Self {
        Self {
            snapshot,
            index,
            cache,
            scratch: Vec::new(),
        }
    }
}

impl NeighborSource for SnapshotNeighbors<'_> {
    fn neighbors_within(&mut self, center: Vec3, radius: f32, out: &mut Vec<Neighbor>) {
        out.clear();
        let radius = radius.max(0.0);
        self.cache.candidates(self.index, center, radius, &mut self.scratch);
        let radius_sq = radius * radius;
        out.extend(
            self.scratch
                .iter()
                .filter_map(|&id| self.snapshot.get(id))
                .filter(|n| n.is_alive() && n.position.distance_squared(center) <= radius_sq)
                .copied(),
        );
        out.sort_unstable_by_key(|n| n.id);
    }

    fn agent(&self, id: AgentId) -> Option<Neighbor> {
        self.snapshot.get(id).copied()
    }
}
