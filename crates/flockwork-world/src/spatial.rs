//! Uniform-grid spatial hash over the horizontal plane.
//!
//! Items are bucketed by `(floor(x / cell_size), floor(z / cell_size))`.
//! The height axis is ignored when bucketing, so a query of radius `R`
//! touches `O((R / cell_size)^2)` cells. A cell size of roughly twice the
//! typical query radius keeps that to a 2x2 or 3x3 block.
//!
//! # Invariants
//!
//! - Every inserted item appears in exactly one cell list, and that cell is
//!   the one recorded for it in the reverse-lookup table.
//! - Cells that become empty are pruned immediately. Their backing vectors
//!   are kept in a small pool and reused for the next cell that is created.
//!
//! # Result buffers
//!
//! Neighbor queries run at least once per agent per tick, so the query
//! methods that return slices write into an internal scratch buffer that is
//! reused across calls. [`SpatialHash::query_into`] lets callers supply
//! their own buffer instead.

use std::collections::HashMap;
use std::hash::Hash;

use glam::Vec3;

use crate::error::WorldError;

/// Integer coordinates of a grid cell on the x/z plane.
pub type CellKey = (i32, i32);

/// Maximum number of emptied cell vectors kept for reuse.
const SPARE_CELL_POOL: usize = 64;

/// Uniform-grid spatial hash keyed by item handle.
#[derive(Debug, Clone)]
pub struct SpatialHash<T> {
    /// Edge length of one cell in world units.
    cell_size: f32,
    /// `1 / cell_size`, cached for key computation.
    inv_cell_size: f32,
    /// Cell -> items currently in that cell.
    cells: HashMap<CellKey, Vec<T>>,
    /// Item -> the cell it is recorded in.
    lookup: HashMap<T, CellKey>,
    /// Reusable query result buffer.
    scratch: Vec<T>,
    /// Vectors from pruned cells, recycled for new cells.
    spare: Vec<Vec<T>>,
}

impl<T> SpatialHash<T>
where
    T: Copy + Eq + Hash,
{
    /// Create an empty index with the given cell size.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidCellSize`] if `cell_size` is not a
    /// positive finite number.
    pub fn new(cell_size: f32) -> Result<Self, WorldError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(WorldError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            cell_size,
            inv_cell_size: cell_size.recip(),
            cells: HashMap::new(),
            lookup: HashMap::new(),
            scratch: Vec::new(),
            spare: Vec::new(),
        })
    }

    /// Edge length of one cell.
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of items currently indexed.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Whether the index holds no items.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Whether `item` is indexed.
    pub fn contains(&self, item: T) -> bool {
        self.lookup.contains_key(&item)
    }

    /// The cell `item` is recorded in, if it is indexed.
    pub fn cell_of(&self, item: T) -> Option<CellKey> {
        self.lookup.get(&item).copied()
    }

    /// The items recorded in a given cell.
    pub fn items_in_cell(&self, key: CellKey) -> &[T] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or_default()
    }

    /// The cell containing a world position.
    #[allow(clippy::cast_possible_truncation)]
    pub fn cell_key(&self, position: Vec3) -> CellKey {
        // `as` saturates on overflow and maps NaN to 0, which keeps wild
        // positions inside the key space instead of panicking.
        (
            (position.x * self.inv_cell_size).floor() as i32,
            (position.z * self.inv_cell_size).floor() as i32,
        )
    }

    /// Insert `item` at `position`.
    ///
    /// Inserting an item that is already indexed moves it instead.
    pub fn insert(&mut self, item: T, position: Vec3) {
        if self.contains(item) {
            self.update_position(item, position);
            return;
        }
        let key = self.cell_key(position);
        self.push_into_cell(key, item);
        self.lookup.insert(item, key);
    }

    /// Remove `item`. Returns `false` (and does nothing) if it was unknown.
    pub fn remove(&mut self, item: T) -> bool {
        let Some(key) = self.lookup.remove(&item) else {
            return false;
        };
        self.remove_from_cell(key, item);
        true
    }

    /// Move `item` to `position`.
    ///
    /// This is a no-op when the new position falls in the same cell, and
    /// for unknown items. Returns whether the item changed cells.
    pub fn update_position(&mut self, item: T, position: Vec3) -> bool {
        let new_key = self.cell_key(position);
        let Some(old_key) = self.lookup.get(&item).copied() else {
            return false;
        };
        if old_key == new_key {
            return false;
        }
        self.remove_from_cell(old_key, item);
        self.push_into_cell(new_key, item);
        self.lookup.insert(item, new_key);
        true
    }

    /// Remove every item, keeping allocated buffers.
    pub fn clear(&mut self) {
        for (_, mut bucket) in self.cells.drain() {
            if self.spare.len() < SPARE_CELL_POOL {
                bucket.clear();
                self.spare.push(bucket);
            }
        }
        self.lookup.clear();
        self.scratch.clear();
    }

    /// All items in cells overlapping the square of half-width `radius`
    /// around `center`.
    ///
    /// This is the cheap, unfiltered query: it may include items outside the
    /// circle. The returned slice borrows the internal result buffer and is
    /// overwritten by the next query.
    pub fn query(&mut self, center: Vec3, radius: f32) -> &[T] {
        let mut out = std::mem::take(&mut self.scratch);
        self.query_into(center, radius, &mut out);
        self.scratch = out;
        &self.scratch
    }

    /// Like [`SpatialHash::query`], but writes into a caller-owned buffer.
    ///
    /// `out` is cleared first.
    pub fn query_into(&self, center: Vec3, radius: f32, out: &mut Vec<T>) {
        out.clear();
        let radius = radius.max(0.0);
        if self.cells.is_empty() {
            return;
        }
        if !radius.is_finite() {
            for bucket in self.cells.values() {
                out.extend_from_slice(bucket);
            }
            return;
        }

        let (min_x, min_z) = self.cell_key(center - Vec3::new(radius, 0.0, radius));
        let (max_x, max_z) = self.cell_key(center + Vec3::new(radius, 0.0, radius));

        let span_x = i64::from(max_x).saturating_sub(i64::from(min_x)).saturating_add(1);
        let span_z = i64::from(max_z).saturating_sub(i64::from(min_z)).saturating_add(1);
        let covered = span_x.saturating_mul(span_z);
        let occupied = i64::try_from(self.cells.len()).unwrap_or(i64::MAX);

        if covered > occupied {
            // Huge radius relative to occupancy: walk occupied cells instead
            // of every key in range.
            for (&(cx, cz), bucket) in &self.cells {
                if (min_x..=max_x).contains(&cx) && (min_z..=max_z).contains(&cz) {
                    out.extend_from_slice(bucket);
                }
            }
            return;
        }

        for cz in min_z..=max_z {
            for cx in min_x..=max_x {
                if let Some(bucket) = self.cells.get(&(cx, cz)) {
                    out.extend_from_slice(bucket);
                }
            }
        }
    }

    /// Items within Euclidean distance `radius` of `center`.
    ///
    /// `position_of` supplies each candidate's exact position; candidates
    /// for which it returns `None` are skipped. The returned slice borrows
    /// the internal result buffer.
    pub fn query_filtered<F>(&mut self, center: Vec3, radius: f32, position_of: F) -> &[T]
    where
        F: Fn(T) -> Option<Vec3>,
    {
        let mut out = std::mem::take(&mut self.scratch);
        self.query_filtered_into(center, radius, position_of, &mut out);
        self.scratch = out;
        &self.scratch
    }

    /// Like [`SpatialHash::query_filtered`], but writes into `out`.
    pub fn query_filtered_into<F>(&self, center: Vec3, radius: f32, position_of: F, out: &mut Vec<T>)
    where
        F: Fn(T) -> Option<Vec3>,
    {
        self.query_into(center, radius, out);
        let radius_sq = radius.max(0.0) * radius.max(0.0);
        out.retain(|&item| {
            position_of(item).is_some_and(|pos| pos.distance_squared(center) <= radius_sq)
        });
    }

    /// Unfiltered query that leaves out `exclude` (typically the querying
    /// agent itself).
    pub fn query_excluding(&mut self, center: Vec3, radius: f32, exclude: T) -> &[T] {
        let mut out = std::mem::take(&mut self.scratch);
        self.query_into(center, radius, &mut out);
        out.retain(|&item| item != exclude);
        self.scratch = out;
        &self.scratch
    }

    fn push_into_cell(&mut self, key: CellKey, item: T) {
        let spare = &mut self.spare;
        self.cells
            .entry(key)
            .or_insert_with(|| spare.pop().unwrap_or_default())
            .push(item);
    }

    fn remove_from_cell(&mut self, key: CellKey, item: T) {
        let emptied = self.cells.get_mut(&key).is_some_and(|bucket| {
            if let Some(idx) = bucket.iter().position(|&other| other == item) {
                bucket.swap_remove(idx);
            }
            bucket.is_empty()
        });
        if emptied {
            if let Some(bucket) = self.cells.remove(&key) {
                if self.spare.len() < SPARE_CELL_POOL {
                    self.spare.push(bucket);
                }
            }
        }
    }
}
