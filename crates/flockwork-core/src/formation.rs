//! Formation slot generation and assignment.
//!
//! A formation is a set of slots laid out in a local frame (`+x` right,
//! `+z` forward) around an anchor. The anchor is either a fixed pose or a
//! leader agent, in which case the formation moves and turns with the
//! leader. Every tick the [`FormationCoordinator`] converts each occupied
//! slot to a world position and sends its occupant a `FormationUpdate`
//! message. Slot offsets never change behind an occupant's back: changing
//! the shape goes through [`FormationCoordinator::regenerate`], which keeps
//! as many assignments as the new shape has room for.
//!
//! # Shapes
//!
//! | Kind | Layout (n slots, spacing s) |
//! |---|---|
//! | Line | one row across the anchor, centered |
//! | Column | single file from the anchor backward |
//! | Circle | evenly spaced ring of radius `max(n·s / 2π, s)` |
//! | Wedge | apex on the anchor, rows of 1, 2, 3, ... behind it |
//! | V | apex on the anchor, alternating left and right wings |
//! | Box | `ceil(√n)` columns, rows filled front to back, centered |
//! | Custom | caller-supplied offsets |

use std::collections::{BTreeMap, HashMap};
use std::f32::consts::TAU;

use flockwork_agents::Neighbor;
use flockwork_types::math::yaw_rotation;
use flockwork_types::{AgentId, FormationId, IdSequence, Message};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::error::SimulationError;

/// Half-angle between each V wing and the line straight back.
const V_WING_ANGLE_DEG: f32 = 55.0;

/// Row spacing factor for wedges (`sin 60°`), so neighbors in adjacent rows
/// sit exactly one spacing apart.
const WEDGE_ROW_FACTOR: f32 = 0.866_025_4;

/// Shape of a formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationKind {
    /// One centered row.
    Line,
    /// Single file.
    Column,
    /// Ring around the anchor.
    Circle,
    /// Filled triangle with the apex in front.
    Wedge,
    /// Two trailing wings.
    V,
    /// Square-ish grid.
    Box,
    /// Explicit local offsets. The slot count is capped by the list length.
    Custom(Vec<Vec3>),
}

/// Local slot offsets for `count` agents at `spacing`.
///
/// Slot order is also assignment order: slot `0` is filled first.
pub fn generate_slots(kind: &FormationKind, count: usize, spacing: f32) -> Vec<Vec3> {
    match kind {
        FormationKind::Line => {
            let half = count.saturating_sub(1) as f32 * 0.5;
            (0..count)
                .map(|i| Vec3::new((i as f32 - half) * spacing, 0.0, 0.0))
                .collect()
        }
        FormationKind::Column => (0..count)
            .map(|i| Vec3::new(0.0, 0.0, -(i as f32) * spacing))
            .collect(),
        FormationKind::Circle => circle_slots(count, spacing),
        FormationKind::Wedge => wedge_slots(count, spacing),
        FormationKind::V => v_slots(count, spacing),
        FormationKind::Box => box_slots(count, spacing),
        FormationKind::Custom(offsets) => offsets.iter().copied().take(count).collect(),
    }
}

/// Radius used by [`FormationKind::Circle`].
pub fn circle_radius(count: usize, spacing: f32) -> f32 {
    (count as f32 * spacing / TAU).max(spacing)
}

fn circle_slots(count: usize, spacing: f32) -> Vec<Vec3> {
    let radius = circle_radius(count, spacing);
    let step = TAU / count.max(1) as f32;
    (0..count)
        .map(|i| {
            let angle = i as f32 * step;
            Vec3::new(angle.sin() * radius, 0.0, angle.cos() * radius)
        })
        .collect()
}

fn wedge_slots(count: usize, spacing: f32) -> Vec<Vec3> {
    let mut slots = Vec::with_capacity(count);
    let mut row: usize = 0;
    while slots.len() < count {
        let in_row = row.saturating_add(1);
        let half = row as f32 * 0.5;
        let z = -(row as f32) * spacing * WEDGE_ROW_FACTOR;
        for j in 0..in_row {
            if slots.len() == count {
                break;
            }
            slots.push(Vec3::new((j as f32 - half) * spacing, 0.0, z));
        }
        row = in_row;
    }
    slots
}

fn v_slots(count: usize, spacing: f32) -> Vec<Vec3> {
    let (sin, cos) = V_WING_ANGLE_DEG.to_radians().sin_cos();
    (0..count)
        .map(|i| {
            if i == 0 {
                return Vec3::ZERO;
            }
            // 1, 2 -> rank 1 (left, right); 3, 4 -> rank 2; ...
            let rank = i.saturating_add(1) / 2;
            let side = if i % 2 == 1 { -1.0 } else { 1.0 };
            let reach = rank as f32 * spacing;
            Vec3::new(side * reach * sin, 0.0, -reach * cos)
        })
        .collect()
}

fn box_slots(count: usize, spacing: f32) -> Vec<Vec3> {
    if count == 0 {
        return Vec::new();
    }
    let mut columns: usize = 1;
    while columns.saturating_mul(columns) < count {
        columns = columns.saturating_add(1);
    }
    let rows = count.div_ceil(columns);
    let half_x = columns.saturating_sub(1) as f32 * 0.5;
    let half_z = rows.saturating_sub(1) as f32 * 0.5;
    (0..count)
        .map(|i| {
            let column = i.checked_rem(columns).unwrap_or(0);
            let row = i.checked_div(columns).unwrap_or(0);
            Vec3::new(
                (column as f32 - half_x) * spacing,
                0.0,
                (half_z - row as f32) * spacing,
            )
        })
        .collect()
}

/// One position in a formation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FormationSlot {
    /// Offset from the anchor in the formation's local frame.
    pub offset: Vec3,
    /// Fill order; lower values are filled first.
    pub priority: usize,
    /// The agent holding the slot.
    pub occupant: Option<AgentId>,
}

/// What a formation is positioned relative to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FormationAnchor {
    /// A fixed world pose.
    Fixed {
        /// Anchor position.
        position: Vec3,
        /// Forward direction of the formation.
        heading: Vec3,
    },
    /// Follows an agent's position and yaw.
    Leader(AgentId),
}

/// A named formation and its slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Formation {
    id: FormationId,
    name: String,
    kind: FormationKind,
    spacing: f32,
    anchor: FormationAnchor,
    slots: Vec<FormationSlot>,
}

impl Formation {
    /// The formation's identifier.
    pub const fn id(&self) -> FormationId {
        self.id
    }

    /// The name given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current shape.
    pub const fn kind(&self) -> &FormationKind {
        &self.kind
    }

    /// Current spacing.
    pub const fn spacing(&self) -> f32 {
        self.spacing
    }

    /// Current anchor.
    pub const fn anchor(&self) -> FormationAnchor {
        self.anchor
    }

    /// Slots in fill order.
    pub fn slots(&self) -> &[FormationSlot] {
        &self.slots
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.occupant.is_some()).count()
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.occupant.is_some())
    }

    /// Slot index held by `agent`.
    pub fn slot_of(&self, agent: AgentId) -> Option<usize> {
        self.slots.iter().position(|s| s.occupant == Some(agent))
    }

    /// Anchor pose, resolving a leader anchor through `lookup`.
    ///
    /// Returns `None` while the leader is missing or dead.
    fn anchor_pose<F>(&self, lookup: &F) -> Option<(Vec3, Vec3)>
    where
        F: Fn(AgentId) -> Option<Neighbor>,
    {
        match self.anchor {
            FormationAnchor::Fixed { position, heading } => Some((position, heading)),
            FormationAnchor::Leader(leader) => lookup(leader)
                .filter(Neighbor::is_alive)
                .map(|n| (n.position, n.heading)),
        }
    }

    fn slot_world_position<F>(&self, slot: usize, lookup: &F) -> Option<Vec3>
    where
        F: Fn(AgentId) -> Option<Neighbor>,
    {
        let offset = self.slots.get(slot)?.offset;
        let (position, heading) = self.anchor_pose(lookup)?;
        Some(position + yaw_rotation(heading) * offset)
    }

    fn build_slots(kind: &FormationKind, count: usize, spacing: f32) -> Vec<FormationSlot> {
        generate_slots(kind, count, spacing)
            .into_iter()
            .enumerate()
            .map(|(priority, offset)| FormationSlot {
                offset,
                priority,
                occupant: None,
            })
            .collect()
    }
}

/// Owns every formation and the agent-to-slot assignments.
///
/// An agent holds at most one slot across all formations.
#[derive(Debug, Default)]
pub struct FormationCoordinator {
    formations: BTreeMap<FormationId, Formation>,
    members: HashMap<AgentId, FormationId>,
    ids: IdSequence,
}

impl FormationCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a formation with `count` slots.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidFormation`] if `spacing` is not a
    /// positive finite number, or [`SimulationError::IdsExhausted`] if no
    /// identifiers remain.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        kind: FormationKind,
        count: usize,
        spacing: f32,
        anchor: FormationAnchor,
    ) -> Result<FormationId, SimulationError> {
        check_spacing(spacing)?;
        let id: FormationId = self.ids.next_id().ok_or(SimulationError::IdsExhausted)?;
        let name = name.into();
        let slots = Formation::build_slots(&kind, count, spacing);
        info!(formation = %id, name = %name, kind = ?kind, slots = slots.len(), "Formation created");
        self.formations.insert(
            id,
            Formation {
                id,
                name,
                kind,
                spacing,
                anchor,
                slots,
            },
        );
        Ok(id)
    }

    /// Look up a formation.
    pub fn get(&self, id: FormationId) -> Option<&Formation> {
        self.formations.get(&id)
    }

    /// First formation with the given name.
    pub fn find_by_name(&self, name: &str) -> Option<FormationId> {
        self.formations.values().find(|f| f.name == name).map(Formation::id)
    }

    /// Every formation in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Formation> {
        self.formations.values()
    }

    /// Number of formations.
    pub fn len(&self) -> usize {
        self.formations.len()
    }

    /// Whether there are no formations.
    pub fn is_empty(&self) -> bool {
        self.formations.is_empty()
    }

    /// The formation `agent` belongs to.
    pub fn formation_of(&self, agent: AgentId) -> Option<FormationId> {
        self.members.get(&agent).copied()
    }

    /// Delete a formation, releasing its members. Returns the released
    /// agents.
    pub fn remove(&mut self, id: FormationId) -> Vec<AgentId> {
        let Some(formation) = self.formations.remove(&id) else {
            return Vec::new();
        };
        let released: Vec<AgentId> = formation.slots.iter().filter_map(|s| s.occupant).collect();
        for agent in &released {
            self.members.remove(agent);
        }
        info!(formation = %id, released = released.len(), "Formation removed");
        released
    }

    /// Put `agent` in the first free slot.
    ///
    /// Returns `None` if the formation is unknown or full, or if the agent
    /// already holds a slot anywhere.
    pub fn assign(&mut self, formation: FormationId, agent: AgentId) -> Option<usize> {
        if self.members.contains_key(&agent) {
            return None;
        }
        let entry = self.formations.get_mut(&formation)?;
        let (index, slot) = entry
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, s)| s.occupant.is_none())
            .min_by_key(|(_, s)| s.priority)?;
        slot.occupant = Some(agent);
        self.members.insert(agent, formation);
        debug!(formation = %formation, agent = %agent, slot = index, "Slot assigned");
        Some(index)
    }

    /// Put `agent` in a specific slot. Fails if the slot is taken or the
    /// agent already holds a slot.
    pub fn assign_to_slot(&mut self, formation: FormationId, agent: AgentId, slot: usize) -> bool {
        if self.members.contains_key(&agent) {
            return false;
        }
        let Some(target) = self
            .formations
            .get_mut(&formation)
            .and_then(|f| f.slots.get_mut(slot))
            .filter(|s| s.occupant.is_none())
        else {
            return false;
        };
        target.occupant = Some(agent);
        self.members.insert(agent, formation);
        true
    }

    /// Free the slot `agent` holds in `formation`.
    pub fn unassign(&mut self, formation: FormationId, agent: AgentId) -> bool {
        let Some(slot) = self
            .formations
            .get_mut(&formation)
            .and_then(|f| f.slots.iter_mut().find(|s| s.occupant == Some(agent)))
        else {
            return false;
        };
        slot.occupant = None;
        self.members.remove(&agent);
        true
    }

    /// Free whatever slot `agent` holds. Used when an agent is despawned.
    pub fn release_agent(&mut self, agent: AgentId) -> bool {
        self.members
            .get(&agent)
            .copied()
            .is_some_and(|formation| self.unassign(formation, agent))
    }

    /// Change shape, size, or spacing.
    ///
    /// Current occupants keep their relative order and move into the new
    /// slots by priority. Agents that no longer fit are unassigned and
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::InvalidFormation`] if the formation is
    /// unknown or `spacing` is invalid.
    pub fn regenerate(
        &mut self,
        formation: FormationId,
        kind: FormationKind,
        count: usize,
        spacing: f32,
    ) -> Result<Vec<AgentId>, SimulationError> {
        check_spacing(spacing)?;
        let entry = self
            .formations
            .get_mut(&formation)
            .ok_or(SimulationError::InvalidFormation("unknown formation"))?;

        let mut occupants: Vec<(usize, AgentId)> = entry
            .slots
            .iter()
            .filter_map(|s| s.occupant.map(|a| (s.priority, a)))
            .collect();
        occupants.sort_unstable_by_key(|&(priority, _)| priority);

        // Fresh slots come out in priority order.
        let mut slots = Formation::build_slots(&kind, count, spacing);
        let mut waiting = occupants.into_iter().map(|(_, agent)| agent);
        for slot in &mut slots {
            let Some(agent) = waiting.next() else {
                break;
            };
            slot.occupant = Some(agent);
        }
        let overflow: Vec<AgentId> = waiting.collect();
        for agent in &overflow {
            self.members.remove(agent);
        }

        entry.kind = kind;
        entry.spacing = spacing;
        entry.slots = slots;
        info!(
            formation = %formation,
            slots = entry.slots.len(),
            overflow = overflow.len(),
            "Formation regenerated"
        );
        Ok(overflow)
    }

    /// Move the anchor.
    pub fn set_anchor(&mut self, formation: FormationId, anchor: FormationAnchor) -> bool {
        self.formations
            .get_mut(&formation)
            .map(|f| f.anchor = anchor)
            .is_some()
    }

    /// World position of one slot, or `None` if the formation, slot, or
    /// leader is missing.
    pub fn slot_world_position<F>(&self, formation: FormationId, slot: usize, lookup: F) -> Option<Vec3>
    where
        F: Fn(AgentId) -> Option<Neighbor>,
    {
        self.formations.get(&formation)?.slot_world_position(slot, &lookup)
    }

    /// Send every occupant its slot's current world position.
    ///
    /// A leader that occupies a slot in its own formation is not sent
    /// updates. Occupants that `lookup` cannot find, or that are dead, are
    /// skipped. Returns the number of messages queued.
    pub fn update<F>(&self, lookup: F, bus: &mut MessageBus, time: f64) -> usize
    where
        F: Fn(AgentId) -> Option<Neighbor>,
    {
        let mut sent: usize = 0;
        for formation in self.formations.values() {
            let Some((position, heading)) = formation.anchor_pose(&lookup) else {
                debug!(formation = %formation.id, "Formation anchor unavailable");
                continue;
            };
            let leader = match formation.anchor {
                FormationAnchor::Leader(id) => Some(id),
                FormationAnchor::Fixed { .. } => None,
            };
            let rotation = yaw_rotation(heading);
            for slot in &formation.slots {
                let Some(agent) = slot.occupant.filter(|a| Some(*a) != leader) else {
                    continue;
                };
                if !lookup(agent).is_some_and(|n| n.is_alive()) {
                    continue;
                }
                let target = position + rotation * slot.offset;
                bus.send(agent, Message::formation_update(formation.id, target).at(time));
                sent = sent.saturating_add(1);
            }
        }
        sent
    }
}

fn check_spacing(spacing: f32) -> Result<(), SimulationError> {
    if spacing.is_finite() && spacing > 0.0 {
        Ok(())
    } else {
        Err(SimulationError::InvalidFormation("spacing must be a positive finite number"))
    }
}
