//! Tick cycle: the seven-phase loop that advances a [`SimulationWorld`].
//!
//! Each tick runs through these phases:
//!
//! 1. **Begin** -- advance the clock, apply pending index updates, start a
//!    new neighbor-cache generation, snapshot every agent's kinematics, and
//!    run resource respawn timers.
//!
//! 2. **Messages** -- deliver up to `max_messages_per_tick` queued messages
//!    in FIFO order. The rest wait for the next tick.
//!
//! 3. **FSM** -- every live agent runs its state's execute hook and
//!    transition check.
//!
//! 4. **Formations** -- the coordinator queues a slot update for each
//!    occupant. They are delivered in the next tick's message phase.
//!
//! 5. **Batch** -- when enabled and the live population reaches
//!    `batch.min_agents`, flocking forces are computed in parallel and
//!    applied as external forces.
//!
//! 6. **Forces** -- every agent sums its steering forces, clamps them, and
//!    integrates.
//!
//! 7. **Flush** -- apply index updates for agents that moved and queue the
//!    messages agents sent during the tick.
//!
//! All neighbor queries within a tick read the Begin snapshot, so the
//! outcome does not depend on the order agents are updated in. Given the
//! same seed and the same commands, a run is fully deterministic.

use std::collections::BTreeMap;

use flockwork_agents::AgentContext;
use flockwork_types::{Message, MessageTarget, ResourceNodeId, StateKind};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::bus::Delivery;
use crate::error::SimulationError;
use crate::neighbor_cache::SnapshotNeighbors;
use crate::world::SimulationWorld;

/// Summary of a single tick's execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// Simulation time at the end of the tick.
    pub time: f64,
    /// Duration of the tick in seconds.
    pub dt: f32,
    /// Number of agents, dead ones included.
    pub agents: usize,
    /// Number of agents alive at the end of the tick.
    pub alive: usize,
    /// Messages delivered this tick.
    pub messages_delivered: usize,
    /// Messages dropped this tick because their recipient was gone.
    pub messages_dropped: usize,
    /// Messages still queued after the tick.
    pub messages_pending: usize,
    /// Formation slot updates queued this tick.
    pub formation_updates: usize,
    /// Whether the parallel batch path computed flocking this tick.
    pub batch_used: bool,
    /// Agents that changed spatial-index cells this tick.
    pub cell_changes: usize,
    /// Resource nodes that refilled this tick.
    pub respawned: Vec<ResourceNodeId>,
    /// Agent count per state at the end of the tick.
    pub states: BTreeMap<StateKind, usize>,
}

impl SimulationWorld {
    /// Run one tick of `dt` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Clock`] if `dt` is negative or not finite,
    /// or if the tick counter is exhausted. The world is unchanged on error.
    pub fn tick(&mut self, dt: f32) -> Result<TickSummary, SimulationError> {
        // --- Phase 1: Begin ---
        let start_time = self.clock.time();
        let tick = self.clock.advance(dt)?;
        let respawned = self.phase_begin(tick, dt);
        debug!(tick, time = start_time, agents = self.agents.len(), "Tick started");

        // --- Phase 2: Messages ---
        let (messages_delivered, messages_dropped) = self.phase_messages(tick, start_time, dt);

        // --- Phase 3: FSM ---
        self.phase_fsm(tick, start_time, dt);

        // --- Phase 4: Formations ---
        let snapshot = &self.snapshot;
        let formation_updates = self
            .formations
            .update(|id| snapshot.get(id).copied(), &mut self.bus, start_time);

        // --- Phase 5: Batch ---
        let batch_used = self.phase_batch();

        // --- Phase 6: Forces + integration ---
        self.phase_forces(tick, start_time, dt, batch_used);

        // --- Phase 7: Flush ---
        let cell_changes = self.flush_dirty_positions();
        let outgoing = self.outbox.len();
        for message in self.outbox.drain(..) {
            self.bus.enqueue(message);
        }

        let summary = TickSummary {
            tick,
            time: self.clock.time(),
            dt,
            agents: self.agents.len(),
            alive: self.alive_count(),
            messages_delivered,
            messages_dropped,
            messages_pending: self.bus.len(),
            formation_updates,
            batch_used,
            cell_changes,
            respawned,
            states: self.state_counts(),
        };
        debug!(
            tick,
            alive = summary.alive,
            delivered = messages_delivered,
            sent = outgoing,
            pending = summary.messages_pending,
            batch = batch_used,
            cell_changes,
            "Tick completed"
        );
        Ok(summary)
    }

    /// Run one tick of the configured fixed timestep.
    ///
    /// # Errors
    ///
    /// Same as [`tick`](Self::tick).
    pub fn step(&mut self) -> Result<TickSummary, SimulationError> {
        self.tick(self.config.world.fixed_dt)
    }

    /// Run `ticks` fixed-timestep ticks and return the last summary.
    ///
    /// # Errors
    ///
    /// Stops at the first failing tick.
    pub fn run(&mut self, ticks: u64) -> Result<Option<TickSummary>, SimulationError> {
        let mut last = None;
        for _ in 0..ticks {
            last = Some(self.step()?);
        }
        if let Some(summary) = &last {
            info!(tick = summary.tick, time = summary.time, alive = summary.alive, "Run finished");
        }
        Ok(last)
    }

    /// Phase 1: Begin.
    fn phase_begin(&mut self, tick: u64, dt: f32) -> Vec<ResourceNodeId> {
        self.flush_dirty_positions();
        self.cache.begin_tick(tick);
        self.rebuild_snapshot();
        let respawned = self.resources.tick(dt);
        for node in &respawned {
            debug!(tick, node = %node, "Resource node respawned");
        }
        respawned
    }

    /// Phase 2: Messages.
    fn phase_messages(&mut self, tick: u64, time: f64, dt: f32) -> (usize, usize) {
        let max = self.config.messaging.max_messages_per_tick;
        let Self {
            agents,
            bus,
            index,
            resources,
            obstacles,
            cache,
            snapshot,
            outbox,
            ..
        } = self;
        let mut neighbors = SnapshotNeighbors::new(snapshot, index, cache);
        let mut ctx = AgentContext {
            time,
            dt,
            tick,
            neighbors: &mut neighbors,
            obstacles: obstacles.as_deref(),
            resources,
            outbox,
            flocking_offloaded: false,
        };

        bus.process(max, |message: Message| match message.target() {
            MessageTarget::Agent(id) => match agents.get_mut(&id) {
                Some(agent) => {
                    agent.handle_message(&message, &mut ctx);
                    Delivery::Delivered
                }
                None => {
                    trace!(tick, agent = %id, kind = ?message.kind(), "Recipient gone");
                    Delivery::Dropped
                }
            },
            MessageTarget::Broadcast => {
                let sender = message.sender();
                for (id, agent) in agents.iter_mut() {
                    if Some(*id) != sender && agent.is_alive() {
                        agent.handle_message(&message, &mut ctx);
                    }
                }
                Delivery::Delivered
            }
        })
    }

    /// Phase 3: FSM.
    fn phase_fsm(&mut self, tick: u64, time: f64, dt: f32) {
        let Self {
            agents,
            index,
            resources,
            obstacles,
            cache,
            snapshot,
            outbox,
            ..
        } = self;
        let mut neighbors = SnapshotNeighbors::new(snapshot, index, cache);
        let mut ctx = AgentContext {
            time,
            dt,
            tick,
            neighbors: &mut neighbors,
            obstacles: obstacles.as_deref(),
            resources,
            outbox,
            flocking_offloaded: false,
        };
        for agent in agents.values_mut() {
            agent.step_state(&mut ctx);
        }
    }

    /// Phase 5: Batch. Returns whether the batch path ran.
    fn phase_batch(&mut self) -> bool {
        if !self.config.batch.enabled {
            return false;
        }
        let alive = self.alive_count();
        if alive < self.config.batch.min_agents.max(1) {
            return false;
        }
        self.batch.compute(self.agents.values(), self.snapshot.entries());
        let applied = self.batch.apply(self.agents.values_mut());
        debug!(alive, applied, "Batch flocking applied");
        true
    }

    /// Phase 6: Forces + integration.
    fn phase_forces(&mut self, tick: u64, time: f64, dt: f32, flocking_offloaded: bool) {
        let Self {
            agents,
            index,
            resources,
            obstacles,
            cache,
            snapshot,
            outbox,
            ..
        } = self;
        let mut neighbors = SnapshotNeighbors::new(snapshot, index, cache);
        let mut ctx = AgentContext {
            time,
            dt,
            tick,
            neighbors: &mut neighbors,
            obstacles: obstacles.as_deref(),
            resources,
            outbox,
            flocking_offloaded,
        };
        for agent in agents.values_mut() {
            let force = agent.compute_steering(&mut ctx);
            agent.integrate(force, dt);
        }
    }
}
