use crate::error::{BuildError, SimError};
use crate::junction::Junction;
use crate::lane::Lane;
use crate::node::{Node, Obstruction};
use crate::queue::{Event, EventQueue};
use crate::record::Record;
use crate::source::Source;
use crate::vehicle::{Vehicle, VELOCITY_FLOOR};
use crate::{JunctionId, LaneId, NodeId, NodeSet, RecordId, SourceId, VehicleId, VehicleSet};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// Tuning knobs shared by every vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Physical length of a node, in metres.
    pub node_distance: f64,
    /// Standard deviation of each per-node travel time sample.
    pub travel_time_std: f64,
    /// Upper bound of the reaction jitter between queued vehicles.
    pub reaction_delay: f64,
    /// How many nodes ahead a vehicle scans for traffic; `None` turns
    /// velocity correction off.
    pub look_ahead: Option<u32>,
    /// Fraction of the velocity difference adopted per correction.
    pub velocity_correction: f64,
    /// Spread the correction over the gap to the vehicle ahead.
    pub smooth_correction: bool,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_distance: 4.5 / 2.0 + 1.0,
            travel_time_std: 0.1,
            reaction_delay: 0.1,
            look_ahead: Some(3),
            velocity_correction: 1.0,
            smooth_correction: true,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.node_distance <= 0.0 {
            return Err(BuildError::NonPositive {
                context: "node distance",
                value: self.node_distance,
            });
        }
        if self.travel_time_std < 0.0 {
            return Err(BuildError::NonPositive {
                context: "travel time deviation",
                value: self.travel_time_std,
            });
        }
        if self.reaction_delay <= 0.0 {
            return Err(BuildError::NonPositive {
                context: "reaction delay",
                value: self.reaction_delay,
            });
        }
        if !(self.velocity_correction > 0.0 && self.velocity_correction <= 1.0) {
            return Err(BuildError::InvalidProbability {
                context: "velocity correction",
                value: self.velocity_correction,
            });
        }
        Ok(())
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The clock passed the end of the run window.
    ReachedEnd,
    /// The queue drained before the window closed.
    Exhausted,
}

/// What a single step did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    /// An event was processed at this time.
    Event(f64),
    /// The queue is empty.
    Idle,
}

fn detached_rng() -> SmallRng {
    SmallRng::seed_from_u64(0)
}

/// A road traffic simulation.
///
/// Holds the node graph, the vehicles on it, the junctions coordinating
/// them and the global event queue driving everything. Assemble the
/// network with the `add_*` builders, then [populate](Self::populate)
/// a run window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Simulation {
    /// Every point of the road network.
    pub(crate) nodes: NodeSet,
    /// Vehicles currently on the network.
    pub(crate) vehicles: VehicleSet,
    pub(crate) junctions: SlotMap<JunctionId, Junction>,
    pub(crate) lanes: SlotMap<LaneId, Lane>,
    pub(crate) sources: SlotMap<SourceId, Source>,
    pub(crate) records: SlotMap<RecordId, Record>,
    pub(crate) queue: EventQueue,
    pub(crate) config: SimConfig,
    #[serde(skip, default = "detached_rng")]
    pub(crate) rng: SmallRng,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        let config = SimConfig::default();
        let rng = SmallRng::seed_from_u64(config.seed);
        Self {
            nodes: SlotMap::with_key(),
            vehicles: SlotMap::with_key(),
            junctions: SlotMap::with_key(),
            lanes: SlotMap::with_key(),
            sources: SlotMap::with_key(),
            records: SlotMap::with_key(),
            queue: EventQueue::new(),
            config,
            rng,
        }
    }

    pub fn with_config(config: SimConfig) -> Result<Self, BuildError> {
        config.validate()?;
        let rng = SmallRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rng,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The time of the last processed event.
    pub fn clock(&self) -> f64 {
        self.queue.clock()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn vehicle(&self, vehicle: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(vehicle)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = (VehicleId, &Vehicle)> {
        self.vehicles.iter()
    }

    pub fn node(&self, node: NodeId) -> &Node {
        &self.nodes[node]
    }

    pub fn junction(&self, junction: JunctionId) -> &Junction {
        &self.junctions[junction]
    }

    /// Number of events still pending.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Drops every pending event. Vehicles still waiting on a staging
    /// node leave the network with it.
    pub fn clear_events(&mut self) {
        let staged: Vec<VehicleId> = self
            .vehicles
            .iter()
            .filter(|(_, v)| self.nodes[v.node()].staging)
            .map(|(id, _)| id)
            .collect();
        for vehicle in staged {
            let node = self.vehicles[vehicle].node();
            self.nodes.remove(node);
            self.vehicles.remove(vehicle);
        }
        self.queue.clear();
    }

    /// Schedules arrivals and signal cycles over the window, then runs
    /// it to completion.
    pub fn populate(&mut self, start_time: f64, end_time: f64) -> Result<RunOutcome, SimError> {
        if end_time <= start_time {
            return Err(SimError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }
        self.schedule_arrivals(start_time, end_time)?;
        self.schedule_cycles(start_time, end_time);
        self.run(start_time, end_time)
    }

    /// Processes events until the clock passes `end_time` or the queue
    /// drains.
    pub fn run(&mut self, start_time: f64, end_time: f64) -> Result<RunOutcome, SimError> {
        if end_time <= start_time {
            return Err(SimError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }
        self.queue.advance_to(start_time);
        log::info!("running simulation over [{start_time}, {end_time}]");
        loop {
            match self.step()? {
                StepOutcome::Idle => {
                    log::warn!(
                        "event queue drained at time {} before the window closed",
                        self.queue.clock()
                    );
                    return Ok(RunOutcome::Exhausted);
                }
                StepOutcome::Event(time) if time > end_time => {
                    return Ok(RunOutcome::ReachedEnd);
                }
                StepOutcome::Event(_) => {}
            }
        }
    }

    /// Pops and processes a single event.
    pub fn step(&mut self) -> Result<StepOutcome, SimError> {
        let Some((time, event)) = self.queue.pop() else {
            return Ok(StepOutcome::Idle);
        };
        match event {
            Event::Vehicle(vehicle) => {
                if self.vehicles.contains_key(vehicle) {
                    self.commit_move(vehicle);
                    if self.vehicles.contains_key(vehicle) {
                        self.schedule_move(vehicle)?;
                    }
                }
            }
            Event::Phase {
                junction,
                phase,
                end_time,
            } => self.activate_phase(junction, phase, end_time),
            Event::CrossingStart { junction, end_time } => {
                self.start_crossing(junction, end_time);
            }
            Event::CrossingEnd { junction } => self.end_crossing(junction),
            Event::ObstructionStart { node, end_time } => {
                if let Some(Obstruction::Timed {
                    active,
                    end_time: until,
                }) = &mut self.nodes[node].obstruction
                {
                    *active = true;
                    *until = end_time;
                    self.queue.push(end_time, Event::ObstructionEnd { node });
                }
            }
            Event::ObstructionEnd { node } => {
                if let Some(Obstruction::Timed { active, .. }) =
                    &mut self.nodes[node].obstruction
                {
                    *active = false;
                }
            }
        }
        Ok(StepOutcome::Event(time))
    }

    /// Expands every junction's signalling over the run window.
    fn schedule_cycles(&mut self, start_time: f64, end_time: f64) {
        let junctions: Vec<JunctionId> = self.junctions.keys().collect();
        for junction in junctions {
            match &self.junctions[junction] {
                Junction::TrafficLight(_) | Junction::FlaredLight(_) => {
                    self.schedule_light_cycles(junction, start_time, end_time);
                }
                Junction::Crossing(_) => {
                    self.schedule_crossing_cycles(junction, start_time, end_time);
                }
                _ => {}
            }
        }
    }

    /// Blocks a node over the given windows. Each window's end is drawn
    /// as `start + Normal(duration, duration_std)`, redrawn until it
    /// lies past the start.
    pub fn add_timed_obstruction(
        &mut self,
        node: NodeId,
        windows: &[(f64, f64)],
        duration_std: f64,
    ) -> Result<(), BuildError> {
        if duration_std < 0.0 {
            return Err(BuildError::NonPositive {
                context: "obstruction deviation",
                value: duration_std,
            });
        }
        for &(start, duration) in windows {
            if duration <= 0.0 {
                return Err(BuildError::NonPositiveDuration(duration));
            }
            let end = loop {
                let end = start + self.gaussian(duration, duration_std);
                if end > start {
                    break end;
                }
            };
            self.queue.push(
                start,
                Event::ObstructionStart {
                    node,
                    end_time: end,
                },
            );
        }
        self.nodes[node].obstruction = Some(Obstruction::Timed {
            active: false,
            end_time: 0.0,
        });
        self.nodes[node].service = true;
        Ok(())
    }

    /// Holds up each of the next `count` vehicles reaching the node for
    /// around `duration` seconds apiece.
    pub fn add_counted_obstruction(
        &mut self,
        node: NodeId,
        count: u32,
        duration: f64,
        duration_std: f64,
    ) -> Result<(), BuildError> {
        if duration <= 0.0 {
            return Err(BuildError::NonPositiveDuration(duration));
        }
        if count == 0 {
            return Err(BuildError::NonPositive {
                context: "obstruction count",
                value: 0.0,
            });
        }
        self.nodes[node].obstruction = Some(Obstruction::Counted {
            remaining: count,
            duration,
            duration_std,
            last_seen: None,
            end_time: 0.0,
        });
        Ok(())
    }

    /// Vehicles reaching this node adopt the given velocity.
    pub fn assign_velocity_change(
        &mut self,
        node: NodeId,
        velocity: f64,
    ) -> Result<(), BuildError> {
        if velocity < VELOCITY_FLOOR {
            return Err(BuildError::NonPositiveVelocity(velocity));
        }
        self.nodes[node].velocity_change = Some(velocity);
        Ok(())
    }

    /// Serialises the whole simulation state to JSON.
    pub fn to_snapshot(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restores a snapshot. The random stream is not part of a snapshot
    /// and restarts from the configured seed.
    pub fn from_snapshot(snapshot: &str) -> serde_json::Result<Self> {
        let mut sim: Simulation = serde_json::from_str(snapshot)?;
        sim.rng = SmallRng::seed_from_u64(sim.config.seed);
        Ok(sim)
    }
}
