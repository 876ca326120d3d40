use crate::error::SimError;
use crate::junction::Approach;
use crate::node::{Obstruction, Role};
use crate::queue::Event;
use crate::{NodeId, Simulation, SourceId, VehicleId};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Smallest retry offset; also the lower bound of every jitter draw.
pub(crate) const RETRY_EPS: f64 = 1e-3;
/// Extra margin added when retrying entry to a circle.
pub(crate) const CIRCLE_RETRY_EPS: f64 = 1e-6;
/// Velocities are clamped here to keep travel times finite.
pub(crate) const VELOCITY_FLOOR: f64 = 0.1;
/// Travel time samples are clamped to stay positive.
const TRAVEL_TIME_FLOOR: f64 = RETRY_EPS;

/// The manoeuvre a vehicle last committed or has scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveKind {
    Standard,
    Wait,
    Dispose,
    SourceArrival,
    HaltAtStop,
    CrossStop,
    HaltAtLight,
    CrossLight,
    EnterBuffer,
    MoveWithinBuffer,
    ExitBuffer,
    HaltAtCircle,
    EnterCircle,
    MoveWithinCircle,
    ExitCircle,
    HaltAtIntersection,
    CrossIntersection,
    HaltAtRamp,
    EnterRamp,
    PassRamp,
    ExitOffRamp,
    PassOffRamp,
    EnterCrossing,
    MoveWithinCrossing,
    ExitCrossing,
}

/// Per-move log kept when a source asks for movement recording.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveHistory {
    pub times: Vec<f64>,
    pub node_counts: Vec<u32>,
    pub distances: Vec<f64>,
    pub velocities: Vec<f64>,
    pub kinds: Vec<MoveKind>,
}

/// A vehicle travelling the network one node at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vehicle {
    /// Time at which the scheduled manoeuvre completes.
    pub(crate) time: f64,
    pub(crate) velocity: f64,
    pub(crate) node: NodeId,
    pub(crate) source: SourceId,
    /// The scheduled event is a hold, not a movement.
    pub(crate) wait: bool,
    /// The vehicle leaves the network when its next event fires.
    pub(crate) dispose: bool,
    pub(crate) last_time: f64,
    pub(crate) last_move: MoveKind,
    /// Approaches of the last junction manoeuvre, for display.
    pub(crate) entrance_used: Option<Approach>,
    pub(crate) exit_used: Option<Approach>,
    /// Number of nodes the scheduled manoeuvre spans.
    pub(crate) n_nodes: u32,
    /// A junction exit has been sampled and wired; do not re-sample.
    pub(crate) exit_chosen: bool,
    pub(crate) in_circle: bool,
    /// The next committed move leaves the circular lane leftward.
    pub(crate) exit_left: bool,
    pub(crate) circle_exit: Option<NodeId>,
    pub(crate) saved_velocity: Option<f64>,
    /// Designated exit node beyond a flared buffer.
    pub(crate) flared_exit: Option<NodeId>,
    pub(crate) has_halted: bool,
    /// Time the vehicle came to a halt at an intersection, if it did.
    pub(crate) intersection_halt: Option<f64>,
    pub(crate) history: Option<MoveHistory>,
}

impl Vehicle {
    pub(crate) fn new(
        time: f64,
        velocity: f64,
        node: NodeId,
        source: SourceId,
        record_movement: bool,
    ) -> Self {
        Self {
            time,
            velocity,
            node,
            source,
            wait: false,
            dispose: false,
            last_time: time,
            last_move: MoveKind::SourceArrival,
            entrance_used: None,
            exit_used: None,
            n_nodes: 1,
            exit_chosen: false,
            in_circle: false,
            exit_left: false,
            circle_exit: None,
            saved_velocity: None,
            flared_exit: None,
            has_halted: false,
            intersection_halt: None,
            history: record_movement.then(MoveHistory::default),
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn last_move(&self) -> MoveKind {
        self.last_move
    }

    /// Approach the last junction manoeuvre entered from, if any.
    pub fn entrance_used(&self) -> Option<Approach> {
        self.entrance_used
    }

    /// Approach the last junction manoeuvre left through, if any.
    pub fn exit_used(&self) -> Option<Approach> {
        self.exit_used
    }

    /// Duration of the scheduled manoeuvre.
    pub fn move_duration(&self) -> f64 {
        self.time - self.last_time
    }

    pub fn history(&self) -> Option<&MoveHistory> {
        self.history.as_ref()
    }
}

impl Simulation {
    /// Normal sample, falling back to the mean for degenerate parameters.
    pub(crate) fn gaussian(&mut self, mean: f64, std: f64) -> f64 {
        match Normal::new(mean, std) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        }
    }

    /// Time to traverse `nodes` nodes at the vehicle's current velocity,
    /// one noisy sample per node.
    pub(crate) fn travel_time(&mut self, vehicle: VehicleId, nodes: u32) -> f64 {
        let velocity = self.vehicles[vehicle].velocity.max(VELOCITY_FLOOR);
        let mean = self.config.node_distance / velocity;
        let std = self.config.travel_time_std;
        let mut total = 0.0;
        for _ in 0..nodes {
            total += self.gaussian(mean, std).max(TRAVEL_TIME_FLOOR);
        }
        total
    }

    /// Plans the vehicle's next manoeuvre and pushes it onto the queue.
    ///
    /// The node ahead is inspected first: junction entrances, obstructions
    /// and sinks take priority. Otherwise the node the vehicle stands on
    /// decides, falling through to the standard one-node move.
    pub(crate) fn schedule_move(&mut self, vehicle: VehicleId) -> Result<(), SimError> {
        let node_id = self.vehicles[vehicle].node;
        if let Some(velocity) = self.nodes[node_id].velocity_change {
            self.vehicles[vehicle].velocity = velocity.max(VELOCITY_FLOOR);
        }
        let Some(front_id) = self.nodes[node_id].front else {
            // end of the road
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.last_move = MoveKind::Dispose;
            v.dispose = true;
            let time = v.time;
            self.queue.push(time, Event::Vehicle(vehicle));
            return Ok(());
        };
        if self.schedule_obstructed(vehicle, front_id) {
            return Ok(());
        }
        match self.nodes[front_id].role {
            Some(Role::StopEntrance { junction, approach }) => {
                self.schedule_stop_street(vehicle, front_id, junction, approach);
                return Ok(());
            }
            Some(Role::LightEntrance { junction, approach }) => {
                self.schedule_traffic_light(vehicle, front_id, junction, approach);
                return Ok(());
            }
            Some(Role::CircleEntrance { junction, approach }) => {
                self.schedule_circle_entry(vehicle, front_id, junction, approach);
                return Ok(());
            }
            _ => {}
        }
        if self.vehicles[vehicle].in_circle {
            self.schedule_circle_move(vehicle);
            return Ok(());
        }
        match self.nodes[node_id].role {
            Some(Role::OffRampEntrance { junction }) => {
                self.schedule_off_ramp(vehicle, node_id, junction)
            }
            Some(Role::RampSub { junction }) => self.schedule_on_ramp(vehicle, node_id, junction),
            Some(Role::RampMain { .. }) => {
                self.vehicles[vehicle].last_move = MoveKind::PassRamp;
                self.schedule_standard(vehicle);
            }
            Some(Role::FlaredEntrance { junction, approach }) => {
                self.schedule_buffer_entry(vehicle, node_id, junction, approach)
            }
            Some(Role::Buffer { junction, end }) => {
                if end {
                    self.schedule_buffer_exit(vehicle, node_id, junction);
                } else {
                    self.vehicles[vehicle].last_move = MoveKind::MoveWithinBuffer;
                    self.schedule_standard(vehicle);
                }
            }
            Some(Role::IntersectionEntrance { junction, approach }) => {
                self.schedule_intersection(vehicle, node_id, junction, approach)
            }
            Some(Role::CrossingEntrance { .. }) => {
                self.vehicles[vehicle].last_move = MoveKind::EnterCrossing;
                self.schedule_standard(vehicle);
            }
            Some(Role::CrossingBuffer { junction, exit }) => {
                if exit {
                    self.vehicles[vehicle].last_move = MoveKind::ExitCrossing;
                    self.schedule_standard(vehicle);
                } else {
                    self.schedule_crossing_step(vehicle, junction, front_id);
                }
            }
            _ => {
                if self.nodes[front_id].source.is_some() {
                    self.schedule_source_arrival(vehicle, front_id)?;
                } else {
                    self.vehicles[vehicle].last_move = MoveKind::Standard;
                    self.schedule_standard(vehicle);
                }
            }
        }
        Ok(())
    }

    /// Holds the vehicle if the node ahead is obstructed. Returns whether
    /// a hold was scheduled.
    fn schedule_obstructed(&mut self, vehicle: VehicleId, front_id: NodeId) -> bool {
        let Some(obstruction) = self.nodes[front_id].obstruction else {
            return false;
        };
        if !obstruction.blocks(vehicle) {
            return false;
        }
        let retry = match obstruction {
            Obstruction::Timed { end_time, .. } => end_time + RETRY_EPS,
            Obstruction::Counted {
                remaining,
                duration,
                duration_std,
                ..
            } => {
                let held_until = self.vehicles[vehicle].time
                    + self.gaussian(duration, duration_std).max(TRAVEL_TIME_FLOOR);
                let next_remaining = remaining.saturating_sub(1);
                if let Some(Obstruction::Counted {
                    remaining,
                    last_seen,
                    end_time,
                    ..
                }) = &mut self.nodes[front_id].obstruction
                {
                    *remaining = next_remaining;
                    *last_seen = Some(vehicle);
                    *end_time = held_until;
                }
                if next_remaining == 0 {
                    log::debug!("counted obstruction exhausted at time {held_until}");
                }
                held_until + RETRY_EPS
            }
        };
        let v = &mut self.vehicles[vehicle];
        v.last_time = v.time;
        v.wait = true;
        v.time = retry;
        v.last_move = MoveKind::Wait;
        self.queue.push(retry, Event::Vehicle(vehicle));
        true
    }

    /// The standard move: one node forward after a noisy travel time,
    /// calibrated against the traffic ahead.
    pub(crate) fn schedule_standard(&mut self, vehicle: VehicleId) {
        let node_id = self.vehicles[vehicle].node;
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let aranged = time + self.travel_time(vehicle, 1);
        self.calibrate_forward(vehicle, node_id, aranged);
        self.vehicles[vehicle].n_nodes = 1;
        let time = self.vehicles[vehicle].time;
        self.queue.push(time, Event::Vehicle(vehicle));
    }

    /// Schedules the hop from a staging node onto the network proper,
    /// checking the fed lane for overflow first.
    fn schedule_source_arrival(
        &mut self,
        vehicle: VehicleId,
        target: NodeId,
    ) -> Result<(), SimError> {
        if let Some(lane) = self.nodes[target].lane {
            if self.lanes[lane].overflow_protection && self.lane_is_full(lane) {
                let source_id = self.vehicles[vehicle].source;
                let time = self.vehicles[vehicle].time;
                log::warn!("lane fed by a source overflowed at time {time}");
                return Err(SimError::LaneOverflow { source_id, time });
            }
        }
        let node_id = self.vehicles[vehicle].node;
        let time = self.vehicles[vehicle].time;
        let v = &mut self.vehicles[vehicle];
        v.last_time = time;
        v.last_move = MoveKind::SourceArrival;
        v.n_nodes = 1;
        self.calibrate_forward(vehicle, node_id, time);
        let time = self.vehicles[vehicle].time;
        self.queue.push(time, Event::Vehicle(vehicle));
        Ok(())
    }

    /// Adjusts velocity against the traffic ahead, then fixes the arrival
    /// time against any queue the vehicle would run into.
    pub(crate) fn calibrate_forward(&mut self, vehicle: VehicleId, start: NodeId, aranged: f64) {
        if self.config.look_ahead.is_some() {
            self.calibrate_forward_velocity(vehicle, start);
        }
        self.calibrate_forward_time(vehicle, start, aranged);
    }

    /// Walks ahead while the scheduled arrival would beat the occupant
    /// there, then walks back from the head of that queue assigning each
    /// follower a slightly later time than its leader.
    fn calibrate_forward_time(&mut self, vehicle: VehicleId, start: NodeId, aranged: f64) {
        self.vehicles[vehicle].time = aranged;
        let mut current = start;
        loop {
            let Some(next) = self.nodes[current].front else {
                break;
            };
            // staging chains must stay walkable backwards
            if self.nodes[next].source.is_some() {
                self.nodes[next].behind = Some(current);
            }
            match self.nodes[next].occupant {
                Some(occupant) if aranged <= self.vehicles[occupant].time => current = next,
                _ => break,
            }
        }
        while current != start {
            let (behind, lead) = {
                let node = &self.nodes[current];
                (node.behind, node.occupant)
            };
            let (Some(behind), Some(lead)) = (behind, lead) else {
                break;
            };
            let Some(follower) = self.nodes[behind].occupant else {
                break;
            };
            let delay = self.jitter(self.config.reaction_delay);
            let time = self.vehicles[lead].time + delay;
            self.vehicles[follower].time = time;
            self.queue.reschedule(follower, time);
            current = behind;
        }
    }

    /// Nudges the vehicle's velocity towards the first vehicle visible
    /// within the look-ahead horizon. Junction boundaries end the scan.
    fn calibrate_forward_velocity(&mut self, vehicle: VehicleId, start: NodeId) {
        let Some(look_ahead) = self.config.look_ahead else {
            return;
        };
        let Some(mut current) = self.nodes[start].front else {
            return;
        };
        let mut count: u32 = 1;
        loop {
            if let Some(occupant) = self.nodes[current].occupant {
                let theirs = self.vehicles[occupant].velocity;
                let mine = self.vehicles[vehicle].velocity;
                let delta = if self.config.smooth_correction {
                    (theirs - mine) / count as f64
                } else {
                    theirs - mine
                };
                let corrected = mine + self.config.velocity_correction * delta;
                self.vehicles[vehicle].velocity = corrected.max(VELOCITY_FLOOR);
                return;
            }
            let Some(next) = self.nodes[current].front else {
                return;
            };
            current = next;
            count += 1;
            if count > look_ahead {
                return;
            }
            let node = &self.nodes[current];
            match node.role {
                Some(Role::StopEntrance { .. }) => return,
                Some(Role::LightEntrance { .. }) if node.locked => return,
                Some(
                    Role::CircleEntrance { .. }
                    | Role::RampMain { .. }
                    | Role::RampSub { .. }
                    | Role::OffRampEntrance { .. },
                ) if node.occupant.is_none() => return,
                _ => {}
            }
        }
    }

    /// Assigns `aranged` to the occupant of `start` and pushes the delay
    /// down the queue standing behind it.
    pub(crate) fn calibrate_backward(&mut self, start: NodeId, aranged: f64) {
        let mut current = start;
        let mut time = aranged;
        loop {
            let Some(occupant) = self.nodes[current].occupant else {
                break;
            };
            self.vehicles[occupant].time = time;
            self.queue.reschedule(occupant, time);
            let Some(behind) = self.nodes[current].behind else {
                break;
            };
            if self.nodes[behind].occupant.is_none() {
                break;
            }
            time += self.jitter(self.config.reaction_delay);
            current = behind;
        }
    }

    /// Commits the manoeuvre the popped event stands for.
    ///
    /// A disposal removes the vehicle; a hold clears its flag; otherwise
    /// the vehicle steps to the next node. A target that filled up since
    /// scheduling turns the move into a recalibrated hold.
    pub(crate) fn commit_move(&mut self, vehicle: VehicleId) {
        if self.vehicles[vehicle].history.is_some() {
            self.record_movement(vehicle);
        }
        let node_id = self.vehicles[vehicle].node;
        if let Some(front_id) = self.nodes[node_id].front {
            let blocked = matches!(self.nodes[front_id].occupant, Some(o) if o != vehicle);
            if blocked {
                match self.vehicles[vehicle].last_move {
                    MoveKind::EnterCircle => {
                        // already standing on the entrance; hold there
                        self.vehicles[vehicle].in_circle = true;
                        self.vehicles[vehicle].last_move = MoveKind::HaltAtCircle;
                        return;
                    }
                    // the circle exit and intersection halt do not use the
                    // front link, so a blocked front does not stop them
                    MoveKind::ExitCircle | MoveKind::HaltAtIntersection => {}
                    _ => {
                        let time = self.vehicles[vehicle].time;
                        self.calibrate_forward(vehicle, node_id, time);
                        self.vehicles[vehicle].last_move = MoveKind::Wait;
                        return;
                    }
                }
            }
        }
        if self.vehicles[vehicle].exit_left {
            if let Some(exit) = self.nodes[node_id].left {
                if self.nodes[exit].occupant.is_some() {
                    self.vehicles[vehicle].in_circle = true;
                    self.vehicles[vehicle].exit_left = false;
                    self.vehicles[vehicle].last_move = MoveKind::Wait;
                    return;
                }
            }
        }
        if self.vehicles[vehicle].last_move == MoveKind::HaltAtIntersection {
            let time = self.vehicles[vehicle].time;
            self.vehicles[vehicle].intersection_halt = Some(time);
        }
        if self.vehicles[vehicle].dispose {
            if let Some(record) = self.nodes[node_id].record {
                self.observe(record, vehicle);
            }
            self.nodes[node_id].occupant = None;
            log::trace!("vehicle disposed at time {}", self.queue.clock());
            self.vehicles.remove(vehicle);
            return;
        }
        if self.vehicles[vehicle].wait {
            self.vehicles[vehicle].wait = false;
            return;
        }
        // leaving a stop street entrance releases its locks
        if let Some(Role::StopEntrance { junction, .. }) = self.nodes[node_id].role {
            self.unlock_stop_street(junction);
        }
        let next = if self.vehicles[vehicle].exit_left {
            self.vehicles[vehicle].exit_left = false;
            self.nodes[node_id].left
        } else {
            self.nodes[node_id].front
        };
        let Some(next_id) = next else {
            return;
        };
        self.nodes[node_id].occupant = None;
        if self.nodes[node_id].staging {
            if self.nodes[next_id].behind == Some(node_id) {
                self.nodes[next_id].behind = None;
            }
            self.nodes.remove(node_id);
        }
        self.vehicles[vehicle].node = next_id;
        self.nodes[next_id].occupant = Some(vehicle);
    }

    /// Appends the committed manoeuvre to the vehicle's history.
    fn record_movement(&mut self, vehicle: VehicleId) {
        let node_distance = self.config.node_distance;
        let v = &mut self.vehicles[vehicle];
        let duration = v.time - v.last_time;
        let (nodes, distance) = if v.last_move == MoveKind::Wait {
            (0, 0.0)
        } else {
            (v.n_nodes, v.n_nodes as f64 * node_distance)
        };
        let velocity = if duration > 0.0 {
            distance / duration
        } else {
            0.0
        };
        if let Some(history) = v.history.as_mut() {
            history.times.push(v.time);
            history.node_counts.push(nodes);
            history.distances.push(distance);
            history.velocities.push(velocity);
            history.kinds.push(v.last_move);
        }
    }
}
