use crate::error::BuildError;
use crate::junction::{Approach, Junction, Phase, Signal, Tpm};
use crate::node::Role;
use crate::queue::Event;
use crate::vehicle::MoveKind;
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A signalled four-way junction.
///
/// Entrances are locked and unlocked by the phases of a cycle. A vehicle
/// at a green entrance crosses straight through; one arriving as the
/// phase runs out gets a short grace window scaled by its velocity
/// before it must stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrafficLight {
    pub(crate) entrances: [Option<NodeId>; 4],
    pub(crate) exits: [Option<NodeId>; 4],
    pub(crate) phases: Vec<Phase>,
    pub(crate) shuffle: bool,
    /// Matrix of the phase currently in force.
    pub(crate) tpm: Tpm,
    pub(crate) signals: [Signal; 4],
    pub(crate) unlock_time: f64,
    pub(crate) n_requests: u32,
}

impl TrafficLight {
    /// Node span of a crossing, in travel-time samples.
    pub(crate) const SIZE: u32 = 2;

    pub(crate) fn request_unlock_time(&mut self) -> f64 {
        self.n_requests += 1;
        self.unlock_time + self.n_requests as f64 * crate::vehicle::RETRY_EPS
    }

    pub(crate) fn update_unlock_time(&mut self, time: f64) {
        self.unlock_time = time;
        self.n_requests = 0;
    }

    /// Signal currently shown to each approach.
    pub fn signals(&self) -> [Signal; 4] {
        self.signals
    }

    pub fn entrances(&self) -> &[Option<NodeId>; 4] {
        &self.entrances
    }

    pub fn exits(&self) -> &[Option<NodeId>; 4] {
        &self.exits
    }
}

/// Phase letting the north and south approaches flow straight through
/// each other, with the given probabilities of continuing (the rest turn
/// towards the nearer side).
pub fn n_s_flow(duration: f64, p_ns: f64, p_sn: f64) -> Result<Phase, BuildError> {
    through_flow(duration, Approach::North, Approach::South, p_ns, p_sn)
}

/// Phase letting the west and east approaches flow.
pub fn w_e_flow(duration: f64, p_we: f64, p_ew: f64) -> Result<Phase, BuildError> {
    through_flow(duration, Approach::West, Approach::East, p_we, p_ew)
}

/// North and south flow strictly straight through.
pub fn n_s_overwash(duration: f64) -> Result<Phase, BuildError> {
    through_flow(duration, Approach::North, Approach::South, 1.0, 1.0)
}

/// West and east flow strictly straight through.
pub fn w_e_overwash(duration: f64) -> Result<Phase, BuildError> {
    through_flow(duration, Approach::West, Approach::East, 1.0, 1.0)
}

/// Phase giving the north approach sole right of way, splitting its
/// traffic left, straight and right.
pub fn n_flow(duration: f64, p_left: f64, p_straight: f64, p_right: f64) -> Result<Phase, BuildError> {
    single_flow(duration, Approach::North, p_left, p_straight, p_right)
}

pub fn e_flow(duration: f64, p_left: f64, p_straight: f64, p_right: f64) -> Result<Phase, BuildError> {
    single_flow(duration, Approach::East, p_left, p_straight, p_right)
}

pub fn s_flow(duration: f64, p_left: f64, p_straight: f64, p_right: f64) -> Result<Phase, BuildError> {
    single_flow(duration, Approach::South, p_left, p_straight, p_right)
}

pub fn w_flow(duration: f64, p_left: f64, p_straight: f64, p_right: f64) -> Result<Phase, BuildError> {
    single_flow(duration, Approach::West, p_left, p_straight, p_right)
}

fn through_flow(
    duration: f64,
    a: Approach,
    b: Approach,
    p_ab: f64,
    p_ba: f64,
) -> Result<Phase, BuildError> {
    for p in [p_ab, p_ba] {
        if !(0.0..=1.0).contains(&p) {
            return Err(BuildError::InvalidProbability {
                context: "through flow",
                value: p,
            });
        }
    }
    let mut rows = [[0.0; 4]; 4];
    // the remainder turns off short of going straight through
    rows[a.index()][b.index()] = p_ab;
    rows[a.index()][left_of(a)] += 1.0 - p_ab;
    rows[b.index()][a.index()] = p_ba;
    rows[b.index()][left_of(b)] += 1.0 - p_ba;
    let tpm = Tpm::new(rows)?;
    let lock: Vec<Approach> = Approach::ALL
        .into_iter()
        .filter(|x| *x != a && *x != b)
        .collect();
    Phase::new(duration, [a, b], lock, tpm)
}

fn single_flow(
    duration: f64,
    from: Approach,
    p_left: f64,
    p_straight: f64,
    p_right: f64,
) -> Result<Phase, BuildError> {
    let mut rows = [[0.0; 4]; 4];
    let i = from.index();
    rows[i][(i + 1) % 4] = p_left;
    rows[i][(i + 2) % 4] = p_straight;
    rows[i][(i + 3) % 4] = p_right;
    let tpm = Tpm::new(rows)?;
    let lock: Vec<Approach> = Approach::ALL
        .into_iter()
        .filter(|x| *x != from)
        .collect();
    Phase::new(duration, [from], lock, tpm)
}

fn left_of(from: Approach) -> usize {
    (from.index() + 1) % 4
}

impl Simulation {
    /// Builds a traffic light over entrance and exit nodes indexed by
    /// approach. Phases apply in order, or in shuffled order without
    /// immediate repeats when `shuffle` is set.
    pub fn add_traffic_light(
        &mut self,
        entrances: [Option<NodeId>; 4],
        exits: [Option<NodeId>; 4],
        phases: Vec<Phase>,
        shuffle: bool,
    ) -> Result<JunctionId, BuildError> {
        if entrances.iter().all(Option::is_none) {
            return Err(BuildError::NoApproaches);
        }
        if phases.is_empty() {
            return Err(BuildError::NoPhases);
        }
        self.check_unclaimed(entrances.iter().chain(exits.iter()).flatten().copied())?;
        let exits = self.fill_missing_exits(exits);
        let tpm = phases[0].tpm.clone();
        let signals = phases[0].signals();
        let junction = self.junctions.insert(Junction::TrafficLight(TrafficLight {
            entrances,
            exits,
            phases,
            shuffle,
            tpm,
            signals,
            unlock_time: 0.0,
            n_requests: 0,
        }));
        for (i, approach) in Approach::ALL.into_iter().enumerate() {
            if let Some(entrance) = entrances[i] {
                let node = &mut self.nodes[entrance];
                node.front = None;
                node.service = true;
                node.locked = true;
                node.role = Some(Role::LightEntrance { junction, approach });
            }
            if let Some(exit) = exits[i] {
                let node = &mut self.nodes[exit];
                node.service = true;
                node.role = Some(Role::LightExit { junction, approach });
            }
        }
        Ok(junction)
    }

    /// A vehicle one node short of a traffic light entrance queues
    /// behind its occupant, waits for red, or attempts the crossing.
    pub(crate) fn schedule_traffic_light(
        &mut self,
        vehicle: VehicleId,
        entrance: NodeId,
        junction: JunctionId,
        from: Approach,
    ) {
        let node_id = self.vehicles[vehicle].node;
        if let Some(occupant) = self.nodes[entrance].occupant {
            let their_time = self.vehicles[occupant].time;
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.wait = true;
            v.last_move = MoveKind::Wait;
            self.calibrate_backward(entrance, their_time);
            let time = self.vehicles[vehicle].time;
            self.queue.push(time, Event::Vehicle(vehicle));
            return;
        }
        if self.nodes[entrance].locked {
            let retry = match &mut self.junctions[junction] {
                Junction::TrafficLight(light) => light.request_unlock_time(),
                _ => return,
            };
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.wait = true;
            v.last_move = MoveKind::HaltAtLight;
            self.calibrate_backward(node_id, retry);
            let time = self.vehicles[vehicle].time;
            self.queue.push(time, Event::Vehicle(vehicle));
            return;
        }
        // green
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        if !self.vehicles[vehicle].exit_chosen {
            let (tpm, exits) = match &self.junctions[junction] {
                Junction::TrafficLight(light) => (light.tpm.clone(), light.exits),
                _ => return,
            };
            let to = tpm.sample(from, &mut self.rng);
            let Some(exit) = exits[to.index()] else {
                return;
            };
            self.vehicles[vehicle].entrance_used = Some(from);
            self.vehicles[vehicle].exit_used = Some(to);
            self.nodes[entrance].front = Some(exit);
            self.nodes[exit].behind = Some(entrance);
        }
        let exit_time = time + self.travel_time(vehicle, TrafficLight::SIZE);
        self.calibrate_forward(vehicle, node_id, exit_time);
        let unlock_time = match &self.junctions[junction] {
            Junction::TrafficLight(light) => light.unlock_time,
            _ => return,
        };
        let grace = (TrafficLight::SIZE as f64 / 2.0) / self.vehicles[vehicle].velocity;
        let cutoff = unlock_time + grace;
        if self.vehicles[vehicle].time > cutoff {
            // too late into the yellow; stop at the line instead
            let v = &mut self.vehicles[vehicle];
            v.time = cutoff;
            v.wait = true;
            v.exit_chosen = true;
            v.last_move = MoveKind::HaltAtLight;
        } else {
            self.nodes[node_id].occupant = None;
            self.nodes[entrance].occupant = Some(vehicle);
            let v = &mut self.vehicles[vehicle];
            v.node = entrance;
            v.time = exit_time;
            v.exit_chosen = false;
            v.last_move = MoveKind::CrossLight;
        }
        self.vehicles[vehicle].n_nodes = TrafficLight::SIZE;
        let new_time = self.vehicles[vehicle].time;
        self.queue.push(new_time, Event::Vehicle(vehicle));
        self.wake_followers(vehicle, node_id);
    }

    /// Tells the queue behind a vacated (or halted-at) node to close up
    /// shortly after this vehicle's own time.
    fn wake_followers(&mut self, vehicle: VehicleId, node_id: NodeId) {
        let Some(behind) = self.nodes[node_id].behind else {
            return;
        };
        let start = if self.nodes[behind].occupant.is_some() {
            Some(behind)
        } else {
            self.nodes[behind].behind
        };
        let Some(start) = start else {
            return;
        };
        if self.nodes[start].occupant.is_none() {
            return;
        }
        let delay = self.jitter(self.config.reaction_delay);
        let aranged = self.vehicles[vehicle].time + delay;
        self.calibrate_backward(start, aranged);
    }

    /// Puts a phase in force: reroutes the matrix, flips the signals and
    /// locks and unlocks the named approaches.
    pub(crate) fn activate_phase(&mut self, junction: JunctionId, phase: usize, end_time: f64) {
        enum Kind {
            Plain([Option<NodeId>; 4]),
            Flared([NodeId; 4], [NodeId; 4]),
        }
        let (unlock, lock, nodes) = match &mut self.junctions[junction] {
            Junction::TrafficLight(light) => {
                let Some(p) = light.phases.get(phase) else {
                    return;
                };
                let (tpm, signals) = (p.tpm.clone(), p.signals());
                let (unlock, lock) = (p.unlock.clone(), p.lock.clone());
                light.tpm = tpm;
                light.signals = signals;
                light.update_unlock_time(end_time);
                (unlock, lock, Kind::Plain(light.entrances))
            }
            Junction::FlaredLight(light) => {
                let Some(p) = light.phases.get(phase) else {
                    return;
                };
                let (tpm, signals) = (p.tpm.clone(), p.signals());
                let (unlock, lock) = (p.unlock.clone(), p.lock.clone());
                light.tpm = tpm;
                light.signals = signals;
                light.update_unlock_time(end_time);
                (
                    unlock,
                    lock,
                    Kind::Flared(light.left_gates(), light.right_gates()),
                )
            }
            _ => return,
        };
        log::debug!("phase {phase} in force until {end_time}");
        match nodes {
            Kind::Plain(entrances) => {
                for approach in unlock {
                    if let Some(node) = entrances[approach.index()] {
                        self.nodes[node].locked = false;
                    }
                }
                for approach in lock {
                    if let Some(node) = entrances[approach.index()] {
                        self.nodes[node].locked = true;
                    }
                }
            }
            Kind::Flared(left, right) => {
                for approach in unlock {
                    self.nodes[left[approach.index()]].locked = false;
                    self.nodes[right[approach.index()]].locked = false;
                }
                for approach in lock {
                    self.nodes[left[approach.index()]].locked = true;
                    self.nodes[right[approach.index()]].locked = true;
                }
            }
        }
    }

    /// Expands a signal cycle into phase events from `start` until the
    /// first boundary at or past `end`.
    pub(crate) fn schedule_light_cycles(&mut self, junction: JunctionId, start: f64, end: f64) {
        let (durations, shuffle) = match &self.junctions[junction] {
            Junction::TrafficLight(light) => (
                light.phases.iter().map(Phase::duration).collect::<Vec<_>>(),
                light.shuffle,
            ),
            Junction::FlaredLight(light) => (
                light.phases.iter().map(Phase::duration).collect::<Vec<_>>(),
                light.shuffle,
            ),
            _ => return,
        };
        let n = durations.len();
        if n == 0 {
            return;
        }
        let mut time = start;
        let mut phase = 0;
        loop {
            let phase_end = time + durations[phase];
            self.queue.push(
                time,
                Event::Phase {
                    junction,
                    phase,
                    end_time: phase_end,
                },
            );
            time = phase_end;
            if time >= end {
                break;
            }
            phase = if shuffle && n > 1 {
                loop {
                    let next = self.rng.gen_range(0..n);
                    if next != phase {
                        break next;
                    }
                }
            } else {
                (phase + 1) % n
            };
        }
    }
}
