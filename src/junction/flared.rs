use crate::error::BuildError;
use crate::junction::{Approach, Junction, Phase, Signal, Tpm};
use crate::node::{Node, Role};
use crate::queue::Event;
use crate::vehicle::MoveKind;
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use serde::{Deserialize, Serialize};

/// Buffer length of each turning pocket.
const BUFFER_LEN: usize = 3;

/// Which buffer serves each (from, to) pair: `Some(true)` is the left
/// pocket, `Some(false)` the right, `None` a u-turn and unreachable.
const LEFT_BUFFER: [[Option<bool>; 4]; 4] = [
    [None, Some(true), Some(true), Some(false)],
    [Some(false), None, Some(true), Some(true)],
    [Some(true), Some(false), None, Some(true)],
    [Some(true), Some(true), Some(false), None],
];

/// A signalled junction with short turning pockets.
///
/// Each approach forks into a left and a right buffer ahead of the stop
/// line; the sampled exit decides the pocket at entry, and the pocket's
/// last node is the gate the signal locks. The right pocket keeps a
/// fixed exit wired; the left pocket's gate is rewired per vehicle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlaredLight {
    pub(crate) entrances: [NodeId; 4],
    pub(crate) exits: [NodeId; 4],
    pub(crate) left_buffers: [[NodeId; BUFFER_LEN]; 4],
    pub(crate) right_buffers: [[NodeId; BUFFER_LEN]; 4],
    pub(crate) phases: Vec<Phase>,
    pub(crate) shuffle: bool,
    pub(crate) tpm: Tpm,
    pub(crate) signals: [Signal; 4],
    pub(crate) unlock_time: f64,
    pub(crate) n_requests: u32,
}

impl FlaredLight {
    /// Node span of the crossing proper, in travel-time samples.
    pub(crate) const SIZE: u32 = 2;

    pub(crate) fn request_unlock_time(&mut self) -> f64 {
        self.n_requests += 1;
        self.unlock_time + self.n_requests as f64 * crate::vehicle::RETRY_EPS
    }

    pub(crate) fn update_unlock_time(&mut self, time: f64) {
        self.unlock_time = time;
        self.n_requests = 0;
    }

    /// Gate node of each left pocket.
    pub(crate) fn left_gates(&self) -> [NodeId; 4] {
        self.left_buffers.map(|buffer| buffer[BUFFER_LEN - 1])
    }

    /// Gate node of each right pocket.
    pub(crate) fn right_gates(&self) -> [NodeId; 4] {
        self.right_buffers.map(|buffer| buffer[BUFFER_LEN - 1])
    }

    /// Exit permanently wired to an approach's right pocket.
    fn right_exit(&self, from: Approach) -> NodeId {
        self.exits[[3, 0, 1, 2][from.index()]]
    }

    pub fn signals(&self) -> [Signal; 4] {
        self.signals
    }

    pub fn entrances(&self) -> &[NodeId; 4] {
        &self.entrances
    }

    pub fn exits(&self) -> &[NodeId; 4] {
        &self.exits
    }
}

impl Simulation {
    /// Builds a flared traffic light over entrance nodes indexed by
    /// approach, creating both turning pockets per approach. Absent
    /// entrances and exits get fresh nodes.
    pub fn add_flared_light(
        &mut self,
        entrances: [Option<NodeId>; 4],
        exits: [Option<NodeId>; 4],
        phases: Vec<Phase>,
        shuffle: bool,
    ) -> Result<JunctionId, BuildError> {
        if phases.is_empty() {
            return Err(BuildError::NoPhases);
        }
        self.check_unclaimed(entrances.iter().chain(exits.iter()).flatten().copied())?;
        let entrances = entrances
            .map(|node| node.unwrap_or_else(|| self.nodes.insert(Node::default())));
        let exits = exits.map(|node| node.unwrap_or_else(|| self.nodes.insert(Node::default())));
        let tpm = phases[0].tpm.clone();
        let signals = phases[0].signals();
        let make_buffer = |sim: &mut Simulation| {
            let nodes: [NodeId; BUFFER_LEN] =
                std::array::from_fn(|_| sim.nodes.insert(Node::default()));
            for pair in nodes.windows(2) {
                sim.nodes[pair[0]].front = Some(pair[1]);
                sim.nodes[pair[1]].behind = Some(pair[0]);
            }
            nodes
        };
        let left_buffers: [[NodeId; BUFFER_LEN]; 4] = std::array::from_fn(|_| make_buffer(self));
        let right_buffers: [[NodeId; BUFFER_LEN]; 4] = std::array::from_fn(|_| make_buffer(self));
        let junction = self.junctions.insert(Junction::FlaredLight(FlaredLight {
            entrances,
            exits,
            left_buffers,
            right_buffers,
            phases,
            shuffle,
            tpm,
            signals,
            unlock_time: 0.0,
            n_requests: 0,
        }));
        for (i, approach) in Approach::ALL.into_iter().enumerate() {
            let entrance = entrances[i];
            {
                let node = &mut self.nodes[entrance];
                node.front = Some(left_buffers[i][0]);
                node.service = true;
                node.role = Some(Role::FlaredEntrance { junction, approach });
            }
            {
                let node = &mut self.nodes[exits[i]];
                node.service = true;
                node.role = Some(Role::FlaredExit { junction, approach });
            }
            for (j, &buffer_node) in left_buffers[i].iter().enumerate() {
                let end = j == BUFFER_LEN - 1;
                let node = &mut self.nodes[buffer_node];
                node.service = true;
                node.locked = end;
                node.role = Some(Role::Buffer { junction, end });
                if j == 0 {
                    node.behind = Some(entrance);
                }
            }
            for (j, &buffer_node) in right_buffers[i].iter().enumerate() {
                let end = j == BUFFER_LEN - 1;
                let node = &mut self.nodes[buffer_node];
                node.service = true;
                node.locked = end;
                node.role = Some(Role::Buffer { junction, end });
                if j == 0 {
                    node.behind = Some(entrance);
                }
            }
        }
        // right pockets have their exits fixed for good
        for approach in Approach::ALL {
            let (gate, exit) = match &self.junctions[junction] {
                Junction::FlaredLight(light) => (
                    light.right_buffers[approach.index()][BUFFER_LEN - 1],
                    light.right_exit(approach),
                ),
                _ => unreachable!(),
            };
            self.nodes[gate].front = Some(exit);
            self.nodes[exit].behind = Some(gate);
        }
        // left gates get a provisional straight-ahead exit; the vehicle's
        // designated exit rewires it at the gate. An unwired gate would
        // read as end-of-road.
        for approach in Approach::ALL {
            let gate = left_buffers[approach.index()][BUFFER_LEN - 1];
            self.nodes[gate].front = Some(exits[approach.opposing().index()]);
        }
        Ok(junction)
    }

    /// At a flared entrance: sample the exit, pick the pocket serving
    /// that turn and step towards it.
    pub(crate) fn schedule_buffer_entry(
        &mut self,
        vehicle: VehicleId,
        node_id: NodeId,
        junction: JunctionId,
        from: Approach,
    ) {
        let (tpm, exits, left0, right0) = match &self.junctions[junction] {
            Junction::FlaredLight(light) => (
                light.tpm.clone(),
                light.exits,
                light.left_buffers[from.index()][0],
                light.right_buffers[from.index()][0],
            ),
            _ => return,
        };
        let to = tpm.sample(from, &mut self.rng);
        let use_left = LEFT_BUFFER[from.index()][to.index()].unwrap_or(true);
        self.nodes[node_id].front = Some(if use_left { left0 } else { right0 });
        self.vehicles[vehicle].entrance_used = Some(from);
        self.vehicles[vehicle].exit_used = Some(to);
        self.vehicles[vehicle].flared_exit = Some(exits[to.index()]);
        self.vehicles[vehicle].last_move = MoveKind::EnterBuffer;
        self.schedule_standard(vehicle);
    }

    /// At a pocket gate: wait on red, otherwise wire the designated exit
    /// and schedule the crossing.
    pub(crate) fn schedule_buffer_exit(
        &mut self,
        vehicle: VehicleId,
        node_id: NodeId,
        junction: JunctionId,
    ) {
        if self.nodes[node_id].locked {
            let retry = match &mut self.junctions[junction] {
                Junction::FlaredLight(light) => light.request_unlock_time(),
                _ => return,
            };
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.wait = true;
            v.time = retry;
            v.last_move = MoveKind::HaltAtLight;
            self.queue.push(retry, Event::Vehicle(vehicle));
            return;
        }
        if let Some(exit) = self.vehicles[vehicle].flared_exit.take() {
            self.nodes[node_id].front = Some(exit);
            self.nodes[exit].behind = Some(node_id);
        }
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let aranged = time + self.travel_time(vehicle, FlaredLight::SIZE);
        self.calibrate_forward(vehicle, node_id, aranged);
        self.vehicles[vehicle].n_nodes = FlaredLight::SIZE;
        self.vehicles[vehicle].last_move = MoveKind::ExitBuffer;
        let time = self.vehicles[vehicle].time;
        self.queue.push(time, Event::Vehicle(vehicle));
    }
}
