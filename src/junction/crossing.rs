use crate::error::BuildError;
use crate::junction::Junction;
use crate::node::{Node, Role};
use crate::queue::Event;
use crate::vehicle::MoveKind;
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

/// Buffer length on each side of a crossing.
const BUFFER_LEN: usize = 10;
/// Index of the gate node held shut while pedestrians cross.
const GATE: usize = 5;

/// A pedestrian crossing over a two-way road.
///
/// Pedestrian activity follows a two-state continuous-time Markov chain
/// alternating between crossing and clear. While pedestrians cross, the
/// gate node in each direction's buffer is locked and vehicles hold one
/// node short of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Crossing {
    pub(crate) entrances: [NodeId; 2],
    pub(crate) exits: [NodeId; 2],
    pub(crate) buffers: [[NodeId; BUFFER_LEN]; 2],
    /// Rate of pedestrians arriving (clear to crossing).
    pub(crate) on_rate: f64,
    /// Rate of the crossing clearing (crossing to clear).
    pub(crate) off_rate: f64,
    /// Probability the crossing starts occupied.
    pub(crate) initial_on_prob: f64,
    pub(crate) unlock_time: f64,
    pub(crate) n_requests: u32,
}

impl Crossing {
    pub(crate) fn request_unlock_time(&mut self) -> f64 {
        self.n_requests += 1;
        self.unlock_time + self.n_requests as f64 * crate::vehicle::RETRY_EPS
    }

    pub(crate) fn update_unlock_time(&mut self, time: f64) {
        self.unlock_time = time;
        self.n_requests = 0;
    }

    /// The locked-while-crossing node of each buffer.
    pub(crate) fn gates(&self) -> [NodeId; 2] {
        [self.buffers[0][GATE], self.buffers[1][GATE]]
    }
}

impl Simulation {
    /// Builds a pedestrian crossing between two pairs of nodes, one per
    /// direction of travel, creating the buffers in between.
    pub fn add_crossing(
        &mut self,
        entrances: [NodeId; 2],
        exits: [NodeId; 2],
        on_rate: f64,
        off_rate: f64,
        initial_on_prob: f64,
    ) -> Result<JunctionId, BuildError> {
        for (context, value) in [("arrival rate", on_rate), ("clearing rate", off_rate)] {
            if value <= 0.0 {
                return Err(BuildError::NonPositive { context, value });
            }
        }
        if !(0.0..=1.0).contains(&initial_on_prob) {
            return Err(BuildError::InvalidProbability {
                context: "initial crossing state",
                value: initial_on_prob,
            });
        }
        self.check_unclaimed(entrances.iter().chain(exits.iter()).copied())?;
        let buffers: [[NodeId; BUFFER_LEN]; 2] = std::array::from_fn(|_| {
            let nodes: [NodeId; BUFFER_LEN] =
                std::array::from_fn(|_| self.nodes.insert(Node::default()));
            for pair in nodes.windows(2) {
                self.nodes[pair[0]].front = Some(pair[1]);
                self.nodes[pair[1]].behind = Some(pair[0]);
            }
            nodes
        });
        let junction = self.junctions.insert(Junction::Crossing(Crossing {
            entrances,
            exits,
            buffers,
            on_rate,
            off_rate,
            initial_on_prob,
            unlock_time: 0.0,
            n_requests: 0,
        }));
        for side in 0..2 {
            let entrance = entrances[side];
            let exit = exits[side];
            let buffer = buffers[side];
            {
                let node = &mut self.nodes[entrance];
                node.front = Some(buffer[0]);
                node.service = true;
                node.role = Some(Role::CrossingEntrance { junction });
            }
            self.nodes[buffer[0]].behind = Some(entrance);
            for (j, &buffer_node) in buffer.iter().enumerate() {
                let node = &mut self.nodes[buffer_node];
                node.service = true;
                node.role = Some(Role::CrossingBuffer {
                    junction,
                    exit: j == BUFFER_LEN - 1,
                });
            }
            self.nodes[buffer[BUFFER_LEN - 1]].front = Some(exit);
            let node = &mut self.nodes[exit];
            node.behind = Some(buffer[BUFFER_LEN - 1]);
            node.service = true;
            node.role = Some(Role::CrossingExit { junction });
        }
        Ok(junction)
    }

    /// A vehicle inside the buffer holds one node short of a locked
    /// gate, otherwise steps forward normally.
    pub(crate) fn schedule_crossing_step(
        &mut self,
        vehicle: VehicleId,
        junction: JunctionId,
        front_id: NodeId,
    ) {
        if self.nodes[front_id].locked {
            let retry = match &mut self.junctions[junction] {
                Junction::Crossing(crossing) => crossing.request_unlock_time(),
                _ => return,
            };
            let retry = retry + self.jitter(self.config.reaction_delay);
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.wait = true;
            v.time = retry;
            v.last_move = MoveKind::Wait;
            self.queue.push(retry, Event::Vehicle(vehicle));
            return;
        }
        self.vehicles[vehicle].last_move = MoveKind::MoveWithinCrossing;
        self.schedule_standard(vehicle);
    }

    /// Locks both gates for the crossing window and schedules its end.
    pub(crate) fn start_crossing(&mut self, junction: JunctionId, end_time: f64) {
        let gates = match &mut self.junctions[junction] {
            Junction::Crossing(crossing) => {
                crossing.update_unlock_time(end_time);
                crossing.gates()
            }
            _ => return,
        };
        for gate in gates {
            self.nodes[gate].locked = true;
        }
        log::debug!("pedestrians crossing until {end_time}");
        self.queue.push(end_time, Event::CrossingEnd { junction });
    }

    /// Reopens both gates.
    pub(crate) fn end_crossing(&mut self, junction: JunctionId) {
        let gates = match &self.junctions[junction] {
            Junction::Crossing(crossing) => crossing.gates(),
            _ => return,
        };
        for gate in gates {
            self.nodes[gate].locked = false;
        }
    }

    /// Simulates the pedestrian chain by uniformisation over the run
    /// window and schedules one event per crossing interval.
    pub(crate) fn schedule_crossing_cycles(&mut self, junction: JunctionId, start: f64, end: f64) {
        let (on_rate, off_rate, initial_on_prob) = match &self.junctions[junction] {
            Junction::Crossing(crossing) => (
                crossing.on_rate,
                crossing.off_rate,
                crossing.initial_on_prob,
            ),
            _ => return,
        };
        let lambda = on_rate.max(off_rate);
        let Ok(holding) = Exp::new(lambda) else {
            return;
        };
        // self-transition probabilities of the embedded jump chain
        let stay_on = 1.0 - off_rate / lambda;
        let stay_off = 1.0 - on_rate / lambda;
        let mut on = self.rng.gen::<f64>() < initial_on_prob;
        let mut crossing_started = start;
        let mut time = start;
        loop {
            time += holding.sample(&mut self.rng);
            let roll: f64 = self.rng.gen();
            let next_on = if on { roll < stay_on } else { roll >= stay_off };
            if on && !next_on {
                self.queue.push(
                    crossing_started,
                    Event::CrossingStart {
                        junction,
                        end_time: time,
                    },
                );
            } else if !on && next_on {
                crossing_started = time;
            }
            if time >= end {
                // an interval still open at the window edge keeps the
                // gates shut until this last sampled jump
                if on && next_on {
                    self.queue.push(
                        crossing_started,
                        Event::CrossingStart {
                            junction,
                            end_time: time,
                        },
                    );
                }
                break;
            }
            on = next_on;
        }
    }
}
