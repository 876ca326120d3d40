use crate::error::BuildError;
use crate::junction::{Approach, Junction, Tpm};
use crate::node::{Node, Role};
use crate::queue::Event;
use crate::vehicle::{MoveKind, CIRCLE_RETRY_EPS, RETRY_EPS};
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Seconds a refused vehicle waits beyond the conflict's own time.
const CIRCLE_DELAY: f64 = 0.1;

/// A traffic circle.
///
/// Four quarter arcs of `quarter_len` nodes form the circular lane.
/// Entrances feed the arc clockwise from their approach; exits hang off
/// the arc leftward, one quarter short of the opposite entrance. A
/// vehicle gives way to circulating traffic approaching from its right
/// and circulates at the circle's own velocity until its sampled exit
/// comes up on its left.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Circle {
    pub(crate) entrances: [Option<NodeId>; 4],
    pub(crate) exits: [NodeId; 4],
    pub(crate) quarters: [Vec<NodeId>; 4],
    pub(crate) tpm: Tpm,
    pub(crate) right_of_way_count: u32,
    pub(crate) p_risk: f64,
    pub(crate) within_velocity: f64,
}

impl Circle {
    /// Node span of the entry manoeuvre, in travel-time samples.
    pub(crate) const ENTRY_SIZE: u32 = 2;

    pub fn entrances(&self) -> &[Option<NodeId>; 4] {
        &self.entrances
    }

    pub fn exits(&self) -> &[NodeId; 4] {
        &self.exits
    }
}

impl Simulation {
    /// Builds a traffic circle over entrance and exit nodes indexed by
    /// approach, creating the circular lane itself.
    pub fn add_circle(
        &mut self,
        entrances: [Option<NodeId>; 4],
        exits: [Option<NodeId>; 4],
        tpm: Tpm,
        quarter_len: usize,
        right_of_way_count: u32,
        p_risk: f64,
        within_velocity: f64,
    ) -> Result<JunctionId, BuildError> {
        if entrances.iter().all(Option::is_none) {
            return Err(BuildError::NoApproaches);
        }
        if !(0.0..=1.0).contains(&p_risk) {
            return Err(BuildError::InvalidProbability {
                context: "risk taking",
                value: p_risk,
            });
        }
        if within_velocity <= 0.0 {
            return Err(BuildError::NonPositiveVelocity(within_velocity));
        }
        if quarter_len == 0 {
            return Err(BuildError::NonPositive {
                context: "quarter length",
                value: 0.0,
            });
        }
        self.check_unclaimed(entrances.iter().chain(exits.iter()).flatten().copied())?;
        let exits = self
            .fill_missing_exits(exits)
            .map(|exit| exit.unwrap_or_default());
        let quarters: [Vec<NodeId>; 4] = std::array::from_fn(|_| {
            let nodes: Vec<NodeId> = (0..quarter_len)
                .map(|_| self.nodes.insert(Node::default()))
                .collect();
            for pair in nodes.windows(2) {
                self.nodes[pair[0]].front = Some(pair[1]);
                self.nodes[pair[1]].behind = Some(pair[0]);
            }
            nodes
        });
        // close the ring
        for (a, b) in (0..4usize).circular_tuple_windows() {
            let tail = quarters[a][quarter_len - 1];
            let head = quarters[b][0];
            self.nodes[tail].front = Some(head);
            self.nodes[head].behind = Some(tail);
        }
        let junction = self.junctions.insert(Junction::Circle(Circle {
            entrances,
            exits,
            quarters: quarters.clone(),
            tpm,
            right_of_way_count,
            p_risk,
            within_velocity,
        }));
        for (i, approach) in Approach::ALL.into_iter().enumerate() {
            if let Some(entrance) = entrances[i] {
                let node = &mut self.nodes[entrance];
                node.front = Some(quarters[i][0]);
                node.service = true;
                node.role = Some(Role::CircleEntrance { junction, approach });
            }
            // hang the exit one quarter short of the opposite entrance
            let host = quarters[[3, 0, 1, 2][i]][quarter_len - 1];
            self.nodes[host].left = Some(exits[i]);
            let node = &mut self.nodes[exits[i]];
            node.behind = Some(host);
            node.service = true;
            node.role = Some(Role::CircleExit { junction, approach });
        }
        for quarter in &quarters {
            for &node in quarter {
                self.nodes[node].service = true;
                if self.nodes[node].role.is_none() {
                    self.nodes[node].role = Some(Role::CircleLane { junction });
                }
            }
        }
        Ok(junction)
    }

    /// A vehicle one node short of a circle entrance gives way to the
    /// circulating lane, then steps onto the entrance with its exit
    /// sampled and its velocity swapped for the circle's.
    pub(crate) fn schedule_circle_entry(
        &mut self,
        vehicle: VehicleId,
        entrance: NodeId,
        junction: JunctionId,
        from: Approach,
    ) {
        if let Some(occupant) = self.nodes[entrance].occupant {
            let retry = self.vehicles[occupant].time + RETRY_EPS;
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.wait = true;
            v.time = retry;
            v.last_move = MoveKind::Wait;
            self.queue.push(retry, Event::Vehicle(vehicle));
            return;
        }
        let node_id = self.vehicles[vehicle].node;
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let aranged = time + self.travel_time(vehicle, Circle::ENTRY_SIZE);
        let (need, p_risk, within_velocity, tpm, exits) = match &self.junctions[junction] {
            Junction::Circle(circle) => (
                circle.right_of_way_count,
                circle.p_risk,
                circle.within_velocity,
                circle.tpm.clone(),
                circle.exits,
            ),
            _ => return,
        };
        let Some(first) = self.nodes[entrance].front else {
            return;
        };
        let admission = self.assess_upstream(first, aranged, need, p_risk, CIRCLE_DELAY);
        self.vehicles[vehicle].n_nodes = Circle::ENTRY_SIZE;
        if admission.proceed {
            let to = tpm.sample(from, &mut self.rng);
            self.nodes[node_id].occupant = None;
            self.nodes[entrance].occupant = Some(vehicle);
            let v = &mut self.vehicles[vehicle];
            v.node = entrance;
            v.time = aranged;
            v.entrance_used = Some(from);
            v.exit_used = Some(to);
            v.circle_exit = Some(exits[to.index()]);
            v.saved_velocity = Some(v.velocity);
            v.velocity = within_velocity;
            v.in_circle = true;
            v.last_move = MoveKind::EnterCircle;
            self.queue.push(aranged, Event::Vehicle(vehicle));
        } else {
            let retry = admission.time + CIRCLE_RETRY_EPS;
            let v = &mut self.vehicles[vehicle];
            v.wait = true;
            v.time = retry;
            v.last_move = MoveKind::HaltAtCircle;
            self.queue.push(retry, Event::Vehicle(vehicle));
        }
    }

    /// Circulates one node, or leaves leftward when the designated exit
    /// comes up.
    pub(crate) fn schedule_circle_move(&mut self, vehicle: VehicleId) {
        let node_id = self.vehicles[vehicle].node;
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let mut restored_front: Option<Option<NodeId>> = None;
        if let (Some(left), Some(exit)) = (self.nodes[node_id].left, self.vehicles[vehicle].circle_exit)
        {
            if left == exit {
                // point the calibration at the exit for this one move
                restored_front = Some(self.nodes[node_id].front);
                self.nodes[node_id].front = Some(exit);
                self.vehicles[vehicle].exit_left = true;
                self.vehicles[vehicle].in_circle = false;
            }
        }
        let aranged = time + self.travel_time(vehicle, 1);
        self.calibrate_forward(vehicle, node_id, aranged);
        if let Some(front) = restored_front {
            self.nodes[node_id].front = front;
        }
        let v = &mut self.vehicles[vehicle];
        v.n_nodes = 1;
        if v.exit_left {
            if let Some(saved) = v.saved_velocity.take() {
                v.velocity = saved;
            }
            v.last_move = MoveKind::ExitCircle;
        } else {
            v.last_move = MoveKind::MoveWithinCircle;
        }
        let time = v.time;
        self.queue.push(time, Event::Vehicle(vehicle));
    }
}
