use crate::error::BuildError;
use crate::junction::{Approach, Junction, Tpm};
use crate::node::{Node, Role};
use crate::queue::Event;
use crate::vehicle::{MoveKind, RETRY_EPS};
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use serde::{Deserialize, Serialize};

/// A four-way stop.
///
/// The whole junction is a critical section: a crossing vehicle locks
/// every entrance until it reaches its exit, and vehicles refused at a
/// locked entrance retry in the order they asked, first come first
/// served.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StopStreet {
    pub(crate) entrances: [Option<NodeId>; 4],
    pub(crate) exits: [Option<NodeId>; 4],
    pub(crate) tpm: Tpm,
    pub(crate) unlock_time: f64,
    pub(crate) n_requests: u32,
}

impl StopStreet {
    /// Node span of a crossing, in travel-time samples.
    pub(crate) const SIZE: u32 = 2;

    /// Hands out staggered retry times so queued vehicles keep their
    /// arrival order.
    pub(crate) fn request_unlock_time(&mut self) -> f64 {
        self.n_requests += 1;
        self.unlock_time + self.n_requests as f64 * RETRY_EPS
    }

    pub(crate) fn update_unlock_time(&mut self, time: f64) {
        self.unlock_time = time;
        self.n_requests = 0;
    }

    pub fn entrances(&self) -> &[Option<NodeId>; 4] {
        &self.entrances
    }

    pub fn exits(&self) -> &[Option<NodeId>; 4] {
        &self.exits
    }
}

impl Simulation {
    /// Builds a stop street over the given entrance and exit nodes,
    /// indexed by approach. Absent exits get a sink node.
    pub fn add_stop_street(
        &mut self,
        entrances: [Option<NodeId>; 4],
        exits: [Option<NodeId>; 4],
        tpm: Tpm,
    ) -> Result<JunctionId, BuildError> {
        if entrances.iter().all(Option::is_none) {
            return Err(BuildError::NoApproaches);
        }
        self.check_unclaimed(entrances.iter().chain(exits.iter()).flatten().copied())?;
        let exits = self.fill_missing_exits(exits);
        let junction = self.junctions.insert(Junction::StopStreet(StopStreet {
            entrances,
            exits,
            tpm,
            unlock_time: 0.0,
            n_requests: 0,
        }));
        for (i, approach) in Approach::ALL.into_iter().enumerate() {
            if let Some(entrance) = entrances[i] {
                let node = &mut self.nodes[entrance];
                node.front = None;
                node.service = true;
                node.role = Some(Role::StopEntrance { junction, approach });
            }
            if let Some(exit) = exits[i] {
                let node = &mut self.nodes[exit];
                node.service = true;
                node.role = Some(Role::StopExit { junction, approach });
            }
        }
        Ok(junction)
    }

    /// A vehicle one node short of a stop street entrance either queues
    /// behind the lock or claims the junction and crosses.
    pub(crate) fn schedule_stop_street(
        &mut self,
        vehicle: VehicleId,
        entrance: NodeId,
        junction: JunctionId,
        from: Approach,
    ) {
        if self.nodes[entrance].locked || self.nodes[entrance].occupant.is_some() {
            let retry = match &mut self.junctions[junction] {
                Junction::StopStreet(street) => street.request_unlock_time(),
                _ => return,
            };
            let v = &mut self.vehicles[vehicle];
            v.last_time = v.time;
            v.wait = true;
            v.time = retry;
            v.last_move = MoveKind::HaltAtStop;
            self.queue.push(retry, Event::Vehicle(vehicle));
            return;
        }
        let node_id = self.vehicles[vehicle].node;
        let (tpm, exits, all_entrances) = match &self.junctions[junction] {
            Junction::StopStreet(street) => (
                street.tpm.clone(),
                street.exits,
                street.entrances,
            ),
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
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let exit_time = time + self.travel_time(vehicle, StopStreet::SIZE);
        self.calibrate_forward(vehicle, node_id, exit_time);
        // step onto the entrance now; the queued event is the crossing
        self.nodes[node_id].occupant = None;
        self.nodes[entrance].occupant = Some(vehicle);
        let v = &mut self.vehicles[vehicle];
        v.node = entrance;
        v.time = exit_time;
        v.last_move = MoveKind::CrossStop;
        v.n_nodes = StopStreet::SIZE;
        for node in all_entrances.into_iter().flatten() {
            self.nodes[node].locked = true;
        }
        if let Junction::StopStreet(street) = &mut self.junctions[junction] {
            street.update_unlock_time(exit_time);
        }
        self.queue.push(exit_time, Event::Vehicle(vehicle));
    }

    /// Reopens every entrance once a crossing vehicle leaves.
    pub(crate) fn unlock_stop_street(&mut self, junction: JunctionId) {
        let entrances = match &self.junctions[junction] {
            Junction::StopStreet(street) => street.entrances,
            _ => return,
        };
        for node in entrances.into_iter().flatten() {
            self.nodes[node].locked = false;
        }
    }

    /// Rejects nodes that already belong to a junction.
    pub(crate) fn check_unclaimed(
        &self,
        nodes: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), BuildError> {
        for node in nodes {
            if self.nodes[node].role.is_some() {
                return Err(BuildError::NodeInUse(node));
            }
        }
        Ok(())
    }

    /// Replaces absent exits with fresh sink nodes so sampled routes
    /// always have somewhere to go.
    pub(crate) fn fill_missing_exits(
        &mut self,
        exits: [Option<NodeId>; 4],
    ) -> [Option<NodeId>; 4] {
        exits.map(|exit| Some(exit.unwrap_or_else(|| self.nodes.insert(Node::default()))))
    }
}
