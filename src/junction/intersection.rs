use crate::error::BuildError;
use crate::junction::{Admission, Approach, Junction, Tpm};
use crate::node::Role;
use crate::queue::Event;
use crate::vehicle::MoveKind;
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Seconds a yielding vehicle waits beyond the conflict's own time.
const INTERSECTION_DELAY: f64 = 0.2;

/// An unsignalled intersection where a minor road crosses a main road.
///
/// North and south are the main flow and cross freely; turns across
/// oncoming traffic, and any move from the minor east and west
/// approaches, must find a gap first. Two vehicles halted on opposing
/// approaches and both turning across each other would deadlock; the
/// one that halted first goes, the other follows just after.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Intersection {
    pub(crate) entrances: [NodeId; 4],
    pub(crate) exits: [NodeId; 4],
    pub(crate) tpm: Tpm,
    pub(crate) right_of_way_count: u32,
    pub(crate) p_risk: f64,
}

impl Intersection {
    /// Node span of a crossing, in travel-time samples.
    pub(crate) const SIZE: u32 = 1;

    pub fn entrances(&self) -> &[NodeId; 4] {
        &self.entrances
    }

    pub fn exits(&self) -> &[NodeId; 4] {
        &self.exits
    }
}

impl Simulation {
    /// Builds an intersection over entrance and exit nodes indexed by
    /// approach, with north and south as the main flow.
    pub fn add_intersection(
        &mut self,
        entrances: [NodeId; 4],
        exits: [NodeId; 4],
        tpm: Tpm,
        right_of_way_count: u32,
        p_risk: f64,
    ) -> Result<JunctionId, BuildError> {
        if !(0.0..=1.0).contains(&p_risk) {
            return Err(BuildError::InvalidProbability {
                context: "risk taking",
                value: p_risk,
            });
        }
        self.check_unclaimed(entrances.iter().chain(exits.iter()).copied())?;
        let junction = self.junctions.insert(Junction::Intersection(Intersection {
            entrances,
            exits,
            tpm,
            right_of_way_count,
            p_risk,
        }));
        for (i, approach) in Approach::ALL.into_iter().enumerate() {
            let node = &mut self.nodes[entrances[i]];
            // provisional straight-ahead wiring; sampling rewires it per
            // vehicle. An unwired entrance would read as end-of-road.
            node.front = Some(exits[approach.opposing().index()]);
            node.service = true;
            node.role = Some(Role::IntersectionEntrance { junction, approach });
            let node = &mut self.nodes[exits[i]];
            node.service = true;
            node.role = Some(Role::IntersectionExit { junction, approach });
        }
        Ok(junction)
    }

    /// A vehicle standing on an intersection entrance samples its exit
    /// once, then crosses as soon as right of way allows.
    pub(crate) fn schedule_intersection(
        &mut self,
        vehicle: VehicleId,
        node_id: NodeId,
        junction: JunctionId,
        from: Approach,
    ) {
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let (tpm, entrances, exits) = match &self.junctions[junction] {
            Junction::Intersection(intersection) => (
                intersection.tpm.clone(),
                intersection.entrances,
                intersection.exits,
            ),
            _ => return,
        };
        if !self.vehicles[vehicle].exit_chosen {
            let to = tpm.sample(from, &mut self.rng);
            let exit = exits[to.index()];
            self.nodes[node_id].front = Some(exit);
            self.nodes[exit].behind = Some(node_id);
            self.vehicles[vehicle].entrance_used = Some(from);
            self.vehicles[vehicle].exit_used = Some(to);
            self.vehicles[vehicle].exit_chosen = true;
        }
        let exit_id = match self.nodes[node_id].front {
            Some(exit) => exit,
            None => return,
        };
        let Some(to) = Approach::ALL
            .into_iter()
            .find(|a| exits[a.index()] == exit_id)
        else {
            return;
        };
        let aranged = time + self.travel_time(vehicle, Intersection::SIZE);
        self.calibrate_forward(vehicle, node_id, aranged);
        let aranged = self.vehicles[vehicle].time;
        self.vehicles[vehicle].n_nodes = Intersection::SIZE;
        // two opposing halted vehicles turning across each other
        let opposing = entrances[from.opposing().index()];
        if let Some(other) = self.nodes[opposing].occupant {
            let mine = self.vehicles[vehicle].intersection_halt;
            let theirs = self.vehicles[other].intersection_halt;
            if let (Some(my_stamp), Some(their_stamp)) = (mine, theirs) {
                if my_stamp <= their_stamp {
                    let delayed = aranged + self.jitter(INTERSECTION_DELAY);
                    self.vehicles[other].time = delayed;
                    self.queue.reschedule(other, delayed);
                    self.vehicles[vehicle].time = aranged;
                } else {
                    let their_time = self.vehicles[other].time;
                    self.vehicles[vehicle].time = their_time + self.jitter(INTERSECTION_DELAY);
                }
                for id in [vehicle, other] {
                    let v = &mut self.vehicles[id];
                    v.wait = false;
                    v.exit_chosen = false;
                    v.has_halted = false;
                    v.intersection_halt = None;
                    v.last_move = MoveKind::CrossIntersection;
                }
                let time = self.vehicles[vehicle].time;
                self.queue.push(time, Event::Vehicle(vehicle));
                return;
            }
        }
        let admission = self.intersection_right_of_way(junction, from, to, aranged);
        if admission.proceed {
            let v = &mut self.vehicles[vehicle];
            v.time = admission.time;
            v.exit_chosen = false;
            v.has_halted = false;
            v.intersection_halt = None;
            v.last_move = MoveKind::CrossIntersection;
        } else {
            let v = &mut self.vehicles[vehicle];
            v.wait = true;
            v.time = admission.time;
            if v.has_halted {
                v.last_move = MoveKind::Wait;
            } else {
                v.has_halted = true;
                v.last_move = MoveKind::HaltAtIntersection;
            }
        }
        let time = self.vehicles[vehicle].time;
        self.queue.push(time, Event::Vehicle(vehicle));
    }

    /// Which entrances a crossing from `from` to `to` must yield to, and
    /// whether a usable gap exists right now.
    fn intersection_right_of_way(
        &mut self,
        junction: JunctionId,
        from: Approach,
        to: Approach,
        aranged: f64,
    ) -> Admission {
        use Approach::*;
        let (entrances, need, p_risk) = match &self.junctions[junction] {
            Junction::Intersection(intersection) => (
                intersection.entrances,
                intersection.right_of_way_count,
                intersection.p_risk,
            ),
            _ => {
                return Admission {
                    proceed: true,
                    time: aranged,
                }
            }
        };
        let conflicts: SmallVec<[Approach; 3]> = match (from, to) {
            (North, East) | (North, South) => SmallVec::new(),
            (North, West) => SmallVec::from_slice(&[South]),
            (South, North) | (South, West) => SmallVec::new(),
            (South, East) => SmallVec::from_slice(&[North]),
            (East, North) => SmallVec::from_slice(&[North, South, West]),
            (East, South) => SmallVec::from_slice(&[North]),
            (East, West) => SmallVec::from_slice(&[North, South]),
            (West, North) => SmallVec::from_slice(&[South]),
            (West, East) => SmallVec::from_slice(&[North, South]),
            (West, South) => SmallVec::from_slice(&[North, South, East]),
            _ => SmallVec::new(),
        };
        for conflict in conflicts {
            let entrance = entrances[conflict.index()];
            let main = matches!(conflict, North | South);
            let admission = if main {
                self.assess_upstream(entrance, aranged, need, p_risk, INTERSECTION_DELAY)
            } else {
                self.assess_minor(entrance, aranged, INTERSECTION_DELAY)
            };
            if !admission.proceed {
                return admission;
            }
        }
        Admission {
            proceed: true,
            time: aranged,
        }
    }
}
