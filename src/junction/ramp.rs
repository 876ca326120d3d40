use crate::error::BuildError;
use crate::junction::Junction;
use crate::node::Role;
use crate::queue::Event;
use crate::vehicle::MoveKind;
use crate::{JunctionId, NodeId, Simulation, VehicleId};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Seconds a merging vehicle waits beyond the conflict's own time.
const RAMP_DELAY: f64 = 0.2;

/// An on-ramp merging a minor lane into a main lane.
///
/// Main-flow traffic passes straight through. A merging vehicle checks
/// upstream of the main entrance for a gap and either slots in or waits
/// for the conflict to clear.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnRamp {
    pub(crate) main_entrance: NodeId,
    pub(crate) sub_entrance: NodeId,
    pub(crate) exit: NodeId,
    pub(crate) right_of_way_count: u32,
    pub(crate) p_risk: f64,
}

impl OnRamp {
    /// Node span of the merge, in travel-time samples.
    pub(crate) const SIZE: u32 = 2;
}

/// An off-ramp forking a lane in two, taken with a fixed probability.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OffRamp {
    pub(crate) entrance: NodeId,
    pub(crate) off_exit: NodeId,
    pub(crate) on_exit: NodeId,
    pub(crate) off_prob: f64,
}

impl OffRamp {
    /// Node span of the fork, in travel-time samples.
    pub(crate) const SIZE: u32 = 2;
}

impl Simulation {
    /// Builds an on-ramp: `main_entrance` and `sub_entrance` both feed
    /// `exit`, with the main flow holding right of way.
    pub fn add_on_ramp(
        &mut self,
        main_entrance: NodeId,
        sub_entrance: NodeId,
        exit: NodeId,
        right_of_way_count: u32,
        p_risk: f64,
    ) -> Result<JunctionId, BuildError> {
        if !(0.0..=1.0).contains(&p_risk) {
            return Err(BuildError::InvalidProbability {
                context: "risk taking",
                value: p_risk,
            });
        }
        self.check_unclaimed([main_entrance, sub_entrance, exit])?;
        let junction = self.junctions.insert(Junction::OnRamp(OnRamp {
            main_entrance,
            sub_entrance,
            exit,
            right_of_way_count,
            p_risk,
        }));
        for (node, role) in [
            (main_entrance, Role::RampMain { junction }),
            (sub_entrance, Role::RampSub { junction }),
            (exit, Role::RampExit { junction }),
        ] {
            let n = &mut self.nodes[node];
            n.service = true;
            n.role = Some(role);
        }
        self.nodes[main_entrance].front = Some(exit);
        self.nodes[sub_entrance].front = Some(exit);
        self.nodes[exit].behind = Some(main_entrance);
        Ok(junction)
    }

    /// Builds an off-ramp: traffic at `entrance` leaves through
    /// `off_exit` with probability `off_prob`, else through `on_exit`.
    pub fn add_off_ramp(
        &mut self,
        entrance: NodeId,
        off_exit: NodeId,
        on_exit: NodeId,
        off_prob: f64,
    ) -> Result<JunctionId, BuildError> {
        if !(0.0..=1.0).contains(&off_prob) {
            return Err(BuildError::InvalidProbability {
                context: "off ramp",
                value: off_prob,
            });
        }
        self.check_unclaimed([entrance, off_exit, on_exit])?;
        let junction = self.junctions.insert(Junction::OffRamp(OffRamp {
            entrance,
            off_exit,
            on_exit,
            off_prob,
        }));
        let n = &mut self.nodes[entrance];
        n.service = true;
        n.role = Some(Role::OffRampEntrance { junction });
        for (node, off) in [(off_exit, true), (on_exit, false)] {
            let n = &mut self.nodes[node];
            n.service = true;
            n.role = Some(Role::OffRampExit { junction, off });
        }
        self.nodes[entrance].front = Some(on_exit);
        self.nodes[on_exit].behind = Some(entrance);
        Ok(junction)
    }

    /// A vehicle on the merging entrance looks for a gap in the main
    /// flow and either merges or waits for the conflict to pass.
    pub(crate) fn schedule_on_ramp(
        &mut self,
        vehicle: VehicleId,
        node_id: NodeId,
        junction: JunctionId,
    ) {
        let (main_entrance, exit, need, p_risk) = match &self.junctions[junction] {
            Junction::OnRamp(ramp) => (
                ramp.main_entrance,
                ramp.exit,
                ramp.right_of_way_count,
                ramp.p_risk,
            ),
            _ => return,
        };
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let aranged = time + self.travel_time(vehicle, OnRamp::SIZE);
        // calibrate against the merge target as if we were behind it
        self.nodes[exit].behind = Some(node_id);
        self.calibrate_forward(vehicle, node_id, aranged);
        let admission = self.assess_upstream(main_entrance, aranged, need, p_risk, RAMP_DELAY);
        self.nodes[exit].behind = Some(main_entrance);
        let v = &mut self.vehicles[vehicle];
        v.n_nodes = OnRamp::SIZE;
        if admission.proceed {
            v.time = admission.time;
            v.last_move = MoveKind::EnterRamp;
        } else {
            v.wait = true;
            v.time = admission.time;
            v.last_move = MoveKind::HaltAtRamp;
        }
        let time = v.time;
        self.queue.push(time, Event::Vehicle(vehicle));
    }

    /// A vehicle on the off-ramp entrance flips for the fork and wires
    /// its choice before the standard two-node move.
    pub(crate) fn schedule_off_ramp(
        &mut self,
        vehicle: VehicleId,
        node_id: NodeId,
        junction: JunctionId,
    ) {
        let (off_exit, on_exit, off_prob) = match &self.junctions[junction] {
            Junction::OffRamp(ramp) => (ramp.off_exit, ramp.on_exit, ramp.off_prob),
            _ => return,
        };
        let off = self.rng.gen::<f64>() < off_prob;
        let chosen = if off { off_exit } else { on_exit };
        self.nodes[node_id].front = Some(chosen);
        self.nodes[chosen].behind = Some(node_id);
        let time = self.vehicles[vehicle].time;
        self.vehicles[vehicle].last_time = time;
        let aranged = time + self.travel_time(vehicle, OffRamp::SIZE);
        self.calibrate_forward(vehicle, node_id, aranged);
        let v = &mut self.vehicles[vehicle];
        v.n_nodes = OffRamp::SIZE;
        v.last_move = if off {
            MoveKind::ExitOffRamp
        } else {
            MoveKind::PassOffRamp
        };
        let time = v.time;
        self.queue.push(time, Event::Vehicle(vehicle));
    }
}
