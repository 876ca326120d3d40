use crate::junction::Approach;
use crate::{JunctionId, LaneId, NodeId, RecordId, SourceId, VehicleId};
use serde::{Deserialize, Serialize};

/// Junction-specific behaviour attached to a node.
///
/// A plain node (no role) admits the standard one-node move. Roles on the
/// node ahead, or on the node a vehicle stands on, route its next move
/// through the owning junction's protocol instead.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Role {
    /// Entrance of a stop street.
    StopEntrance {
        junction: JunctionId,
        approach: Approach,
    },
    /// Exit of a stop street.
    StopExit {
        junction: JunctionId,
        approach: Approach,
    },
    /// Entrance of a signalled junction.
    LightEntrance {
        junction: JunctionId,
        approach: Approach,
    },
    /// Exit of a signalled junction.
    LightExit {
        junction: JunctionId,
        approach: Approach,
    },
    /// Entrance of a flared junction, feeding its turning buffers.
    FlaredEntrance {
        junction: JunctionId,
        approach: Approach,
    },
    /// Exit of a flared junction.
    FlaredExit {
        junction: JunctionId,
        approach: Approach,
    },
    /// Node inside a flared turning buffer. The last node of each buffer
    /// holds vehicles at the signal.
    Buffer { junction: JunctionId, end: bool },
    /// Entrance of a traffic circle.
    CircleEntrance {
        junction: JunctionId,
        approach: Approach,
    },
    /// Node on a traffic circle's circular lane.
    CircleLane { junction: JunctionId },
    /// Exit of a traffic circle, reached leftward off the circular lane.
    CircleExit {
        junction: JunctionId,
        approach: Approach,
    },
    /// Entrance of an unsignalled intersection.
    IntersectionEntrance {
        junction: JunctionId,
        approach: Approach,
    },
    /// Exit of an unsignalled intersection.
    IntersectionExit {
        junction: JunctionId,
        approach: Approach,
    },
    /// Main-flow entrance of an on-ramp merge.
    RampMain { junction: JunctionId },
    /// Merging entrance of an on-ramp.
    RampSub { junction: JunctionId },
    /// Node downstream of an on-ramp merge.
    RampExit { junction: JunctionId },
    /// Entrance of an off-ramp fork.
    OffRampEntrance { junction: JunctionId },
    /// Exit of an off-ramp fork.
    OffRampExit { junction: JunctionId, off: bool },
    /// Entrance of a pedestrian crossing buffer.
    CrossingEntrance { junction: JunctionId },
    /// Node inside a pedestrian crossing buffer. The node ahead of the
    /// gate is locked while pedestrians cross.
    CrossingBuffer { junction: JunctionId, exit: bool },
    /// Exit of a pedestrian crossing buffer.
    CrossingExit { junction: JunctionId },
}

/// A disruption occupying a node for some time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Obstruction {
    /// Blocks entry over scheduled windows of time.
    Timed { active: bool, end_time: f64 },
    /// Delays each of the next `remaining` vehicles that try to enter,
    /// then disappears.
    Counted {
        remaining: u32,
        duration: f64,
        duration_std: f64,
        last_seen: Option<VehicleId>,
        end_time: f64,
    },
}

impl Obstruction {
    /// Whether a vehicle trying to enter the node is held back.
    pub fn blocks(&self, vehicle: VehicleId) -> bool {
        match self {
            Obstruction::Timed { active, .. } => *active,
            Obstruction::Counted {
                remaining,
                last_seen,
                ..
            } => *remaining > 0 && *last_seen != Some(vehicle),
        }
    }
}

/// A point on the road network holding at most one vehicle.
///
/// Nodes chain through `front` and `behind`; `left` attaches the exit
/// nodes of a traffic circle. Junction wiring rewrites `front` and
/// `behind` as vehicles choose their exits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Node {
    pub(crate) front: Option<NodeId>,
    pub(crate) behind: Option<NodeId>,
    pub(crate) left: Option<NodeId>,
    pub(crate) occupant: Option<VehicleId>,
    /// Locked nodes refuse entry until their junction unlocks them.
    pub(crate) locked: bool,
    /// Service nodes do not count towards lane capacity.
    pub(crate) service: bool,
    /// One-use staging node created for a source arrival.
    pub(crate) staging: bool,
    pub(crate) role: Option<Role>,
    pub(crate) lane: Option<LaneId>,
    pub(crate) source: Option<SourceId>,
    pub(crate) record: Option<RecordId>,
    /// Vehicles adopt this velocity when they reach the node.
    pub(crate) velocity_change: Option<f64>,
    pub(crate) obstruction: Option<Obstruction>,
}

impl Node {
    pub fn occupant(&self) -> Option<VehicleId> {
        self.occupant
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn front(&self) -> Option<NodeId> {
        self.front
    }

    pub fn behind(&self) -> Option<NodeId> {
        self.behind
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn counted_obstruction_lets_the_same_vehicle_through_once() {
        let mut arena: SlotMap<crate::VehicleId, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let b = arena.insert(());
        let obstruction = Obstruction::Counted {
            remaining: 1,
            duration: 5.0,
            duration_std: 0.0,
            last_seen: Some(a),
            end_time: 5.0,
        };
        assert!(!obstruction.blocks(a));
        assert!(obstruction.blocks(b));
    }

    #[test]
    fn timed_obstruction_blocks_only_while_active() {
        let mut arena: SlotMap<crate::VehicleId, ()> = SlotMap::with_key();
        let a = arena.insert(());
        let mut obstruction = Obstruction::Timed {
            active: true,
            end_time: 3.0,
        };
        assert!(obstruction.blocks(a));
        if let Obstruction::Timed { active, .. } = &mut obstruction {
            *active = false;
        }
        assert!(!obstruction.blocks(a));
    }
}
