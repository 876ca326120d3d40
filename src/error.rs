use crate::junction::Approach;
use crate::{NodeId, SourceId};
use thiserror::Error;

/// An error raised while assembling a road network.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BuildError {
    #[error("a lane needs at least two nodes, got {0}")]
    LaneTooShort(usize),
    #[error("probability {value} for {context} is outside [0, 1]")]
    InvalidProbability { context: &'static str, value: f64 },
    #[error("transition row {row} sums to {sum}, expected 1")]
    TransitionRow { row: usize, sum: f64 },
    #[error("transition matrix routes {0:?} back onto itself")]
    SelfTransition(Approach),
    #[error("phase both locks and unlocks the {0:?} approach")]
    OverlappingPhase(Approach),
    #[error("duration must be positive, got {0}")]
    NonPositiveDuration(f64),
    #[error("velocity must be positive, got {0}")]
    NonPositiveVelocity(f64),
    #[error("{context} must be positive, got {value}")]
    NonPositive { context: &'static str, value: f64 },
    #[error("node is already attached to a junction")]
    NodeInUse(NodeId),
    #[error("a junction needs at least one of its approaches")]
    NoApproaches,
    #[error("a signalled junction needs at least one phase")]
    NoPhases,
}

/// An error raised while a simulation is running.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimError {
    #[error("lane fed by source is full at time {time}")]
    LaneOverflow { source_id: SourceId, time: f64 },
    #[error("run window [{start}, {end}] is empty")]
    InvalidWindow { start: f64, end: f64 },
}
