pub use error::{BuildError, SimError};
pub use junction::{
    Approach, Circle, Crossing, FlaredLight, Intersection, Junction, OffRamp, OnRamp, Phase,
    Signal, StopStreet, Tpm, TrafficLight,
};
pub use lane::Lane;
pub use node::{Node, Obstruction, Role};
pub use queue::{Event, EventQueue};
pub use record::Record;
pub use simulation::{RunOutcome, SimConfig, Simulation, StepOutcome};
use slotmap::{new_key_type, SlotMap};
pub use source::{ArrivalPlan, RatePiece, Source};
pub use vehicle::{MoveHistory, MoveKind, Vehicle};

mod error;
pub mod junction;
mod lane;
mod node;
mod queue;
mod record;
mod simulation;
mod source;
mod vehicle;

new_key_type! {
    /// Unique ID of a [Node].
    pub struct NodeId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a [Junction].
    pub struct JunctionId;
    /// Unique ID of a [Lane].
    pub struct LaneId;
    /// Unique ID of a [Source].
    pub struct SourceId;
    /// Unique ID of a [Record].
    pub struct RecordId;
}

type NodeSet = SlotMap<NodeId, Node>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
