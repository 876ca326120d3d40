use crate::error::BuildError;
use crate::{NodeId, RecordId, Simulation, SourceId, VehicleId};
use serde::{Deserialize, Serialize};

/// Observation point at the end of a road.
///
/// Stamps each vehicle that leaves the network at its node with the
/// departure time and the source it came from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Record {
    pub(crate) node: NodeId,
    pub(crate) times: Vec<f64>,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) velocities: Vec<f64>,
}

impl Record {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn sources(&self) -> &[SourceId] {
        &self.sources
    }

    pub fn velocities(&self) -> &[f64] {
        &self.velocities
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl Simulation {
    /// Attaches a record to a node. Vehicles disposed there are stamped.
    pub fn add_record(&mut self, node: NodeId) -> Result<RecordId, BuildError> {
        if self.nodes[node].record.is_some() {
            return Err(BuildError::NodeInUse(node));
        }
        let record = self.records.insert(Record {
            node,
            ..Record::default()
        });
        self.nodes[node].record = Some(record);
        Ok(record)
    }

    pub fn record(&self, record: RecordId) -> &Record {
        &self.records[record]
    }

    pub(crate) fn observe(&mut self, record: RecordId, vehicle: VehicleId) {
        let (time, source, velocity) = {
            let v = &self.vehicles[vehicle];
            (v.time, v.source, v.velocity)
        };
        let r = &mut self.records[record];
        r.times.push(time);
        r.sources.push(source);
        r.velocities.push(velocity);
    }
}
