use crate::{LaneId, Node, NodeId, Simulation};
use crate::error::BuildError;
use serde::{Deserialize, Serialize};

/// A one-way chain of nodes.
///
/// The first node receives traffic, the last hands it to whatever the
/// lane is linked to. Capacity counts only non-service nodes, so nodes
/// donated to junctions or obstructed for works do not hold arrivals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lane {
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) overflow_protection: bool,
}

impl Lane {
    /// First node of the lane.
    pub fn entry(&self) -> NodeId {
        self.nodes[0]
    }

    /// Last node of the lane.
    pub fn exit(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Simulation {
    /// Creates a lane of `length` chained nodes.
    ///
    /// With `overflow_protection`, a source feeding this lane raises an
    /// error when an arrival finds the lane at capacity.
    pub fn add_lane(
        &mut self,
        length: usize,
        overflow_protection: bool,
    ) -> Result<LaneId, BuildError> {
        if length < 2 {
            return Err(BuildError::LaneTooShort(length));
        }
        let lane = self.lanes.insert(Lane {
            nodes: Vec::new(),
            overflow_protection,
        });
        let nodes: Vec<NodeId> = (0..length)
            .map(|_| {
                self.nodes.insert(Node {
                    lane: Some(lane),
                    ..Node::default()
                })
            })
            .collect();
        for pair in nodes.windows(2) {
            self.nodes[pair[0]].front = Some(pair[1]);
            self.nodes[pair[1]].behind = Some(pair[0]);
        }
        self.lanes[lane].nodes = nodes;
        Ok(lane)
    }

    /// Joins the end of one lane to the start of another.
    pub fn link_lanes(&mut self, from: LaneId, to: LaneId) {
        let tail = self.lanes[from].exit();
        let head = self.lanes[to].entry();
        self.nodes[tail].front = Some(head);
        self.nodes[head].behind = Some(tail);
    }

    pub fn lane(&self, lane: LaneId) -> &Lane {
        &self.lanes[lane]
    }

    /// Whether every non-service node of the lane is occupied.
    pub fn lane_is_full(&self, lane: LaneId) -> bool {
        self.lanes[lane]
            .nodes
            .iter()
            .filter(|&&node| !self.nodes[node].service)
            .all(|&node| self.nodes[node].occupant.is_some())
    }

    /// Whether no node of the lane is occupied.
    pub fn lane_is_empty(&self, lane: LaneId) -> bool {
        self.lanes[lane]
            .nodes
            .iter()
            .all(|&node| self.nodes[node].occupant.is_none())
    }
}

#[cfg(test)]
mod tests {
    use crate::Simulation;
    use crate::error::BuildError;

    #[test]
    fn lanes_need_at_least_two_nodes() {
        let mut sim = Simulation::new();
        assert_eq!(sim.add_lane(1, false), Err(BuildError::LaneTooShort(1)));
        assert!(sim.add_lane(2, false).is_ok());
    }

    #[test]
    fn linked_lanes_chain_end_to_start() {
        let mut sim = Simulation::new();
        let a = sim.add_lane(3, false).unwrap();
        let b = sim.add_lane(3, false).unwrap();
        sim.link_lanes(a, b);
        let tail = sim.lane(a).exit();
        let head = sim.lane(b).entry();
        assert_eq!(sim.node(tail).front(), Some(head));
        assert_eq!(sim.node(head).behind(), Some(tail));
    }
}
