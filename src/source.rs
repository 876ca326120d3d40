use crate::error::{BuildError, SimError};
use crate::node::Node;
use crate::vehicle::Vehicle;
use crate::{NodeId, Simulation, SourceId, VehicleId};
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

/// Arrival rates below this are clamped up to keep gaps finite.
const RATE_FLOOR: f64 = 5e-2;

/// One piece of a piecewise-constant arrival rate. The rate applies
/// from `from` onwards, until the next piece takes over.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatePiece {
    pub from: f64,
    pub rate: f64,
}

/// How a source decides when vehicles arrive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArrivalPlan {
    /// Poisson arrivals with a piecewise-constant rate.
    Poisson(Vec<RatePiece>),
    /// Arrivals at exactly these times.
    Times(Vec<f64>),
}

/// Feeds vehicles onto a target node.
///
/// Each arrival gets a throwaway staging node wired in front of the
/// target, so it queues and calibrates like any other vehicle before
/// its first real move.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Source {
    pub(crate) target: NodeId,
    pub(crate) velocity: f64,
    pub(crate) plan: ArrivalPlan,
    pub(crate) label: Option<String>,
    pub(crate) record_movement: bool,
}

impl Source {
    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn rate_at(&self, time: f64) -> Option<f64> {
        let ArrivalPlan::Poisson(pieces) = &self.plan else {
            return None;
        };
        let mut rate = pieces.first()?.rate;
        for piece in pieces {
            if piece.from <= time {
                rate = piece.rate;
            }
        }
        Some(rate.max(RATE_FLOOR))
    }
}

impl Simulation {
    /// Attaches a source to a target node.
    pub fn add_source(
        &mut self,
        target: NodeId,
        velocity: f64,
        plan: ArrivalPlan,
        label: Option<String>,
        record_movement: bool,
    ) -> Result<SourceId, BuildError> {
        if velocity <= 0.0 {
            return Err(BuildError::NonPositiveVelocity(velocity));
        }
        if let ArrivalPlan::Poisson(pieces) = &plan {
            for piece in pieces {
                if piece.rate <= 0.0 {
                    return Err(BuildError::NonPositive {
                        context: "arrival rate",
                        value: piece.rate,
                    });
                }
            }
        }
        let source = self.sources.insert(Source {
            target,
            velocity,
            plan,
            label,
            record_movement,
        });
        self.nodes[target].source = Some(source);
        Ok(source)
    }

    pub fn source(&self, source: SourceId) -> &Source {
        &self.sources[source]
    }

    /// Creates one vehicle at the source's staging area and schedules
    /// its arrival.
    pub fn produce(&mut self, source: SourceId, time: f64) -> Result<VehicleId, SimError> {
        let (target, velocity, record_movement) = {
            let s = &self.sources[source];
            (s.target, s.velocity, s.record_movement)
        };
        let staging = self.nodes.insert(Node {
            front: Some(target),
            staging: true,
            ..Node::default()
        });
        let vehicle = self
            .vehicles
            .insert(Vehicle::new(time, velocity, staging, source, record_movement));
        self.nodes[staging].occupant = Some(vehicle);
        self.schedule_move(vehicle)?;
        Ok(vehicle)
    }

    /// Draws every source's arrivals over the run window and stages
    /// them.
    pub(crate) fn schedule_arrivals(
        &mut self,
        start_time: f64,
        end_time: f64,
    ) -> Result<(), SimError> {
        let sources: Vec<SourceId> = self.sources.keys().collect();
        for source in sources {
            let times = self.draw_arrival_times(source, start_time, end_time);
            log::debug!("source staged {} arrivals", times.len());
            for time in times {
                self.produce(source, time)?;
            }
        }
        Ok(())
    }

    fn draw_arrival_times(&mut self, source: SourceId, start_time: f64, end_time: f64) -> Vec<f64> {
        match self.sources[source].plan.clone() {
            ArrivalPlan::Times(times) => {
                let mut times: Vec<f64> = times
                    .into_iter()
                    .filter(|t| (start_time..=end_time).contains(t))
                    .collect();
                times.sort_by(f64::total_cmp);
                times
            }
            ArrivalPlan::Poisson(_) => {
                let mut times = Vec::new();
                let mut time = start_time;
                loop {
                    let Some(rate) = self.sources[source].rate_at(time) else {
                        break;
                    };
                    let gap = match Exp::new(rate) {
                        Ok(dist) => dist.sample(&mut self.rng),
                        Err(_) => break,
                    };
                    time += gap;
                    if time > end_time {
                        break;
                    }
                    times.push(time);
                }
                times
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Simulation;

    #[test]
    fn poisson_arrivals_are_increasing_and_within_the_window() {
        let mut sim = Simulation::new();
        let lane = sim.add_lane(5, false).unwrap();
        let entry = sim.lane(lane).entry();
        let plan = ArrivalPlan::Poisson(vec![
            RatePiece {
                from: 0.0,
                rate: 1.0,
            },
            RatePiece {
                from: 50.0,
                rate: 2.0,
            },
        ]);
        let source = sim.add_source(entry, 10.0, plan, None, false).unwrap();
        let times = sim.draw_arrival_times(source, 0.0, 100.0);
        assert!(!times.is_empty());
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert!(times.iter().all(|&t| t > 0.0 && t <= 100.0));
    }

    #[test]
    fn rates_below_the_floor_are_clamped() {
        let source = Source {
            target: NodeId::default(),
            velocity: 10.0,
            plan: ArrivalPlan::Poisson(vec![RatePiece {
                from: 0.0,
                rate: 1e-6,
            }]),
            label: None,
            record_movement: false,
        };
        assert_eq!(source.rate_at(10.0), Some(RATE_FLOOR));
    }

    #[test]
    fn the_latest_started_piece_wins() {
        let source = Source {
            target: NodeId::default(),
            velocity: 10.0,
            plan: ArrivalPlan::Poisson(vec![
                RatePiece {
                    from: 0.0,
                    rate: 1.0,
                },
                RatePiece {
                    from: 30.0,
                    rate: 3.0,
                },
            ]),
            label: None,
            record_movement: false,
        };
        assert_eq!(source.rate_at(10.0), Some(1.0));
        assert_eq!(source.rate_at(30.0), Some(3.0));
        assert_eq!(source.rate_at(99.0), Some(3.0));
    }
}
