pub use circle::Circle;
pub use crossing::Crossing;
pub use flared::FlaredLight;
pub use intersection::Intersection;
pub use ramp::{OffRamp, OnRamp};
pub use stop_street::StopStreet;
pub use traffic_light::TrafficLight;

pub mod circle;
pub mod crossing;
pub mod flared;
pub mod intersection;
pub mod ramp;
pub mod stop_street;
pub mod traffic_light;

use crate::error::BuildError;
use crate::vehicle::RETRY_EPS;
use crate::{NodeId, Simulation};
use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Compass label for the four approaches of a junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Approach {
    North,
    East,
    South,
    West,
}

impl Approach {
    pub const ALL: [Approach; 4] = [
        Approach::North,
        Approach::East,
        Approach::South,
        Approach::West,
    ];

    pub fn index(self) -> usize {
        match self {
            Approach::North => 0,
            Approach::East => 1,
            Approach::South => 2,
            Approach::West => 3,
        }
    }

    /// The approach directly across the junction.
    pub fn opposing(self) -> Approach {
        Self::ALL[(self.index() + 2) % 4]
    }
}

/// Row-stochastic transition matrix over the four approaches.
///
/// Row `i` gives the probability of a vehicle entering from approach `i`
/// leaving through each approach. An all-zero row marks an absent
/// approach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tpm {
    rows: [[f64; 4]; 4],
}

impl Tpm {
    pub fn new(rows: [[f64; 4]; 4]) -> Result<Self, BuildError> {
        for (i, row) in rows.iter().enumerate() {
            for &p in row {
                if !(0.0..=1.0).contains(&p) {
                    return Err(BuildError::InvalidProbability {
                        context: "transition matrix",
                        value: p,
                    });
                }
            }
            let sum: f64 = row.iter().sum();
            if sum != 0.0 && (sum - 1.0).abs() > 1e-9 {
                return Err(BuildError::TransitionRow { row: i, sum });
            }
        }
        Ok(Self { rows })
    }

    /// Like [Tpm::new], but also rejects routing an approach onto itself.
    pub fn without_u_turns(rows: [[f64; 4]; 4]) -> Result<Self, BuildError> {
        for (i, row) in rows.iter().enumerate() {
            if row[i] != 0.0 {
                return Err(BuildError::SelfTransition(Approach::ALL[i]));
            }
        }
        Self::new(rows)
    }

    pub fn row(&self, from: Approach) -> &[f64; 4] {
        &self.rows[from.index()]
    }

    /// Samples the exit approach for a vehicle entering from `from`.
    pub fn sample(&self, from: Approach, rng: &mut impl Rng) -> Approach {
        let row = &self.rows[from.index()];
        let mut roll: f64 = rng.gen();
        for (i, &p) in row.iter().enumerate() {
            if roll < p {
                return Approach::ALL[i];
            }
            roll -= p;
        }
        // rounding pushed the roll past every interval
        let last = row.iter().rposition(|&p| p > 0.0).unwrap_or(0);
        Approach::ALL[last]
    }
}

/// Signal shown to one approach of a junction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Go,
    Stop,
}

/// One step of a signal cycle.
///
/// While the phase holds, the `unlock` approaches flow according to
/// `tpm` and the `lock` approaches are held at their entrance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub(crate) duration: f64,
    pub(crate) unlock: SmallVec<[Approach; 4]>,
    pub(crate) lock: SmallVec<[Approach; 4]>,
    pub(crate) tpm: Tpm,
}

impl Phase {
    pub fn new(
        duration: f64,
        unlock: impl IntoIterator<Item = Approach>,
        lock: impl IntoIterator<Item = Approach>,
        tpm: Tpm,
    ) -> Result<Self, BuildError> {
        if duration <= 0.0 {
            return Err(BuildError::NonPositiveDuration(duration));
        }
        let unlock: SmallVec<[Approach; 4]> = unlock.into_iter().collect();
        let lock: SmallVec<[Approach; 4]> = lock.into_iter().collect();
        if let Some((&a, _)) = unlock
            .iter()
            .cartesian_product(lock.iter())
            .find(|(a, b)| a == b)
        {
            return Err(BuildError::OverlappingPhase(a));
        }
        Ok(Self {
            duration,
            unlock,
            lock,
            tpm,
        })
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Signal shown to each approach while this phase holds.
    pub fn signals(&self) -> [Signal; 4] {
        let mut signals = [Signal::Stop; 4];
        for &approach in &self.unlock {
            signals[approach.index()] = Signal::Go;
        }
        signals
    }
}

/// A junction between lanes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Junction {
    StopStreet(StopStreet),
    TrafficLight(TrafficLight),
    FlaredLight(FlaredLight),
    Circle(Circle),
    Intersection(Intersection),
    OnRamp(OnRamp),
    OffRamp(OffRamp),
    Crossing(Crossing),
}

/// Outcome of a right-of-way assessment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Admission {
    pub proceed: bool,
    pub time: f64,
}

impl Simulation {
    /// Walks upstream from `start` counting clear nodes. The vehicle may
    /// proceed once `need` consecutive nodes are clear, or sooner by
    /// taking a risk against a later-arriving conflict. A refusal yields
    /// the time to retry at.
    pub(crate) fn assess_upstream(
        &mut self,
        start: NodeId,
        aranged: f64,
        need: u32,
        p_risk: f64,
        delay: f64,
    ) -> Admission {
        let mut node = start;
        let mut count: u32 = 0;
        loop {
            if let Some(occupant) = self.nodes[node].occupant {
                let their_time = self.vehicles[occupant].time;
                if aranged < their_time && count >= 1 && self.rng.gen::<f64>() < p_risk {
                    return Admission {
                        proceed: true,
                        time: aranged,
                    };
                }
                let retry = their_time + self.jitter(delay);
                return Admission {
                    proceed: false,
                    time: retry,
                };
            }
            count += 1;
            if count >= need {
                return Admission {
                    proceed: true,
                    time: aranged,
                };
            }
            match self.nodes[node].behind {
                Some(prev) => node = prev,
                None => {
                    return Admission {
                        proceed: true,
                        time: aranged,
                    }
                }
            }
        }
    }

    /// Whether a vehicle entering from an occupied minor approach must
    /// yield to it; refusal retries just after the conflict moves.
    pub(crate) fn assess_minor(&mut self, entrance: NodeId, aranged: f64, delay: f64) -> Admission {
        if let Some(occupant) = self.nodes[entrance].occupant {
            let their_time = self.vehicles[occupant].time;
            if aranged > their_time {
                let retry = their_time + self.jitter(delay);
                return Admission {
                    proceed: false,
                    time: retry,
                };
            }
        }
        Admission {
            proceed: true,
            time: aranged,
        }
    }

    /// Uniform jitter in `(RETRY_EPS, upper)`, used to space out
    /// reactions to the same event.
    pub(crate) fn jitter(&mut self, upper: f64) -> f64 {
        if upper <= RETRY_EPS {
            return RETRY_EPS;
        }
        self.rng.gen_range(RETRY_EPS..upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn tpm_rejects_rows_that_do_not_sum_to_one() {
        let mut rows = [[0.0; 4]; 4];
        rows[0] = [0.0, 0.5, 0.4, 0.0];
        assert!(matches!(
            Tpm::new(rows),
            Err(BuildError::TransitionRow { row: 0, .. })
        ));
    }

    #[test]
    fn tpm_allows_absent_approaches() {
        let mut rows = [[0.0; 4]; 4];
        rows[0] = [0.0, 0.0, 1.0, 0.0];
        assert!(Tpm::new(rows).is_ok());
    }

    #[test]
    fn tpm_without_u_turns_rejects_the_diagonal() {
        let mut rows = [[0.0; 4]; 4];
        rows[1] = [0.0, 1.0, 0.0, 0.0];
        assert_eq!(
            Tpm::without_u_turns(rows),
            Err(BuildError::SelfTransition(Approach::East))
        );
    }

    #[test]
    fn deterministic_rows_always_sample_the_same_exit() {
        let mut rows = [[0.0; 4]; 4];
        rows[0] = [0.0, 0.0, 1.0, 0.0];
        let tpm = Tpm::new(rows).unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..20 {
            assert_eq!(tpm.sample(Approach::North, &mut rng), Approach::South);
        }
    }

    #[test]
    fn phases_cannot_lock_and_unlock_the_same_approach() {
        let tpm = Tpm::new([[0.0; 4]; 4]).unwrap();
        let result = Phase::new(
            30.0,
            [Approach::North, Approach::South],
            [Approach::North],
            tpm,
        );
        assert_eq!(result, Err(BuildError::OverlappingPhase(Approach::North)));
    }

    #[test]
    fn phase_signals_follow_the_unlock_set() {
        let tpm = Tpm::new([[0.0; 4]; 4]).unwrap();
        let phase = Phase::new(30.0, [Approach::East], [Approach::North], tpm).unwrap();
        let signals = phase.signals();
        assert_eq!(signals[Approach::East.index()], Signal::Go);
        assert_eq!(signals[Approach::North.index()], Signal::Stop);
    }

    #[test]
    fn opposing_approaches_are_across_the_junction() {
        assert_eq!(Approach::North.opposing(), Approach::South);
        assert_eq!(Approach::West.opposing(), Approach::East);
    }

    #[test]
    fn zero_risk_never_admits_past_occupied_upstream() {
        use crate::vehicle::Vehicle;
        use crate::{Simulation, SourceId};
        let mut sim = Simulation::new();
        let lane = sim.add_lane(3, false).unwrap();
        let nodes: Vec<_> = sim.lane(lane).nodes().to_vec();
        let blocker = sim
            .vehicles
            .insert(Vehicle::new(10.0, 3.0, nodes[1], SourceId::default(), false));
        sim.nodes[nodes[1]].occupant = Some(blocker);
        // one clear node and an earlier aranged time would allow a risky
        // entry, but zero risk must refuse every time
        for _ in 0..200 {
            let admission = sim.assess_upstream(nodes[2], 5.0, 3, 0.0, 0.2);
            assert!(!admission.proceed);
            assert!(admission.time >= 10.0);
        }
    }
}
