use assert_approx_eq::assert_approx_eq;
use microtraffic::{Approach, ArrivalPlan, BuildError, SimConfig, Simulation, Tpm};

const VELOCITY: f64 = 4.5 / 2.0 + 1.0;

fn deterministic_sim() -> Simulation {
    let config = SimConfig {
        travel_time_std: 0.0,
        ..SimConfig::default()
    };
    Simulation::with_config(config).unwrap()
}

fn routing(from: Approach, to: Approach) -> Tpm {
    let mut rows = [[0.0; 4]; 4];
    rows[from.index()][to.index()] = 1.0;
    Tpm::new(rows).unwrap()
}

#[test]
fn a_lone_vehicle_circulates_to_the_opposite_exit() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(3, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    let record = sim.add_record(sim.lane(south).exit()).unwrap();
    sim.add_circle(
        [Some(sim.lane(north).exit()), None, None, None],
        [None, None, Some(sim.lane(south).entry()), None],
        routing(Approach::North, Approach::South),
        3,
        1,
        0.0,
        VELOCITY,
    )
    .unwrap();
    sim.add_source(
        sim.lane(north).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 60.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // the entry manoeuvre ends on the first arc node at 3; five more arc
    // hops, the exit, then two lane nodes out
    assert_approx_eq!(times[0], 11.0, 1e-9);
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn a_left_turn_leaves_after_one_quarter() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(3, false).unwrap();
    let east = sim.add_lane(3, false).unwrap();
    let record = sim.add_record(sim.lane(east).exit()).unwrap();
    sim.add_circle(
        [Some(sim.lane(north).exit()), None, None, None],
        [None, Some(sim.lane(east).entry()), None, None],
        routing(Approach::North, Approach::East),
        3,
        1,
        0.0,
        VELOCITY,
    )
    .unwrap();
    sim.add_source(
        sim.lane(north).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 60.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // on the first arc node at 3, two more arc hops, the exit, two out
    assert_approx_eq!(times[0], 8.0, 1e-9);
}

#[test]
fn risk_taking_probability_is_validated() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(3, false).unwrap();
    let err = sim
        .add_circle(
            [Some(sim.lane(north).exit()), None, None, None],
            [None; 4],
            routing(Approach::North, Approach::South),
            3,
            1,
            1.5,
            VELOCITY,
        )
        .unwrap_err();
    assert!(matches!(err, BuildError::InvalidProbability { .. }));
}
