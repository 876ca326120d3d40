use assert_approx_eq::assert_approx_eq;
use microtraffic::{ArrivalPlan, RunOutcome, SimConfig, Simulation};

const VELOCITY: f64 = 4.5 / 2.0 + 1.0;

fn deterministic_sim() -> Simulation {
    let config = SimConfig {
        travel_time_std: 0.0,
        ..SimConfig::default()
    };
    Simulation::with_config(config).unwrap()
}

#[test]
fn a_snapshot_survives_the_round_trip() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(8, false).unwrap();
    sim.add_record(sim.lane(lane).exit()).unwrap();
    sim.add_source(
        sim.lane(lane).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    // stop partway down the lane, with events still pending
    sim.populate(0.0, 4.0).unwrap();
    assert_eq!(sim.vehicle_count(), 1);
    assert!(sim.pending_events() > 0);

    let snapshot = sim.to_snapshot().unwrap();
    let restored = Simulation::from_snapshot(&snapshot).unwrap();
    let reserialised = restored.to_snapshot().unwrap();
    let a: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
    let b: serde_json::Value = serde_json::from_str(&reserialised).unwrap();
    assert_eq!(a, b);
}

#[test]
fn a_restored_simulation_picks_up_where_it_left_off() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(8, false).unwrap();
    let record = sim.add_record(sim.lane(lane).exit()).unwrap();
    sim.add_source(
        sim.lane(lane).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 4.0).unwrap();

    let snapshot = sim.to_snapshot().unwrap();
    let mut restored = Simulation::from_snapshot(&snapshot).unwrap();
    let outcome = restored.run(4.0, 50.0).unwrap();
    assert_eq!(outcome, RunOutcome::Exhausted);
    assert_eq!(restored.vehicle_count(), 0);
    let times = restored.record(record).times();
    assert_eq!(times.len(), 1);
    assert_approx_eq!(times[0], 7.0, 1e-9);
}
