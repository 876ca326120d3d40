use assert_approx_eq::assert_approx_eq;
use microtraffic::{ArrivalPlan, RunOutcome, SimConfig, SimError, Simulation};

/// Simulation with deterministic travel times: one second per node at
/// velocity 3.25.
fn deterministic_sim() -> Simulation {
    let config = SimConfig {
        travel_time_std: 0.0,
        ..SimConfig::default()
    };
    Simulation::with_config(config).unwrap()
}

const NODE_PER_SECOND: f64 = 4.5 / 2.0 + 1.0;

#[test]
fn a_lone_vehicle_crosses_a_lane_in_exact_time() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(5, false).unwrap();
    let entry = sim.lane(lane).entry();
    let exit = sim.lane(lane).exit();
    let record = sim.add_record(exit).unwrap();
    sim.add_source(
        entry,
        NODE_PER_SECOND,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    let outcome = sim.populate(0.0, 100.0).unwrap();
    assert_eq!(outcome, RunOutcome::Exhausted);
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // four hops from the entry node to the exit node
    assert_approx_eq!(times[0], 4.0, 1e-9);
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn a_platoon_disposes_in_arrival_order() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(8, false).unwrap();
    let entry = sim.lane(lane).entry();
    let exit = sim.lane(lane).exit();
    let record = sim.add_record(exit).unwrap();
    sim.add_source(
        entry,
        NODE_PER_SECOND,
        ArrivalPlan::Times(vec![0.0, 0.2, 0.4]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 100.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 3);
    assert!(times.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn a_timed_obstruction_holds_traffic_until_it_clears() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(5, false).unwrap();
    let nodes: Vec<_> = sim.lane(lane).nodes().to_vec();
    let record = sim.add_record(nodes[4]).unwrap();
    sim.add_timed_obstruction(nodes[3], &[(0.0, 10.0)], 0.0)
        .unwrap();
    sim.add_source(
        nodes[0],
        NODE_PER_SECOND,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 100.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // blocked two nodes in, released after the window plus two hops
    assert!(times[0] > 12.0);
}

#[test]
fn a_counted_obstruction_delays_each_vehicle_once() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(5, false).unwrap();
    let nodes: Vec<_> = sim.lane(lane).nodes().to_vec();
    let record = sim.add_record(nodes[4]).unwrap();
    sim.add_counted_obstruction(nodes[3], 1, 5.0, 0.0).unwrap();
    sim.add_source(
        nodes[0],
        NODE_PER_SECOND,
        ArrivalPlan::Times(vec![0.0, 0.5]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 100.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 2);
    // the first vehicle eats the five second hold
    assert!(times[0] > 9.0);
    assert!(times[1] > times[0]);
}

#[test]
fn a_velocity_change_node_speeds_up_the_rest_of_the_trip() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(5, false).unwrap();
    let nodes: Vec<_> = sim.lane(lane).nodes().to_vec();
    let record = sim.add_record(nodes[4]).unwrap();
    sim.assign_velocity_change(nodes[2], 2.0 * NODE_PER_SECOND)
        .unwrap();
    sim.add_source(
        nodes[0],
        NODE_PER_SECOND,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 100.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // two hops at one second, then two at half a second
    assert_approx_eq!(times[0], 3.0, 1e-9);
}

#[test]
fn a_protected_lane_overflows_when_arrivals_outpace_it() {
    let mut sim = deterministic_sim();
    let lane = sim.add_lane(3, true).unwrap();
    let nodes: Vec<_> = sim.lane(lane).nodes().to_vec();
    // block the back of the lane so nobody ever leaves
    sim.add_timed_obstruction(nodes[2], &[(0.0, 10_000.0)], 0.0)
        .unwrap();
    sim.add_source(
        nodes[0],
        NODE_PER_SECOND,
        ArrivalPlan::Times(vec![0.5, 0.6, 0.7, 0.8, 0.9]),
        None,
        false,
    )
    .unwrap();
    let result = sim.populate(0.0, 100.0);
    assert!(matches!(result, Err(SimError::LaneOverflow { .. })));
}

#[test]
fn empty_run_windows_are_rejected() {
    let mut sim = deterministic_sim();
    assert!(matches!(
        sim.populate(5.0, 5.0),
        Err(SimError::InvalidWindow { .. })
    ));
}
