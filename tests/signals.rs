use assert_approx_eq::assert_approx_eq;
use microtraffic::junction::traffic_light::{n_s_overwash, w_e_overwash};
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
fn a_green_light_lets_traffic_straight_through() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(4, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    let record = sim.add_record(sim.lane(south).exit()).unwrap();
    sim.add_traffic_light(
        [Some(sim.lane(north).exit()), None, None, None],
        [None, None, Some(sim.lane(south).entry()), None],
        vec![n_s_overwash(50.0).unwrap()],
        false,
    )
    .unwrap();
    sim.add_source(
        sim.lane(north).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![1.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 40.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // one second in hand, two hops to the line, two across, two out
    assert_approx_eq!(times[0], 7.0, 1e-9);
}

#[test]
fn a_red_light_holds_traffic_at_the_line() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(4, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    let record = sim.add_record(sim.lane(south).exit()).unwrap();
    // the only phase serves the cross street, so north stays red
    sim.add_traffic_light(
        [Some(sim.lane(north).exit()), None, None, None],
        [None, None, Some(sim.lane(south).entry()), None],
        vec![w_e_overwash(100.0).unwrap()],
        false,
    )
    .unwrap();
    sim.add_source(
        sim.lane(north).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![1.0]),
        None,
        false,
    )
    .unwrap();
    let outcome = sim.populate(0.0, 40.0).unwrap();
    assert_eq!(outcome, RunOutcome::ReachedEnd);
    assert!(sim.record(record).is_empty());
    // still parked short of the junction
    assert_eq!(sim.vehicle_count(), 1);
}

#[test]
fn a_flared_junction_routes_through_its_turning_pocket() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(3, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    let record = sim.add_record(sim.lane(south).exit()).unwrap();
    sim.add_flared_light(
        [Some(sim.lane(north).exit()), None, None, None],
        [None, None, Some(sim.lane(south).entry()), None],
        vec![n_s_overwash(50.0).unwrap()],
        false,
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
    sim.populate(0.0, 40.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // two hops to the fork, three through the pocket, two across, two out
    assert_approx_eq!(times[0], 9.0, 1e-9);
    assert_eq!(sim.vehicle_count(), 0);
}
