use assert_approx_eq::assert_approx_eq;
use microtraffic::{Approach, ArrivalPlan, SimConfig, Simulation, Tpm};

const VELOCITY: f64 = 4.5 / 2.0 + 1.0;

fn deterministic_sim() -> Simulation {
    let config = SimConfig {
        travel_time_std: 0.0,
        ..SimConfig::default()
    };
    Simulation::with_config(config).unwrap()
}

/// Everything entering from the north or east heads south.
fn all_south_tpm() -> Tpm {
    let mut rows = [[0.0; 4]; 4];
    rows[0] = [0.0, 0.0, 1.0, 0.0];
    rows[1] = [0.0, 0.0, 1.0, 0.0];
    Tpm::new(rows).unwrap()
}

#[test]
fn a_lone_vehicle_crosses_in_two_node_time() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(4, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    let entrance = sim.lane(north).exit();
    let exit = sim.lane(south).entry();
    let record = sim.add_record(sim.lane(south).exit()).unwrap();
    sim.add_stop_street(
        [Some(entrance), None, None, None],
        [None, None, Some(exit), None],
        all_south_tpm(),
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
    sim.populate(0.0, 100.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // two hops to the entrance, two across, two down the exit lane
    assert_approx_eq!(times[0], 6.0, 1e-9);
}

#[test]
fn a_crossing_stamps_the_approaches_it_used() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(4, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    sim.add_stop_street(
        [Some(sim.lane(north).exit()), None, None, None],
        [None, None, Some(sim.lane(south).entry()), None],
        all_south_tpm(),
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
    // stop just after the crossing commits, with the vehicle still live
    sim.populate(0.0, 3.0).unwrap();
    let (_, vehicle) = sim.vehicles().next().unwrap();
    assert_eq!(vehicle.entrance_used(), Some(Approach::North));
    assert_eq!(vehicle.exit_used(), Some(Approach::South));
}

#[test]
fn competing_vehicles_cross_first_come_first_served() {
    let mut sim = deterministic_sim();
    let north = sim.add_lane(4, false).unwrap();
    let east = sim.add_lane(4, false).unwrap();
    let south = sim.add_lane(3, false).unwrap();
    let exit = sim.lane(south).entry();
    let record = sim.add_record(sim.lane(south).exit()).unwrap();
    sim.add_stop_street(
        [Some(sim.lane(north).exit()), Some(sim.lane(east).exit()), None, None],
        [None, None, Some(exit), None],
        all_south_tpm(),
    )
    .unwrap();
    let from_north = sim
        .add_source(
            sim.lane(north).entry(),
            VELOCITY,
            ArrivalPlan::Times(vec![0.0]),
            None,
            false,
        )
        .unwrap();
    let from_east = sim
        .add_source(
            sim.lane(east).entry(),
            VELOCITY,
            ArrivalPlan::Times(vec![0.5]),
            None,
            false,
        )
        .unwrap();
    sim.populate(0.0, 100.0).unwrap();
    let record = sim.record(record);
    assert_eq!(record.len(), 2);
    // the earlier arrival holds the junction; the other queues behind it
    assert_eq!(record.sources(), &[from_north, from_east]);
    assert!(record.times()[0] < record.times()[1]);
    assert_eq!(sim.vehicle_count(), 0);
}
