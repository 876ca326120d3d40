use assert_approx_eq::assert_approx_eq;
use microtraffic::{Approach, ArrivalPlan, LaneId, SimConfig, Simulation, Tpm};

const VELOCITY: f64 = 4.5 / 2.0 + 1.0;

fn deterministic_sim() -> Simulation {
    let config = SimConfig {
        travel_time_std: 0.0,
        ..SimConfig::default()
    };
    Simulation::with_config(config).unwrap()
}

/// Four approach lanes and four exit lanes around a fresh intersection.
fn crossroads(sim: &mut Simulation, tpm: Tpm) -> ([LaneId; 4], [LaneId; 4]) {
    let ins: [LaneId; 4] = std::array::from_fn(|_| sim.add_lane(3, false).unwrap());
    let outs: [LaneId; 4] = std::array::from_fn(|_| sim.add_lane(3, false).unwrap());
    let entrances = ins.map(|lane| sim.lane(lane).exit());
    let exits = outs.map(|lane| sim.lane(lane).entry());
    sim.add_intersection(entrances, exits, tpm, 1, 0.0).unwrap();
    (ins, outs)
}

#[test]
fn main_flow_crosses_without_yielding() {
    let mut sim = deterministic_sim();
    let mut rows = [[0.0; 4]; 4];
    rows[Approach::North.index()][Approach::South.index()] = 1.0;
    let (ins, outs) = crossroads(&mut sim, Tpm::new(rows).unwrap());
    let record = sim
        .add_record(sim.lane(outs[Approach::South.index()]).exit())
        .unwrap();
    sim.add_source(
        sim.lane(ins[Approach::North.index()]).entry(),
        VELOCITY,
        ArrivalPlan::Times(vec![0.0]),
        None,
        false,
    )
    .unwrap();
    sim.populate(0.0, 30.0).unwrap();
    let times = sim.record(record).times();
    assert_eq!(times.len(), 1);
    // two lane hops, the crossing itself, two hops out
    assert_approx_eq!(times[0], 5.0, 1e-9);
    assert_eq!(sim.vehicle_count(), 0);
}

#[test]
fn the_minor_road_yields_to_the_main_flow() {
    let mut sim = deterministic_sim();
    let mut rows = [[0.0; 4]; 4];
    rows[Approach::North.index()][Approach::South.index()] = 1.0;
    rows[Approach::East.index()][Approach::South.index()] = 1.0;
    let (ins, outs) = crossroads(&mut sim, Tpm::new(rows).unwrap());
    let record = sim
        .add_record(sim.lane(outs[Approach::South.index()]).exit())
        .unwrap();
    let from_north = sim
        .add_source(
            sim.lane(ins[Approach::North.index()]).entry(),
            VELOCITY,
            ArrivalPlan::Times(vec![0.0]),
            None,
            false,
        )
        .unwrap();
    let from_east = sim
        .add_source(
            sim.lane(ins[Approach::East.index()]).entry(),
            VELOCITY,
            ArrivalPlan::Times(vec![0.0]),
            None,
            false,
        )
        .unwrap();
    sim.populate(0.0, 30.0).unwrap();
    let record = sim.record(record);
    // the main-flow vehicle goes first even though both arrived together
    assert_eq!(record.sources(), &[from_north, from_east]);
    assert!(record.times()[0] < record.times()[1]);
    assert_eq!(sim.vehicle_count(), 0);
}
