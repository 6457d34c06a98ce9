use approx::assert_relative_eq;

use tvb::prelude::*;

fn pair(tract: f64, speed: f64) -> Connectivity {
    Connectivity::from_rows(
        &[vec![0.0, 1.0], vec![1.0, 0.0]],
        &[vec![0.0, tract], vec![tract, 0.0]],
    )
    .unwrap()
    .with_speed(Speed::Uniform(speed))
}

fn ring(n: usize, tract: f64) -> Connectivity {
    let mut weights = vec![vec![0.0; n]; n];
    let mut tracts = vec![vec![0.0; n]; n];
    for k in 0..n {
        let j = (k + 1) % n;
        weights[k][j] = 0.5;
        weights[j][k] = 0.25;
        tracts[k][j] = tract * (1 + k % 3) as f64;
        tracts[j][k] = tract;
    }
    Connectivity::from_rows(&weights, &tracts).unwrap()
}

fn oscillator_network(noise_seed: u64) -> Simulator {
    Simulator::new(
        Generic2dOscillator::default(),
        ring(6, 4.0),
        coupling::Linear { a: 0.05, b: 0.0 },
        HeunStochastic::new(0.25, Noise::additive(1e-3).with_seed(noise_seed)),
    )
    .with_seed(3)
    .with_monitor(Raw::new())
    .with_monitor(TemporalAverage::new(1.0))
}

#[test]
fn impulse_arrives_after_the_tract_delay() {
    // 10 mm at 1 mm/ms with dt = 1 ms: a ten-step delay.
    let mut history = vec![State::zeros(1, 2, 1); 10];
    history.push(State::from_rows(&[vec![0.0, 1.0]]).unwrap());
    let mut sim = Simulator::new(
        Linear::with_gamma(0.0),
        pair(10.0, 1.0),
        coupling::Linear { a: 1.0, b: 0.0 },
        EulerDeterministic::new(1.0),
    )
    .with_initial_conditions(history);
    sim.configure().unwrap();
    assert_eq!(sim.horizon(), 11);

    for step in 1..=10u64 {
        sim.step().unwrap();
        assert_eq!(sim.current_step(), step);
        assert_eq!(sim.node_coupling().get(0, 0, 0), 0.0, "step {step}");
        assert_eq!(sim.current_state().get(0, 0, 0), 0.0);
    }
    sim.step().unwrap();
    // Coupling applied while advancing the state of step 10.
    assert_eq!(sim.node_coupling().get(0, 0, 0), 1.0);
    assert_eq!(sim.current_state().get(0, 0, 0), 1.0);
    assert_eq!(sim.current_state().get(0, 1, 0), 1.0);
}

#[test]
fn zero_delay_reads_the_previous_step() {
    let mut sim = Simulator::new(
        Linear::with_gamma(0.0),
        pair(0.0, 1.0),
        coupling::Linear { a: 1.0, b: 0.0 },
        EulerDeterministic::new(1.0),
    )
    .with_initial_conditions(vec![State::from_rows(&[vec![0.0, 1.0]]).unwrap()]);
    sim.configure().unwrap();
    assert_eq!(sim.horizon(), 1);

    sim.step().unwrap();
    assert_eq!(sim.node_coupling().data(), &[1.0, 0.0]);
    assert_eq!(sim.current_state().data(), &[1.0, 1.0]);
    sim.step().unwrap();
    assert_eq!(sim.node_coupling().data(), &[1.0, 1.0]);
    assert_eq!(sim.current_state().data(), &[2.0, 2.0]);
}

#[test]
fn uncoupled_network_matches_isolated_nodes() {
    let v = [0.3, -0.7, 1.1];
    let w = [-0.2, 0.5, 0.0];
    let network = State::from_rows(&[v.to_vec(), w.to_vec()]).unwrap();
    let mut sim = Simulator::new(
        Generic2dOscillator::default(),
        ring(3, 0.0),
        coupling::Linear { a: 0.0, b: 0.0 },
        HeunDeterministic::new(0.1),
    )
    .with_initial_conditions(vec![network]);
    sim.configure().unwrap();
    for _ in 0..250 {
        sim.step().unwrap();
    }

    for node in 0..3 {
        let single = Connectivity::new(vec![0.0], vec![0.0]).unwrap();
        let mut alone = Simulator::new(
            Generic2dOscillator::default(),
            single,
            coupling::Linear { a: 0.0, b: 0.0 },
            HeunDeterministic::new(0.1),
        )
        .with_initial_conditions(vec![State::from_rows(&[vec![v[node]], vec![w[node]]]).unwrap()]);
        alone.configure().unwrap();
        for _ in 0..250 {
            alone.step().unwrap();
        }
        for var in 0..2 {
            assert_relative_eq!(
                sim.current_state().get(var, node, 0),
                alone.current_state().get(var, 0, 0),
                epsilon = 1e-12
            );
        }
    }
}

#[test]
fn stochastic_runs_are_reproducible_from_seeds() {
    let collect = |seed| {
        let mut sim = oscillator_network(seed);
        sim.configure().unwrap();
        sim.run_collect(200).unwrap()
    };
    let a = collect(11);
    let b = collect(11);
    let c = collect(12);
    assert_eq!(a, b);
    assert_ne!(a[0].data, c[0].data);
    assert_eq!(a[0].len(), 200);
    assert_eq!(a[1].len(), 50);
}

#[test]
fn split_runs_match_one_long_run() {
    let mut whole = oscillator_network(5);
    whole.configure().unwrap();
    let long = whole.run_collect(300).unwrap();

    let mut split = oscillator_network(5);
    split.configure().unwrap();
    let first = split.run_collect(120).unwrap();
    let second = split.run_collect(180).unwrap();

    assert_eq!(whole.current_state(), split.current_state());
    for m in 0..2 {
        let mut times = first[m].times.clone();
        times.extend(second[m].times.iter().copied());
        let mut data = first[m].data.clone();
        data.extend(second[m].data.iter().cloned());
        assert_eq!(times, long[m].times);
        assert_eq!(data, long[m].data);
    }
}

#[test]
fn restored_checkpoint_continues_bit_for_bit() {
    let mut reference = oscillator_network(9);
    reference.configure().unwrap();
    // 40 steps of 0.25 ms closes every 1 ms averaging window.
    reference.run_collect(40).unwrap();
    let image = reference.checkpoint().unwrap().save_bytes().unwrap();
    let expected = reference.run_collect(60).unwrap();

    let mut resumed = oscillator_network(9);
    resumed.configure().unwrap();
    resumed.run_collect(7).unwrap();
    resumed
        .restore(&Checkpoint::load_bytes(&image).unwrap())
        .unwrap();
    assert_eq!(resumed.current_step(), 40);
    let got = resumed.run_collect(60).unwrap();

    assert_eq!(got, expected);
    assert_eq!(resumed.current_state(), reference.current_state());
}

#[cfg(feature = "serde")]
#[test]
fn checkpoint_survives_json() {
    let mut sim = oscillator_network(1);
    sim.configure().unwrap();
    sim.run_collect(13).unwrap();
    let ckpt = sim.checkpoint().unwrap();
    let back = Checkpoint::from_json(&ckpt.to_json().unwrap()).unwrap();
    assert_eq!(back, ckpt);
}

#[cfg(feature = "serde")]
#[test]
fn checkpoint_json_with_inconsistent_state_is_an_error() {
    let mut sim = oscillator_network(1);
    sim.configure().unwrap();
    sim.run_collect(5).unwrap();
    let mut value: serde_json::Value =
        serde_json::from_str(&sim.checkpoint().unwrap().to_json().unwrap()).unwrap();
    value["current_state"]["data"]
        .as_array_mut()
        .unwrap()
        .push(serde_json::json!(0.0));
    let err = Checkpoint::from_json(&value.to_string()).unwrap_err();
    assert!(matches!(err, SimError::Json(_)), "{err:?}");
    // The running simulator is untouched.
    assert_eq!(sim.current_step(), 5);
    sim.step().unwrap();
}

#[test]
fn checkpoint_from_another_network_is_rejected() {
    let mut small = oscillator_network(1);
    small.configure().unwrap();
    let ckpt = small.checkpoint().unwrap();

    let mut other = Simulator::new(
        Generic2dOscillator::default(),
        pair(3.0, 3.0),
        coupling::Linear::default(),
        HeunDeterministic::new(0.25),
    );
    assert!(matches!(other.restore(&ckpt), Err(SimError::Checkpoint(_))));
}

#[test]
fn projection_gain_must_match_node_count() {
    let mut sim = Simulator::new(
        Generic2dOscillator::default(),
        pair(2.0, 2.0),
        coupling::Linear::default(),
        HeunDeterministic::new(0.5),
    )
    .with_monitor(Projection::eeg(1.0, 2, vec![1.0; 2 * 3]));
    let err = sim.configure().unwrap_err();
    assert_eq!(err.component(), Some(Component::Monitor));
    assert!(!sim.is_configured());
}

#[test]
fn divergence_surfaces_as_an_error() {
    let mut sim = Simulator::new(
        Linear::with_gamma(50.0),
        pair(1.0, 1.0),
        coupling::Linear { a: 1.0, b: 0.0 },
        EulerDeterministic::new(1.0),
    )
    .with_initial_conditions(vec![State::filled(1, 2, 1, 1.0)])
    .with_monitor(SubSample::new(5.0));
    sim.configure().unwrap();
    match sim.run_collect(10_000) {
        Err(SimError::Unstable { step, variable, .. }) => {
            assert!(step > 1);
            assert_eq!(variable, 0);
            assert_eq!(sim.current_step(), step - 1);
        }
        other => panic!("expected instability, got {other:?}"),
    }
}

#[test]
fn stimulus_drives_only_its_nodes() {
    let mut sim = Simulator::new(
        Linear::with_gamma(0.0),
        pair(1.0, 1.0),
        coupling::Scaling { a: 0.0 },
        EulerDeterministic::new(0.5),
    )
    .with_initial_conditions(vec![State::zeros(1, 2, 1)])
    .with_stimulus(Stimulus::new(
        vec![1.0, 0.0],
        TemporalEquation::Linear { a: 0.0, b: 2.0 },
    ));
    sim.configure().unwrap();
    for _ in 0..8 {
        sim.step().unwrap();
    }
    // dt * 2 per step.
    assert_relative_eq!(sim.current_state().get(0, 0, 0), 8.0, epsilon = 1e-12);
    assert_eq!(sim.current_state().get(0, 1, 0), 0.0);
}

#[test]
fn surface_couples_region_means_and_local_neighbours() {
    let conn = pair(0.0, 1.0);
    let surface = Surface::new(vec![0, 0, 1, 1]);
    let mut sim = Simulator::new(
        Linear::with_gamma(0.0),
        conn,
        coupling::Linear { a: 1.0, b: 0.0 },
        EulerDeterministic::new(1.0),
    )
    .with_surface(surface)
    .with_initial_conditions(vec![State::from_rows(&[vec![0.0, 0.0, 2.0, 4.0]]).unwrap()])
    .with_monitor(SpatialAverage::new(1.0, SpatialMask::RegionMapping));
    sim.configure().unwrap();
    let d = sim.diagnostics();
    assert_eq!(d.node_count, 4);
    assert_eq!(d.region_count, 2);

    let out = sim.step().unwrap().unwrap();
    // Region 1 mean (3) reaches both vertices of region 0.
    assert_eq!(sim.node_coupling().data(), &[3.0, 3.0, 0.0, 0.0]);
    assert_eq!(sim.current_state().data(), &[3.0, 3.0, 2.0, 4.0]);
    let sample = out.samples[0].as_ref().unwrap();
    assert_eq!(sample.data.data(), &[3.0, 3.0]);

    let local = LocalConnectivity::from_triplets(4, &[(0, 1, 1.0), (1, 0, 1.0)]).unwrap();
    let mut sim = Simulator::new(
        Linear::with_gamma(0.0),
        pair(0.0, 1.0),
        coupling::Scaling { a: 0.0 },
        EulerDeterministic::new(0.1),
    )
    .with_surface(Surface::new(vec![0, 0, 1, 1]).with_local_connectivity(local))
    .with_initial_conditions(vec![State::from_rows(&[vec![1.0, 0.0, 0.0, 0.0]]).unwrap()]);
    sim.configure().unwrap();
    sim.step().unwrap();
    let x = sim.current_state();
    assert_eq!(x.get(0, 0, 0), 1.0);
    assert_relative_eq!(x.get(0, 1, 0), 0.1, epsilon = 1e-15);
    assert_eq!(x.get(0, 2, 0), 0.0);
}

#[test]
fn bold_of_a_constant_signal_is_flat() {
    let mut sim = Simulator::new(
        Linear::with_gamma(0.0),
        pair(1.0, 1.0),
        coupling::Scaling { a: 0.0 },
        EulerDeterministic::new(1.0),
    )
    .with_initial_conditions(vec![State::filled(1, 2, 1, 2.0)])
    .with_monitor(
        Bold::new(200.0)
            .with_hrf_length(200.0)
            .with_kernel(HrfKernel::gamma(), BoldReadout::Linear),
    );
    sim.configure().unwrap();
    let series = sim.run_collect(600).unwrap();
    let bold = &series[0];
    assert_eq!(bold.len(), 3);
    let first = bold.data[0].get(0, 0, 0);
    assert!(first.is_finite() && first != 0.0);
    for sample in &bold.data {
        for value in sample.data() {
            assert_relative_eq!(*value, first, max_relative = 1e-12);
        }
    }
}

#[test]
fn iter_covers_the_simulation_length() {
    let mut sim = Simulator::new(
        Kuramoto::default(),
        ring(4, 2.0),
        coupling::Kuramoto { a: 0.5 },
        RungeKutta4thOrderDeterministic::new(0.1),
    )
    .with_simulation_length(5.0)
    .with_monitor(SubSample::new(0.5));
    sim.configure().unwrap();
    let outputs: Vec<_> = sim.iter().collect::<Result<_>>().unwrap();
    assert_eq!(outputs.len(), 10);
    assert_eq!(sim.current_step(), 50);
    assert_relative_eq!(sim.current_time(), 5.0, epsilon = 1e-12);
    // A second pass continues from step 50.
    let outputs: Vec<_> = sim.iter().collect::<Result<_>>().unwrap();
    assert_eq!(outputs.first().map(|o| o.step), Some(55));
}

#[cfg(feature = "parallel")]
#[test]
fn parallel_tier_matches_scalar() {
    let run = |tier| {
        let mut sim = oscillator_network(21).with_execution_tier(tier);
        sim.configure().unwrap();
        sim.run_collect(100).unwrap()
    };
    assert_eq!(run(ExecutionTier::Scalar), run(ExecutionTier::Parallel));
}
