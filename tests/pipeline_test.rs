use approx::assert_relative_eq;
use std::collections::BTreeMap;

use rusty_patterns::analysis::{
    active_neurons, count_pattern_responses, group_by_specialization, map_neurons_to_patterns,
    specialized_neurons,
};
use rusty_patterns::config::DataSettings;
use rusty_patterns::distribution::PatternDistribution;
use rusty_patterns::generate::{generate_train, StageSeeds};
use rusty_patterns::measure::{f1_measure, precision_table};
use rusty_patterns::psp::{create_psp_shape, PspKind, PspShape, PspSpec};
use rusty_patterns::trace::{mean_trace, pattern_traces};
use rusty_patterns::utils::{cycle_fill, to_steps};

const SEED: u64 = 42;

fn bar_settings() -> DataSettings {
    DataSettings::from_json(
        r#"{
            "patterns": {"class": "bars", "width": 4, "height": 4},
            "pattern_ids": [1, 2, 3, 4, 5, 6, 7, 8],
            "rates": {"low": 0.0, "high": 75.0},
            "pattern_length": 0.05,
            "max_overlap": 3,
            "mixing_distribution": [0.9, 0.9, 0.9],
            "on_off_periods": [0.8, 0.2],
            "combine": "nonlinear",
            "combine_precision": 5.0,
            "fill_noise_rate": 3.0
        }"#,
    )
    .unwrap()
}

/// One ideal detector per pattern, firing 5 steps after each occurrence start.
fn oracle_spikes(distribution: &PatternDistribution) -> Vec<Vec<usize>> {
    distribution
        .iter()
        .map(|(_, starts)| starts.iter().map(|t| t + 5).collect())
        .collect()
}

#[test]
fn test_generated_distribution_invariants() {
    let settings = bar_settings();
    let (train, library) = generate_train(&settings, 10.0, None, StageSeeds::from_seed(SEED)).unwrap();
    let distribution = train.distribution();
    let lengths = library.lengths();

    assert_eq!(train.duration(), 10_000);
    assert!(distribution.num_occurrences() > 0);
    for (_, starts) in distribution.iter() {
        assert!(starts.windows(2).all(|w| w[0] < w[1]));
    }
    assert!(distribution.is_self_disjoint(&lengths));
    assert!(train.activity().iter().all(|count| *count <= settings.max_overlap));

    // during off periods no pattern starts
    for (_, starts) in distribution.iter() {
        assert!(starts.iter().all(|t| t % 1000 < 800));
    }

    // spikes are sorted and lie within the train
    for channel in train.spikes() {
        assert!(channel.windows(2).all(|w| w[0] < w[1]));
        assert!(channel.iter().all(|t| *t >= 0.0 && *t < 10.0));
    }
}

#[test]
fn test_oracle_detectors_are_perfect() {
    let settings = bar_settings();
    let (train, library) = generate_train(&settings, 5.0, None, StageSeeds::from_seed(SEED)).unwrap();
    let distribution = train.distribution();
    let lengths = library.lengths();
    let spikes = oracle_spikes(distribution);

    let table = precision_table(distribution, &lengths, &spikes, train.duration(), 0).unwrap();
    let active = active_neurons(&spikes, 1);
    let (specialized, _) = specialized_neurons(&table, 0.9, 1.1, &active);
    assert_eq!(specialized, active);

    let matches = map_neurons_to_patterns(&table, 0.5);
    for (neuron, m) in matches.iter().enumerate() {
        if active.contains(&neuron) {
            let m = m.unwrap();
            assert_eq!(m.pattern, library.ids().nth(neuron).unwrap());
            assert_relative_eq!(m.precision, 1.0);
        }
    }

    let groups = group_by_specialization(&matches, &specialized);
    let scores = f1_measure(distribution, &lengths, &spikes, train.duration(), 0, &groups).unwrap();
    for score in scores.iter().filter(|score| groups.contains_key(&score.id)) {
        assert_eq!(score.false_negatives, 0);
        assert_relative_eq!(score.recall, 1.0);
        assert_relative_eq!(score.precision, 1.0);
        assert_relative_eq!(score.f1, 1.0);
    }

    // the same computation gives the same result
    let again = f1_measure(distribution, &lengths, &spikes, train.duration(), 0, &groups).unwrap();
    assert_eq!(scores, again);
}

#[test]
fn test_windowed_f1_detection_and_false_alarm() {
    let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![100, 400])]));
    let lengths = BTreeMap::from([(1, 150)]);
    let groups = BTreeMap::from([(1, vec![0])]);

    let perfect = f1_measure(&distribution, &lengths, &[vec![120, 430]], 1000, 0, &groups).unwrap();
    assert_eq!(perfect[0].true_positives, 2);
    assert_eq!(perfect[0].false_negatives, 0);
    assert_eq!(perfect[0].false_positives, 0);
    assert_relative_eq!(perfect[0].f1, 1.0);

    let noisy = f1_measure(&distribution, &lengths, &[vec![120, 430, 700]], 1000, 0, &groups).unwrap();
    assert_eq!(noisy[0].false_positives, 1);
    assert_relative_eq!(noisy[0].precision, 2.0 / 3.0);
}

#[test]
fn test_windows_clipped_at_train_end() {
    let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![950]), (2, vec![10])]));
    let lengths = BTreeMap::from([(1, 150), (2, 20)]);
    let spikes = vec![vec![960, 999, 1005], vec![15]];

    let table = precision_table(&distribution, &lengths, &spikes, 1000, 30).unwrap();
    assert_eq!(table.true_positives()[0], vec![2, 0]);
    assert_eq!(table.false_positives()[0], vec![0, 2]);

    let responses = count_pattern_responses(&spikes, &distribution, &lengths).unwrap();
    assert_eq!(responses, vec![vec![3, 0], vec![0, 1]]);
}

#[test]
fn test_traces_of_generated_train() {
    let settings = bar_settings();
    let (train, _) = generate_train(&settings, 2.0, None, StageSeeds::from_seed(SEED)).unwrap();

    let psp = PspSpec::new(PspShape::Alpha, 30e-3, 1.0, PspKind::Renewal);
    let traces = train.convert_to_trace(&psp, 0, train.duration()).unwrap();
    assert_eq!(traces.len(), train.num_channels());
    assert!(traces.iter().flatten().all(|v| *v >= 0.0 && *v <= 1.0 + 1e-12));

    // every spike step starts a kernel instance
    let steps = to_steps(train.spikes(), train.dt());
    for (trace, channel) in traces.iter().zip(steps.iter()) {
        assert!(channel
            .iter()
            .filter(|t| **t < train.duration())
            .all(|t| trace[*t] > 0.0));
    }

    let kernel = create_psp_shape(&PspSpec::new(PspShape::Rectangular, 10e-3, 1.0, PspKind::Additive), 1e-3).unwrap();
    let ground_truth = pattern_traces(train.distribution(), train.duration(), &kernel);
    for (id, trace) in ground_truth.iter() {
        let mean = mean_trace(train.distribution().starts(*id), trace, 10);
        if !train.distribution().starts(*id).is_empty() {
            assert!(mean.iter().all(|v| *v >= 1.0));
        }
    }
}

#[test]
fn test_cycle_fill_and_rectangular_kernel() {
    assert_eq!(cycle_fill(&[1, 2, 3], 5), vec![1, 2, 3, 1, 2]);

    let spec = PspSpec::new(PspShape::Rectangular, 0.01, 1.0, PspKind::Renewal);
    let kernel = create_psp_shape(&spec, 0.001).unwrap();
    assert_eq!(kernel.len(), 10);
    assert!(kernel.iter().all(|v| *v == 1.0));
}
