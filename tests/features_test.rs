use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use ephys_features::config::{FeatureConfig, FitConfig};
use ephys_features::detector::ThresholdDetector;
use ephys_features::error::FeatureError;
use ephys_features::features::{DerivedFeature, FeatureExtractor};
use ephys_features::get_feature_values;
use ephys_features::trace::Trace;

const STIM_START: f64 = 100.0;
const STIM_END: f64 = 900.0;

fn sample_times() -> Vec<f64> {
    (0..=10_000).map(|i| i as f64 * 0.1).collect()
}

/// A resting membrane at -70 mV with gaussian spikes peaking at +20 mV.
fn spiking_trace(spike_times: &[f64]) -> Trace {
    let time = sample_times();
    let voltage: Vec<f64> = time
        .iter()
        .map(|&t| {
            -70.0
                + spike_times
                    .iter()
                    .map(|ts| 90.0 * (-((t - ts) / 0.3).powi(2)).exp())
                    .sum::<f64>()
        })
        .collect();
    Trace::build(time, voltage, STIM_START, STIM_END).unwrap()
}

/// A membrane relaxing from -80 mV to -70 mV from the stimulus onset, with measurement noise.
fn decaying_trace(slow: f64, fast: f64, noise: f64, seed: u64) -> Trace {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(0.0, noise).unwrap();
    let time = sample_times();
    let voltage: Vec<f64> = time
        .iter()
        .map(|&t| {
            let v = match t < STIM_START {
                true => -70.0,
                false => {
                    let dt = t - STIM_START;
                    -70.0 - 5.0 * (-dt / slow).exp() - 5.0 * (-dt / fast).exp()
                }
            };
            v + normal.sample(&mut rng)
        })
        .collect();
    Trace::build(time, voltage, STIM_START, STIM_END).unwrap()
}

fn all_derived_names() -> Vec<&'static str> {
    DerivedFeature::ALL.iter().map(|feature| feature.name()).collect()
}

#[test]
fn test_values_follow_request() {
    let trace = spiking_trace(&[30.0, 400.0, 500.0, 960.0]);
    let names = [
        "AP_count",
        "AP_count_before_stim",
        "AP_count_after_stim",
        "AP1_amp_rev",
        "AP2_amp_rev",
        "clustering_index",
        "input_resistance",
        "peak_voltage",
        "Spikecount",
    ];
    let values = get_feature_values(&ThresholdDetector::default(), &trace, &names).unwrap();

    assert_eq!(values.len(), names.len());
    assert_eq!(values.names().collect::<Vec<&str>>(), names.to_vec());
    for (name, value) in values.iter() {
        assert!(value.is_finite(), "{} is not finite", name);
    }

    assert_eq!(values.get("AP_count"), Some(4.0));
    assert_eq!(values.get("AP_count_before_stim"), Some(1.0));
    assert_eq!(values.get("AP_count_after_stim"), Some(1.0));
    assert_eq!(values.get("Spikecount"), Some(4.0));
    assert!(values.get("AP1_amp_rev").unwrap() > 0.0);
    assert!(values.get("AP2_amp_rev").unwrap() > 0.0);
    let clustering = values.get("clustering_index").unwrap();
    assert!((0.0..=1.0).contains(&clustering));
}

#[test]
fn test_extraction_is_idempotent() {
    let trace = spiking_trace(&[250.0, 300.0, 700.0]);
    let before = trace.clone();
    let names = all_derived_names();
    let extractor = FeatureExtractor::new(ThresholdDetector::default());

    let first = extractor.get_feature_values(&trace, &names).unwrap();
    let second = extractor.get_feature_values(&trace, &names).unwrap();

    assert_eq!(trace, before);
    for ((name, a), (_, b)) in first.iter().zip(second.iter()) {
        assert_eq!(a.to_bits(), b.to_bits(), "{} differs between calls", name);
    }
}

#[test]
fn test_no_spike() {
    let trace = spiking_trace(&[]);
    let report = FeatureExtractor::new(ThresholdDetector::default())
        .compute_features(
            &trace,
            &[
                "AP_count",
                "AP_count_before_stim",
                "AP_count_after_stim",
                "AP1_amp_rev",
                "AP2_amp_rev",
                "clustering_index",
                "time_to_first_spike",
            ],
        )
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.values.get("AP_count"), Some(0.0));
    assert_eq!(report.values.get("AP_count_before_stim"), Some(0.0));
    assert_eq!(report.values.get("AP_count_after_stim"), Some(0.0));
    assert!(report.values.get("AP1_amp_rev").unwrap().is_nan());
    assert!(report.values.get("AP2_amp_rev").unwrap().is_nan());
    assert!(report.values.get("clustering_index").unwrap().is_nan());
    assert!(report.values.get("time_to_first_spike").unwrap().is_nan());
}

#[test]
fn test_clustering_index() {
    let detector = ThresholdDetector::default();

    // The middle of the stimulus window is not in its first half
    let trace = spiking_trace(&[500.0]);
    let values = get_feature_values(&detector, &trace, &["clustering_index"]).unwrap();
    assert_eq!(values.get("clustering_index"), Some(0.0));

    let trace = spiking_trace(&[200.0, 300.0, 400.0, 800.0]);
    let values = get_feature_values(&detector, &trace, &["clustering_index"]).unwrap();
    assert_relative_eq!(values.get("clustering_index").unwrap(), 0.75);
}

#[test]
fn test_unknown_feature() {
    let trace = spiking_trace(&[300.0]);
    let result = get_feature_values(
        &ThresholdDetector::default(),
        &trace,
        &["AP_count", "not_a_feature"],
    );
    assert_eq!(
        result,
        Err(FeatureError::UnknownFeature("not_a_feature".to_string()))
    );
}

#[test]
fn test_input_resistance() {
    let detector = ThresholdDetector::default();

    let flat = spiking_trace(&[]);
    let values = get_feature_values(&detector, &flat, &["input_resistance"]).unwrap();
    assert_eq!(values.get("input_resistance"), Some(0.0));

    // A 5 mV hyperpolarization under a -10 pA probe
    let time = sample_times();
    let voltage: Vec<f64> = time
        .iter()
        .map(|&t| match (500.0..=600.0).contains(&t) {
            true => -75.0,
            false => -70.0,
        })
        .collect();
    let trace = Trace::build(time, voltage, STIM_START, STIM_END).unwrap();
    let values = get_feature_values(&detector, &trace, &["input_resistance"]).unwrap();
    assert_relative_eq!(values.get("input_resistance").unwrap(), 500.0, max_relative = 1e-9);
}

#[test]
fn test_decay_time_constant_after_stim() {
    let trace = decaying_trace(30.0, 3.0, 0.005, 42);
    let config = FeatureConfig {
        resample_step: 0.1,
        ..FeatureConfig::default()
    };
    let extractor = FeatureExtractor::with_config(ThresholdDetector::default(), config).unwrap();

    let report = extractor
        .compute_features(&trace, &["decay_time_constant_after_stim2"])
        .unwrap();
    assert!(report.failures.is_empty());
    assert_relative_eq!(
        report.values.get("decay_time_constant_after_stim2").unwrap(),
        30.0,
        max_relative = 0.05
    );
}

#[test]
fn test_decay_failure_is_isolated() {
    let trace = spiking_trace(&[]);
    let report = FeatureExtractor::new(ThresholdDetector::default())
        .compute_features(&trace, &["AP_count", "decay_time_constant_after_stim2"])
        .unwrap();

    assert_eq!(report.values.get("AP_count"), Some(0.0));
    assert!(report
        .values
        .get("decay_time_constant_after_stim2")
        .unwrap()
        .is_nan());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "decay_time_constant_after_stim2");
    assert_eq!(report.failures[0].error.kind(), "degenerate_segment");
}

#[test]
fn test_decay_without_convergence_is_missing() {
    let trace = decaying_trace(30.0, 3.0, 0.005, 7);
    let config = FeatureConfig {
        resample_step: 0.1,
        fit: FitConfig {
            max_evaluations_per_param: 1,
            ..FitConfig::default()
        },
        ..FeatureConfig::default()
    };
    let extractor = FeatureExtractor::with_config(ThresholdDetector::default(), config).unwrap();

    let report = extractor
        .compute_features(&trace, &["AP_count", "decay_time_constant_after_stim2"])
        .unwrap();
    assert_eq!(report.values.get("AP_count"), Some(0.0));
    assert!(report
        .values
        .get("decay_time_constant_after_stim2")
        .unwrap()
        .is_nan());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "decay_time_constant_after_stim2");
    assert_eq!(report.failures[0].error.kind(), "fit_convergence");
}

#[test]
fn test_parallel_matches_sequential() {
    let trace = spiking_trace(&[30.0, 250.0, 300.0, 420.0, 960.0]);
    let mut names = all_derived_names();
    names.retain(|name| *name != "decay_time_constant_after_stim2");
    names.extend(["peak_voltage", "mean_frequency", "voltage_base", "ISI_values"]);

    let sequential = FeatureExtractor::new(ThresholdDetector::default());
    let parallel = FeatureExtractor::with_config(
        ThresholdDetector::default(),
        FeatureConfig {
            parallel: true,
            ..FeatureConfig::default()
        },
    )
    .unwrap();

    let expected = sequential.compute_features(&trace, &names).unwrap();
    let report = parallel.compute_features(&trace, &names).unwrap();
    assert_eq!(report.failures, expected.failures);
    for ((name, value), (expected_name, expected_value)) in
        report.values.iter().zip(expected.values.iter())
    {
        assert_eq!(name, expected_name);
        assert_eq!(value.to_bits(), expected_value.to_bits());
    }
}

#[test]
fn test_columns_of_any_numeric_type() {
    let time: Vec<f32> = (0..=1000).map(|i| i as f32).collect();
    let voltage = vec![-70_i64; 1001];
    let trace = Trace::from_columns(&time, &voltage, &[STIM_START], &vec![STIM_END]).unwrap();

    let values = get_feature_values(
        &ThresholdDetector::default(),
        &trace,
        &["AP_count", "input_resistance", "voltage_base"],
    )
    .unwrap();
    assert_eq!(values.get("AP_count"), Some(0.0));
    assert_eq!(values.get("input_resistance"), Some(0.0));
    assert_eq!(values.get("voltage_base"), Some(-70.0));
}

#[test]
fn test_invalid_config() {
    let config = FeatureConfig {
        resample_step: 0.0,
        ..FeatureConfig::default()
    };
    let result = FeatureExtractor::with_config(ThresholdDetector::default(), config);
    assert!(matches!(result, Err(FeatureError::InvalidParameter(_))));
}
