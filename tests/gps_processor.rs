pub mod test_utils;

use assert_float_eq::*;
use daytrack_core::config::FilterConfig;
use daytrack_core::gps_processor::{self, FilterDecision, GpsProcessor, Point, RejectReason};
use test_utils::{offset_north, origin, raw_data};

#[test]
fn first_data() {
    let mut gps_processor = GpsProcessor::new(FilterConfig::default());
    assert!(gps_processor.last_accepted().is_none());
    let decision = gps_processor.preprocess(&raw_data(origin(), 1697349116449, Some(3.9)));
    assert_eq!(decision, FilterDecision::Accept { distance_m: 0. });
    assert_eq!(gps_processor.last_accepted(), Some(&origin()));
}

#[test]
fn inaccurate() {
    let mut gps_processor = GpsProcessor::new(FilterConfig::default());
    let decision = gps_processor.preprocess(&raw_data(origin(), 1697349116449, Some(300.)));
    assert_eq!(decision, FilterDecision::Reject(RejectReason::Inaccurate));
    assert!(gps_processor.last_accepted().is_none());

    // the threshold itself is already too much
    let decision = gps_processor.preprocess(&raw_data(origin(), 1697349117449, Some(50.)));
    assert_eq!(decision, FilterDecision::Reject(RejectReason::Inaccurate));
    let decision = gps_processor.preprocess(&raw_data(origin(), 1697349118449, Some(49.9)));
    assert!(decision.is_accepted());
}

#[test]
fn inaccurate_fix_keeps_baseline() {
    let mut gps_processor = GpsProcessor::new(FilterConfig::default());
    gps_processor.preprocess(&raw_data(origin(), 1697349116449, Some(5.)));
    let far = offset_north(&origin(), 500.);
    let decision = gps_processor.preprocess(&raw_data(far, 1697349117449, Some(80.)));
    assert!(!decision.is_accepted());
    assert_eq!(gps_processor.last_accepted(), Some(&origin()));
}

#[test]
fn missing_accuracy_is_trusted() {
    let decision = gps_processor::accept(
        &raw_data(origin(), 1697349116449, None),
        None,
        &FilterConfig::default(),
    );
    assert!(decision.is_accepted());
}

#[test]
fn distance_chaining() {
    let mut gps_processor = GpsProcessor::new(FilterConfig::default());
    let start = origin();
    gps_processor.preprocess(&raw_data(start.clone(), 1697349116449, Some(5.)));

    let near = offset_north(&start, 10.);
    match gps_processor.preprocess(&raw_data(near, 1697349117449, Some(5.))) {
        FilterDecision::Reject(RejectReason::TooClose { distance_m }) => {
            assert_float_absolute_eq!(distance_m, 10., 0.5)
        }
        other => panic!("unexpected decision: {:?}", other),
    }
    // still measured from `start`
    assert_eq!(gps_processor.last_accepted(), Some(&start));

    let far = offset_north(&start, 50.);
    let decision = gps_processor.preprocess(&raw_data(far.clone(), 1697349118449, Some(5.)));
    assert!(decision.is_accepted());
    assert_float_absolute_eq!(decision.distance_m(), 50., 0.5);
    assert_eq!(gps_processor.last_accepted(), Some(&far));

    // 35m from `far` but only 15m from `start`
    let back = offset_north(&start, 15.);
    let decision = gps_processor.preprocess(&raw_data(back, 1697349119449, Some(5.)));
    assert!(decision.is_accepted());
    assert_float_absolute_eq!(decision.distance_m(), 35., 0.5);
}

#[test]
fn configurable_thresholds() {
    let config = FilterConfig {
        accuracy_threshold_m: 10.,
        min_distance_m: 100.,
    };
    let baseline = Point::new(30.2719716, 120.163856);
    let decision = gps_processor::accept(
        &raw_data(offset_north(&baseline, 50.), 1697349116449, Some(9.)),
        Some(&baseline),
        &config,
    );
    assert_eq!(decision.to_int(), -2);
    let decision = gps_processor::accept(
        &raw_data(offset_north(&baseline, 150.), 1697349116449, Some(12.)),
        Some(&baseline),
        &config,
    );
    assert_eq!(decision.to_int(), -1);
}
