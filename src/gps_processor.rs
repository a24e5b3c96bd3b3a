use geo::{Distance, Geodesic};
use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Point {
            latitude,
            longitude,
        }
    }

    /// Distance in meters on the WGS84 ellipsoid.
    pub fn geodesic_distance(&self, other: &Point) -> f64 {
        Geodesic::distance(self.to_geo(), other.to_geo())
    }

    pub fn to_geo(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// A position fix as reported by the platform location API.
#[derive(Clone, Debug, PartialEq)]
pub struct RawData {
    pub point: Point,
    pub timestamp_ms: i64,
    pub accuracy: Option<f32>,
    pub altitude: Option<f64>,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
}

/// An accepted fix, as stored in the point log. Never modified once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedPoint {
    pub timestamp_ms: i64,
    pub point: Point,
    pub distance_from_previous: f64,
    pub speed: Option<f32>,
    pub bearing: Option<f32>,
}

impl RecordedPoint {
    pub fn of_accepted(raw_data: &RawData, distance_from_previous: f64) -> Self {
        RecordedPoint {
            timestamp_ms: raw_data.timestamp_ms,
            point: raw_data.point.clone(),
            distance_from_previous,
            speed: raw_data.speed,
            bearing: raw_data.bearing,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RejectReason {
    Inaccurate,
    TooClose { distance_m: f64 },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FilterDecision {
    Accept { distance_m: f64 },
    Reject(RejectReason),
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accept { .. })
    }

    /// Distance to the baseline, 0 when there was none or the fix was too
    /// inaccurate to be measured.
    pub fn distance_m(&self) -> f64 {
        match self {
            FilterDecision::Accept { distance_m } => *distance_m,
            FilterDecision::Reject(RejectReason::TooClose { distance_m }) => *distance_m,
            FilterDecision::Reject(RejectReason::Inaccurate) => 0.,
        }
    }

    pub fn to_int(&self) -> i8 {
        match self {
            FilterDecision::Accept { .. } => 0,
            FilterDecision::Reject(RejectReason::Inaccurate) => -1,
            FilterDecision::Reject(RejectReason::TooClose { .. }) => -2,
        }
    }
}

/// Decides whether `fix` is worth persisting given the last accepted point.
pub fn accept(fix: &RawData, last_accepted: Option<&Point>, config: &FilterConfig) -> FilterDecision {
    // a fix without accuracy is trusted, some providers (e.g. replayed
    // tracks) just don't report it.
    let inaccurate = match fix.accuracy {
        Some(accuracy) => accuracy as f64 >= config.accuracy_threshold_m,
        None => false,
    };
    if inaccurate {
        return FilterDecision::Reject(RejectReason::Inaccurate);
    }
    match last_accepted {
        None => FilterDecision::Accept { distance_m: 0. },
        Some(last) => {
            let distance_m = fix.point.geodesic_distance(last);
            if distance_m >= config.min_distance_m {
                FilterDecision::Accept { distance_m }
            } else {
                FilterDecision::Reject(RejectReason::TooClose { distance_m })
            }
        }
    }
}

/// Holds the distance-chaining baseline of one user. Fixes must be fed in
/// order: each one is measured against the outcome of the previous one.
pub struct GpsProcessor {
    config: FilterConfig,
    last_accepted: Option<Point>,
}

impl GpsProcessor {
    pub fn new(config: FilterConfig) -> Self {
        Self::with_baseline(config, None)
    }

    pub fn with_baseline(config: FilterConfig, last_accepted: Option<Point>) -> Self {
        GpsProcessor {
            config,
            last_accepted,
        }
    }

    pub fn last_accepted(&self) -> Option<&Point> {
        self.last_accepted.as_ref()
    }

    pub fn reset_baseline(&mut self, last_accepted: Option<Point>) {
        self.last_accepted = last_accepted;
    }

    pub fn preprocess(&mut self, curr_data: &RawData) -> FilterDecision {
        let decision = accept(curr_data, self.last_accepted.as_ref(), &self.config);
        if decision.is_accepted() {
            self.last_accepted = Some(curr_data.point.clone());
        }
        decision
    }
}
