use anyhow::Result;
use chrono::DateTime;
use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::Display;

use crate::gps_processor::{Point, RecordedPoint};
use crate::utils::DayBucket;

/// Encoded polylines from the provider use 5 decimal places.
pub const POLYLINE_PRECISION: u32 = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub point: Point,
    /// Step distance for provider points, distance to the previous fix for
    /// raw points.
    pub distance_m: f64,
    /// Encoded geometry of the step ending at `point`. Only provider derived
    /// points have one.
    pub polyline: Option<String>,
    pub label: Option<String>,
    // only meaningful to the UI
    pub selected: bool,
}

/// An ordered, non-empty list of points.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    points: Vec<RoutePoint>,
}

impl Route {
    pub fn new(points: Vec<RoutePoint>) -> Option<Self> {
        if points.is_empty() {
            None
        } else {
            Some(Route { points })
        }
    }

    /// Raw recorded points as a route, labeled with their UTC time of day.
    pub fn of_recorded_points(recorded_points: &[RecordedPoint]) -> Option<Self> {
        Self::new(recorded_points.iter().map(raw_route_point).collect())
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<RoutePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first(&self) -> &RoutePoint {
        &self.points[0]
    }

    pub fn last(&self) -> &RoutePoint {
        &self.points[self.points.len() - 1]
    }

    pub fn start_label(&self) -> Option<&str> {
        self.first().label.as_deref()
    }

    pub fn has_provider_points(&self) -> bool {
        self.points.iter().any(|p| p.polyline.is_some())
    }

    pub fn total_distance_m(&self) -> f64 {
        self.points.iter().map(|p| p.distance_m).sum()
    }

    pub fn set_selected(&mut self, index: usize, selected: bool) {
        if let Some(p) = self.points.get_mut(index) {
            p.selected = selected;
        }
    }

    /// The full line to draw: provider points contribute their decoded step
    /// geometry, other points just their coordinate.
    pub fn geometry(&self) -> Result<LineString<f64>> {
        let mut coords: Vec<Coord<f64>> = Vec::with_capacity(self.points.len());
        let mut push = |coord: Coord<f64>| {
            if coords.last() != Some(&coord) {
                coords.push(coord);
            }
        };
        for route_point in &self.points {
            match &route_point.polyline {
                Some(fragment) if !fragment.is_empty() => {
                    let line = polyline::decode_polyline(fragment, POLYLINE_PRECISION)
                        .map_err(|e| anyhow!("invalid geometry fragment {:?}: {}", fragment, e))?;
                    line.0.into_iter().for_each(&mut push);
                }
                _ => push(Coord {
                    x: route_point.point.longitude,
                    y: route_point.point.latitude,
                }),
            }
        }
        Ok(LineString::new(coords))
    }
}

fn raw_route_point(recorded_point: &RecordedPoint) -> RoutePoint {
    RoutePoint {
        point: recorded_point.point.clone(),
        distance_m: recorded_point.distance_from_previous,
        polyline: None,
        label: DateTime::from_timestamp_millis(recorded_point.timestamp_ms)
            .map(|t| t.format("%H:%M:%S").to_string()),
        selected: false,
    }
}

/// Identifies a day of one user.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub user_id: String,
    pub day: DayBucket,
}

impl RouteKey {
    pub fn new(user_id: impl Into<String>, day: DayBucket) -> Self {
        RouteKey {
            user_id: user_id.into(),
            day,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.day)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum RouteSource {
    Cache,
    Provider,
    RawPoints,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteOutcome {
    pub route: Route,
    pub source: RouteSource,
    /// Advisory: the daily quota is used up, `route` is the raw track.
    pub quota_exceeded: bool,
    /// Set when reconstruction failed and `route` is a fallback.
    pub warning: Option<String>,
}
