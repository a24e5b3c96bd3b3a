//! Conversion between directions documents and [`Route`]s.
//!
//! The document shape is the one returned by the directions provider
//! (`status`, `routes[].legs[].steps[]`). Cached routes are stored in the same
//! shape so that a cache hit goes through exactly the same decoding as a fresh
//! response. A few optional fields that the provider never sends
//! (`start_distance`, `start_polyline`, `selected`) let [`encode`] carry
//! everything a [`Route`] holds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gps_processor::Point;
use crate::route::{Route, RoutePoint};

pub const STATUS_OK: &str = "OK";

#[derive(Clone, Debug, Error)]
pub enum DecodeError {
    #[error(
        "provider returned {status}{}",
        .message.as_ref().map(|m| format!(": {m}")).unwrap_or_default()
    )]
    Status {
        status: String,
        message: Option<String>,
    },
    #[error("response has no route")]
    NoRoute,
    #[error("route has no leg")]
    NoLeg,
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<&Point> for LatLng {
    fn from(p: &Point) -> Self {
        LatLng {
            lat: p.latitude,
            lng: p.longitude,
        }
    }
}

impl From<&LatLng> for Point {
    fn from(l: &LatLng) -> Self {
        Point::new(l.lat, l.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceField {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolylineField {
    pub points: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub end_location: LatLng,
    pub distance: DistanceField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polyline: Option<PolylineField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_address: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub start_location: LatLng,
    pub end_location: LatLng,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_address: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_distance: Option<DistanceField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_polyline: Option<PolylineField>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub start_selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRoute {
    #[serde(default)]
    pub legs: Vec<Leg>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionsDocument {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub routes: Vec<DocumentRoute>,
}

pub fn decode(json: &str) -> Result<Route, DecodeError> {
    let document: DirectionsDocument =
        serde_json::from_str(json).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode_document(&document)
}

pub fn decode_document(document: &DirectionsDocument) -> Result<Route, DecodeError> {
    if document.status != STATUS_OK || document.error_message.is_some() {
        return Err(DecodeError::Status {
            status: document.status.clone(),
            message: document.error_message.clone(),
        });
    }
    let route = document.routes.first().ok_or(DecodeError::NoRoute)?;
    if route.legs.is_empty() {
        return Err(DecodeError::NoLeg);
    }

    let mut points = Vec::new();
    for (leg_index, leg) in route.legs.iter().enumerate() {
        if leg_index == 0 {
            points.push(RoutePoint {
                point: (&leg.start_location).into(),
                distance_m: leg.start_distance.as_ref().map_or(0., |d| d.value),
                polyline: leg.start_polyline.as_ref().map(|p| p.points.clone()),
                label: leg.start_address.clone(),
                selected: leg.start_selected,
            });
        }
        let last_step_index = leg.steps.len().saturating_sub(1);
        for (step_index, step) in leg.steps.iter().enumerate() {
            // steps are rarely geocoded, the leg always is
            let label = if step_index == last_step_index {
                leg.end_address.clone().or_else(|| step.end_address.clone())
            } else {
                step.end_address.clone()
            };
            points.push(RoutePoint {
                point: (&step.end_location).into(),
                distance_m: step.distance.value,
                polyline: step.polyline.as_ref().map(|p| p.points.clone()),
                label,
                selected: step.selected,
            });
        }
    }
    Route::new(points).ok_or(DecodeError::NoLeg)
}

/// Builds a single-leg document describing `route`.
pub fn encode(route: &Route) -> DirectionsDocument {
    let first = route.first();
    let last = route.last();
    let steps = route.points()[1..]
        .iter()
        .map(|p| Step {
            end_location: (&p.point).into(),
            distance: DistanceField {
                value: p.distance_m,
                text: None,
            },
            polyline: p.polyline.clone().map(|points| PolylineField { points }),
            end_address: p.label.clone(),
            selected: p.selected,
        })
        .collect();
    let leg = Leg {
        start_location: (&first.point).into(),
        end_location: (&last.point).into(),
        start_address: first.label.clone(),
        end_address: last.label.clone(),
        steps,
        start_distance: if first.distance_m != 0. {
            Some(DistanceField {
                value: first.distance_m,
                text: None,
            })
        } else {
            None
        },
        start_polyline: first
            .polyline
            .clone()
            .map(|points| PolylineField { points }),
        start_selected: first.selected,
    };
    DirectionsDocument {
        status: STATUS_OK.to_string(),
        error_message: None,
        routes: vec![DocumentRoute { legs: vec![leg] }],
    }
}

pub fn encode_to_string(route: &Route) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&encode(route))?)
}
