#![allow(dead_code)]

use chrono::NaiveDate;
use daytrack_core::directions::{DirectionsProvider, DirectionsRequest};
use daytrack_core::error::RouteError;
use daytrack_core::gps_processor::{Point, RawData, RecordedPoint};
use daytrack_core::main_db::{MainDb, Setting};
use daytrack_core::route::{Route, RouteKey};
use daytrack_core::route_engine::RouteListener;
use daytrack_core::storage::Storage;
use daytrack_core::utils::DayBucket;
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempdir::TempDir;

// the example from the encoded polyline algorithm documentation
pub const SAMPLE_POLYLINE: &str = "_p~iF~ps|U_ulLnnqC_mqNvxq`@";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn temp_storage(name: &str) -> (TempDir, Arc<Storage>) {
    init_logging();
    let temp_dir = TempDir::new(name).unwrap();
    let storage = open_storage(&temp_dir);
    (temp_dir, Arc::new(storage))
}

pub fn open_storage(temp_dir: &TempDir) -> Storage {
    let sub_folder = |sub| {
        let path = temp_dir.path().join(sub);
        fs::create_dir_all(&path).unwrap();
        path.into_os_string().into_string().unwrap()
    };
    Storage::init(sub_folder("support/"), sub_folder("cache/")).unwrap()
}

/// Leaves a quota counter that doesn't parse in the storage under `temp_dir`.
pub fn corrupt_quota_counter(temp_dir: &TempDir) {
    let support_dir = temp_dir.path().join("support/");
    let mut main_db = MainDb::open(support_dir.to_str().unwrap()).unwrap();
    main_db
        .set_setting(Setting::DirectionsQuotaUsed, "not a number")
        .unwrap();
}

pub fn test_day() -> DayBucket {
    DayBucket::of_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
}

pub fn test_key() -> RouteKey {
    RouteKey::new("alice", test_day())
}

/// Roughly `meters` north of `point`.
pub fn offset_north(point: &Point, meters: f64) -> Point {
    Point::new(point.latitude + meters / 111_000., point.longitude)
}

pub fn origin() -> Point {
    Point::new(31.2304, 121.4737)
}

/// `n` points in a line going north, `step_m` apart.
pub fn points_north(n: usize, step_m: f64) -> Vec<Point> {
    (0..n)
        .map(|i| offset_north(&origin(), i as f64 * step_m))
        .collect()
}

pub fn raw_data(point: Point, timestamp_ms: i64, accuracy: Option<f32>) -> RawData {
    RawData {
        point,
        timestamp_ms,
        accuracy,
        altitude: Some(10.),
        speed: Some(1.2),
        bearing: None,
    }
}

/// Stores `points` as the point log of `key`, one minute apart from 08:00.
pub fn record_day(storage: &Storage, key: &RouteKey, points: &[Point]) {
    let start = key.day.start_timestamp_ms() + 8 * 3600 * 1000;
    let recorded: Vec<RecordedPoint> = points
        .iter()
        .enumerate()
        .map(|(i, point)| RecordedPoint {
            timestamp_ms: start + i as i64 * 60_000,
            point: point.clone(),
            distance_from_previous: if i == 0 {
                0.
            } else {
                point.geodesic_distance(&points[i - 1])
            },
            speed: None,
            bearing: None,
        })
        .collect();
    assert_eq!(
        storage.append_recorded_points(&key.user_id, &recorded).unwrap(),
        points.len()
    );
}

/// One leg per pair of consecutive waypoints with a single step each, the
/// way the provider answers a request.
pub fn ok_document(request: &DirectionsRequest) -> serde_json::Value {
    let mut points = vec![request.origin.clone()];
    points.extend(request.waypoints.iter().cloned());
    points.push(request.destination.clone());
    let location = |p: &Point| json!({"lat": p.latitude, "lng": p.longitude});
    let legs: Vec<serde_json::Value> = points
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            json!({
                "start_location": location(&pair[0]),
                "end_location": location(&pair[1]),
                "start_address": format!("Stop {}", i),
                "end_address": format!("Stop {}", i + 1),
                "steps": [{
                    "end_location": location(&pair[1]),
                    "distance": {"value": 120.0, "text": "0.1 km"},
                    "polyline": {"points": SAMPLE_POLYLINE},
                    "travel_mode": "DRIVING"
                }]
            })
        })
        .collect();
    json!({
        "geocoded_waypoints": [],
        "status": "OK",
        "routes": [{"summary": "test", "legs": legs}]
    })
}

/// A valid answer whose steps carry no geometry, as for a zero length leg.
pub fn ok_document_without_geometry(request: &DirectionsRequest) -> serde_json::Value {
    let mut document = ok_document(request);
    for leg in document["routes"][0]["legs"].as_array_mut().unwrap() {
        for step in leg["steps"].as_array_mut().unwrap() {
            step.as_object_mut().unwrap().remove("polyline");
        }
    }
    document
}

#[derive(Clone, Debug)]
pub enum FakeResponse {
    Ok,
    OkWithoutGeometry,
    Status {
        status: String,
        message: Option<String>,
    },
    Body(String),
    TransportError,
}

struct FakeProviderState {
    response: Mutex<FakeResponse>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<DirectionsRequest>>,
    calls: AtomicUsize,
}

/// Answers from memory and remembers what it was asked.
#[derive(Clone)]
pub struct FakeProvider {
    state: Arc<FakeProviderState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        FakeProvider {
            state: Arc::new(FakeProviderState {
                response: Mutex::new(FakeResponse::Ok),
                delay: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_response(&self, response: FakeResponse) {
        *self.state.response.lock().unwrap() = response;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DirectionsRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl DirectionsProvider for FakeProvider {
    async fn request_route(&self, request: &DirectionsRequest) -> Result<String, RouteError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().unwrap().push(request.clone());
        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.state.response.lock().unwrap().clone();
        match response {
            FakeResponse::Ok => Ok(ok_document(request).to_string()),
            FakeResponse::OkWithoutGeometry => {
                Ok(ok_document_without_geometry(request).to_string())
            }
            FakeResponse::Status { status, message } => {
                Ok(json!({"status": status, "error_message": message, "routes": []}).to_string())
            }
            FakeResponse::Body(body) => Ok(body),
            FakeResponse::TransportError => Err(RouteError::Provider {
                message: "Request error: connection reset".to_string(),
                status_code: None,
            }),
        }
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub progress: Mutex<Vec<u32>>,
    pub loaded: Mutex<Vec<Route>>,
    pub quota_exceeded: AtomicUsize,
}

impl RouteListener for RecordingListener {
    fn on_route_loaded(&self, route: &Route) {
        self.loaded.lock().unwrap().push(route.clone());
    }

    fn on_progress(&self, percent: u32) {
        self.progress.lock().unwrap().push(percent);
    }

    fn on_quota_exceeded(&self) {
        self.quota_exceeded.fetch_add(1, Ordering::SeqCst);
    }
}
