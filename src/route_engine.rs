//! Day route reconstruction.
//!
//! A day's raw track is cut into chunks of at most `max_waypoints_per_call + 1`
//! waypoints, each chunk is snapped to roads by one directions call, and the
//! decoded chunks are concatenated. The result is cached per (user, day).
//!
//! There is at most one reconstruction running per key. A request for a key
//! that is already being computed joins that computation instead of starting
//! another one. The computation runs in its own task, so a caller that gives
//! up only detaches its listener: provider calls already paid for and the
//! final cache write still happen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::config::RouteConfig;
use crate::directions::{DirectionsProvider, DirectionsRequest};
use crate::directions_codec;
use crate::error::RouteError;
use crate::gps_processor::Point;
use crate::route::{Route, RouteKey, RouteOutcome, RoutePoint, RouteSource};
use crate::storage::Storage;

/// Callbacks for one route request. Progress may be reported from any thread.
pub trait RouteListener: Send + Sync {
    fn on_route_loaded(&self, _route: &Route) {}
    fn on_progress(&self, _percent: u32) {}
    fn on_quota_exceeded(&self) {}
}

type SharedResult = Option<Result<RouteOutcome, RouteError>>;

struct InFlight {
    listeners: Mutex<Vec<(u64, Arc<dyn RouteListener>)>>,
    result: watch::Receiver<SharedResult>,
}

impl InFlight {
    fn listeners(&self) -> Vec<Arc<dyn RouteListener>> {
        match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn progress(&self, percent: u32) {
        for listener in self.listeners() {
            listener.on_progress(percent);
        }
    }

    fn finished(&self, outcome: &RouteOutcome) {
        for listener in self.listeners() {
            if outcome.quota_exceeded {
                listener.on_quota_exceeded();
            }
            listener.on_route_loaded(&outcome.route);
        }
    }
}

/// Detaches a listener from its computation when dropped.
struct ListenerGuard {
    in_flight: Arc<InFlight>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Ok(mut listeners) = self.in_flight.listeners.lock() {
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Mode {
    UseCache,
    Recalculate,
}

enum ChunkLoop {
    /// `from_provider` is set once any chunk was answered by the provider,
    /// whether or not its steps carry geometry.
    Completed {
        points: Vec<RoutePoint>,
        from_provider: bool,
    },
    QuotaExceeded,
    Failed(RouteError),
}

/// Indices of the waypoints of the chunk starting at `cursor`.
///
/// The chunk always contains `cursor` and the index where the scan stopped.
/// Points in between are kept if they are more than
/// `min_waypoint_distance_m` from the previously kept one. The scan stops at
/// the last point or once the chunk holds more than `max_waypoints_per_call`
/// waypoints.
pub fn plan_chunk(points: &[Point], cursor: usize, config: &RouteConfig) -> Vec<usize> {
    let mut chunk = vec![cursor];
    if points.is_empty() || cursor + 1 >= points.len() {
        return chunk;
    }
    let last = points.len() - 1;
    let max_waypoints = config.max_waypoints_per_call.max(1);
    let mut anchor = cursor;
    for i in (cursor + 1)..=last {
        if i == last {
            chunk.push(i);
            break;
        }
        if points[i].geodesic_distance(&points[anchor]) > config.min_waypoint_distance_m {
            chunk.push(i);
            anchor = i;
        }
        if chunk.len() > max_waypoints {
            break;
        }
    }
    chunk
}

struct EngineInner<P> {
    storage: Arc<Storage>,
    provider: P,
    config: RouteConfig,
    in_flight: Mutex<HashMap<RouteKey, Arc<InFlight>>>,
    next_listener_id: AtomicU64,
}

pub struct RouteEngine<P> {
    inner: Arc<EngineInner<P>>,
}

impl<P> Clone for RouteEngine<P> {
    fn clone(&self) -> Self {
        RouteEngine {
            inner: self.inner.clone(),
        }
    }
}

impl<P: DirectionsProvider> RouteEngine<P> {
    pub fn new(storage: Arc<Storage>, provider: P, config: RouteConfig) -> Self {
        RouteEngine {
            inner: Arc::new(EngineInner {
                storage,
                provider,
                config,
                in_flight: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// The recorded track as is, no provider involved.
    pub fn get_raw_points(&self, key: &RouteKey) -> Result<Route, RouteError> {
        self.inner.raw_route(key)
    }

    /// Cached route if any, otherwise reconstructs it (or falls back to the
    /// raw track when the quota is used up).
    pub async fn get_route(
        &self,
        key: RouteKey,
        listener: Option<Arc<dyn RouteListener>>,
    ) -> Result<RouteOutcome, RouteError> {
        self.run(key, Mode::UseCache, listener).await
    }

    /// Reconstructs the route even if one is cached.
    pub async fn recalculate_route(
        &self,
        key: RouteKey,
        listener: Option<Arc<dyn RouteListener>>,
    ) -> Result<RouteOutcome, RouteError> {
        self.run(key, Mode::Recalculate, listener).await
    }

    pub fn clear_cached_route(&self, key: &RouteKey) -> Result<bool, RouteError> {
        self.inner
            .storage
            .delete_cached_route_document(key)
            .map_err(RouteError::persistence)
    }

    pub fn is_in_flight(&self, key: &RouteKey) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|in_flight| in_flight.contains_key(key))
            .unwrap_or(false)
    }

    async fn run(
        &self,
        key: RouteKey,
        mode: Mode,
        listener: Option<Arc<dyn RouteListener>>,
    ) -> Result<RouteOutcome, RouteError> {
        let (mut result, _listener_guard) = {
            let mut in_flight_map = self
                .inner
                .in_flight
                .lock()
                .map_err(|_| RouteError::Persistence("in flight map lock poisoned".to_string()))?;
            let (in_flight, start) = match in_flight_map.get(&key) {
                Some(in_flight) => {
                    debug!("[route_engine] joining reconstruction of {}", key);
                    (in_flight.clone(), None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let in_flight = Arc::new(InFlight {
                        listeners: Mutex::new(Vec::new()),
                        result: rx,
                    });
                    in_flight_map.insert(key.clone(), in_flight.clone());
                    (in_flight, Some(tx))
                }
            };
            // attached before the task starts and while the map is locked, so
            // it sees every progress report and cannot miss the end
            let listener_guard = listener.map(|listener| {
                let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut listeners) = in_flight.listeners.lock() {
                    listeners.push((id, listener));
                }
                ListenerGuard {
                    in_flight: in_flight.clone(),
                    id,
                }
            });
            if let Some(tx) = start {
                self.spawn(key.clone(), mode, in_flight.clone(), tx);
            }
            (in_flight.result.clone(), listener_guard)
        };

        let shared = match result.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        shared.unwrap_or_else(|| {
            Err(RouteError::Persistence(
                "route reconstruction ended without a result".to_string(),
            ))
        })
    }

    fn spawn(
        &self,
        key: RouteKey,
        mode: Mode,
        in_flight: Arc<InFlight>,
        tx: watch::Sender<SharedResult>,
    ) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let result = inner.reconstruct(&key, mode, &in_flight).await;
            // a request arriving from now on starts over and sees our cache write
            if let Ok(mut in_flight_map) = inner.in_flight.lock() {
                in_flight_map.remove(&key);
            }
            match &result {
                Ok(outcome) => {
                    info!(
                        "[route_engine] {}: {} points from {}, quota_exceeded={}",
                        key,
                        outcome.route.len(),
                        outcome.source,
                        outcome.quota_exceeded
                    );
                    in_flight.finished(outcome);
                }
                Err(e) => info!("[route_engine] {}: {}", key, e),
            }
            let _ = tx.send(Some(result));
        });
    }
}

impl<P: DirectionsProvider> EngineInner<P> {
    fn raw_route(&self, key: &RouteKey) -> Result<Route, RouteError> {
        let recorded_points = self
            .storage
            .get_recorded_points(key)
            .map_err(RouteError::persistence)?;
        Route::of_recorded_points(&recorded_points).ok_or(RouteError::NoData)
    }

    fn cached_route(&self, key: &RouteKey) -> Option<Route> {
        match self.storage.get_cached_route_document(key) {
            Ok(Some(document)) => match directions_codec::decode(&document) {
                Ok(route) => Some(route),
                Err(e) => {
                    warn!("[route_engine] ignoring unreadable cache of {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("[route_engine] failed to read cache of {}: {}", key, e);
                None
            }
        }
    }

    fn quota_exhausted(&self) -> bool {
        match self
            .storage
            .is_directions_quota_exhausted(self.config.daily_limit)
        {
            Ok(exhausted) => exhausted,
            Err(e) => {
                // can't tell how much is left, don't spend any
                warn!("[route_engine] failed to read directions quota: {}", e);
                true
            }
        }
    }

    async fn reconstruct(
        &self,
        key: &RouteKey,
        mode: Mode,
        in_flight: &InFlight,
    ) -> Result<RouteOutcome, RouteError> {
        let cached = match (mode, self.cached_route(key)) {
            (Mode::UseCache, Some(route)) => {
                debug!("[route_engine] cache hit for {}", key);
                return Ok(RouteOutcome {
                    route,
                    source: RouteSource::Cache,
                    quota_exceeded: false,
                    warning: None,
                });
            }
            (_, cached) => cached,
        };

        let raw_route = match (self.raw_route(key), cached) {
            (Ok(raw_route), _) => raw_route,
            (Err(RouteError::NoData), Some(route)) => {
                return Ok(RouteOutcome {
                    route,
                    source: RouteSource::Cache,
                    quota_exceeded: false,
                    warning: Some(RouteError::NoData.to_string()),
                });
            }
            (Err(e), _) => return Err(e),
        };

        let raw_outcome = |quota_exceeded, warning| RouteOutcome {
            route: raw_route.clone(),
            source: RouteSource::RawPoints,
            quota_exceeded,
            warning,
        };

        if mode == Mode::UseCache && self.quota_exhausted() {
            info!("[route_engine] quota exhausted, raw points for {}", key);
            return Ok(raw_outcome(true, None));
        }

        match self.run_chunks(&raw_route, in_flight).await {
            ChunkLoop::Completed {
                points,
                from_provider,
            } => {
                let route = match Route::new(points) {
                    Some(route) if from_provider => route,
                    _ => return Ok(raw_outcome(false, None)),
                };
                // best effort, the route is returned either way
                let persisted = directions_codec::encode_to_string(&route)
                    .and_then(|document| self.storage.set_cached_route_document(key, &document));
                let warning = match persisted {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("[route_engine] failed to cache route of {}: {}", key, e);
                        Some(RouteError::persistence(e).to_string())
                    }
                };
                Ok(RouteOutcome {
                    route,
                    source: RouteSource::Provider,
                    quota_exceeded: false,
                    warning,
                })
            }
            ChunkLoop::QuotaExceeded => {
                info!(
                    "[route_engine] quota exhausted while reconstructing {}",
                    key
                );
                Ok(raw_outcome(true, None))
            }
            ChunkLoop::Failed(e) => {
                warn!("[route_engine] reconstruction of {} failed: {}", key, e);
                // the old cache is still better than the raw track
                match self.cached_route(key) {
                    Some(route) => Ok(RouteOutcome {
                        route,
                        source: RouteSource::Cache,
                        quota_exceeded: false,
                        warning: Some(e.to_string()),
                    }),
                    None => Ok(raw_outcome(false, Some(e.to_string()))),
                }
            }
        }
    }

    async fn run_chunks(&self, raw_route: &Route, in_flight: &InFlight) -> ChunkLoop {
        let points: Vec<Point> = raw_route.points().iter().map(|p| p.point.clone()).collect();
        let n = points.len();
        let mut accumulated = Vec::new();
        let mut from_provider = false;
        let mut cursor = 0;
        while cursor + 1 < n {
            let chunk = plan_chunk(&points, cursor, &self.config);
            in_flight.progress((cursor * 100 / n) as u32);

            let waypoints: Vec<Point> = chunk.iter().map(|&i| points[i].clone()).collect();
            let request = match DirectionsRequest::of_points(&waypoints) {
                Some(request) => request,
                None => {
                    accumulated.push(raw_route.last().clone());
                    break;
                }
            };

            // charged up front: a failed call still counts
            match self
                .storage
                .try_charge_directions_quota(self.config.daily_limit)
            {
                Ok(Some(used)) => debug!(
                    "[route_engine] directions call {} of {}: {} waypoints from index {}",
                    used,
                    self.config.daily_limit,
                    chunk.len(),
                    cursor
                ),
                Ok(None) => return ChunkLoop::QuotaExceeded,
                Err(e) => {
                    // can't tell how much is left, don't spend any
                    warn!("[route_engine] failed to charge directions quota: {}", e);
                    return ChunkLoop::QuotaExceeded;
                }
            }

            let body = match self.provider.request_route(&request).await {
                Ok(body) => body,
                Err(e) => return ChunkLoop::Failed(e),
            };
            match directions_codec::decode(&body) {
                Ok(route) => {
                    accumulated.extend(route.into_points());
                    from_provider = true;
                }
                Err(e) => return ChunkLoop::Failed(e.into()),
            }

            cursor = match chunk.last() {
                Some(&last) if last > cursor => last,
                _ => n - 1,
            };
        }
        in_flight.progress(100);
        ChunkLoop::Completed {
            points: accumulated,
            from_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ~111m per 0.001 degree of latitude
    fn line(n: usize, step_deg: f64) -> Vec<Point> {
        (0..n)
            .map(|i| Point::new(31.0 + i as f64 * step_deg, 121.0))
            .collect()
    }

    #[test]
    fn close_intermediate_points_are_skipped() {
        let points = vec![
            Point::new(31.0, 121.0),
            Point::new(31.0003, 121.0),
            Point::new(31.01, 121.0),
        ];
        let chunk = plan_chunk(&points, 0, &RouteConfig::default());
        assert_eq!(chunk, vec![0, 2]);
    }

    #[test]
    fn chunk_is_capped() {
        let points = line(100, 0.001);
        let config = RouteConfig::default();
        let chunk = plan_chunk(&points, 0, &config);
        assert_eq!(chunk.len(), config.max_waypoints_per_call + 1);
        assert_eq!(chunk, (0..=20).collect::<Vec<_>>());

        let chunk = plan_chunk(&points, 20, &config);
        assert_eq!(chunk.first(), Some(&20));
        assert_eq!(chunk.last(), Some(&40));
    }

    #[test]
    fn last_point_always_included() {
        // all points within 100m of the origin
        let points = line(10, 0.00005);
        let chunk = plan_chunk(&points, 0, &RouteConfig::default());
        assert_eq!(chunk, vec![0, 9]);
        assert_eq!(plan_chunk(&points, 9, &RouteConfig::default()), vec![9]);
    }

    #[test]
    fn distance_is_measured_from_last_kept_waypoint() {
        // 60m apart: only every other point is more than 100m from the last kept one
        let points = line(7, 0.00054);
        let chunk = plan_chunk(&points, 0, &RouteConfig::default());
        assert_eq!(chunk, vec![0, 2, 4, 6]);
    }
}
