use std::sync::{Arc, OnceLock};

use anyhow::Result;
use chrono::NaiveDate;
use tokio::runtime::Runtime;

use crate::config::Config;
use crate::directions::HttpDirectionsProvider;
use crate::error::RouteError;
use crate::gps_processor::RawData;
use crate::logs;
use crate::recorder::{AcceptedFixesListener, RemotePointLog, TrackRecorder};
use crate::route::{Route, RouteKey, RouteOutcome};
use crate::route_engine::{RouteEngine, RouteListener};
use crate::storage::{self, Storage};
use crate::utils::DayBucket;

struct MainState {
    storage: Arc<Storage>,
    recorder: TrackRecorder,
    route_engine: RouteEngine<HttpDirectionsProvider>,
    runtime: Runtime,
}

static MAIN_STATE: OnceLock<MainState> = OnceLock::new();

fn build_main_state(
    support_dir: String,
    cache_dir: String,
    config: Config,
    listener: Option<Arc<dyn AcceptedFixesListener>>,
    remote: Option<Arc<dyn RemotePointLog>>,
) -> Result<MainState> {
    if let Err(e) = logs::init(&cache_dir) {
        eprintln!("failed to init logging: {e:#}");
    }
    let storage = Arc::new(Storage::init(support_dir, cache_dir)?);
    let mut recorder = TrackRecorder::new(storage.clone(), config.filter.clone());
    if let Some(listener) = listener {
        recorder = recorder.with_listener(listener);
    }
    if let Some(remote) = remote {
        recorder = recorder.with_remote(remote);
    }
    let provider = HttpDirectionsProvider::new(config.provider.clone())?;
    let route_engine = RouteEngine::new(storage.clone(), provider, config.route.clone());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("daytrack-worker")
        .build()?;
    info!("initialized");
    Ok(MainState {
        storage,
        recorder,
        route_engine,
        runtime,
    })
}

/// `listener` is told how many fixes each batch accepted. `remote` gets a
/// copy of every accepted fix.
pub fn init(
    support_dir: String,
    cache_dir: String,
    config: Config,
    listener: Option<Arc<dyn AcceptedFixesListener>>,
    remote: Option<Arc<dyn RemotePointLog>>,
) -> Result<()> {
    if MAIN_STATE.get().is_some() {
        warn!("`init` is called multiple times");
        return Ok(());
    }
    let state = build_main_state(support_dir, cache_dir, config, listener, remote)?;
    if MAIN_STATE.set(state).is_err() {
        warn!("`init` is called multiple times");
    }
    Ok(())
}

fn get() -> Result<&'static MainState> {
    MAIN_STATE
        .get()
        .ok_or_else(|| anyhow!("main state is not initialized"))
}

fn route_key(user_id: String, date: NaiveDate) -> RouteKey {
    RouteKey::new(user_id, DayBucket::of_date(date))
}

/// Returns how many fixes of the batch were accepted.
pub fn on_location_update(user_id: String, raw_data_list: Vec<RawData>) -> Result<usize> {
    let accepted = get()?.recorder.on_location_update(&user_id, raw_data_list)?;
    Ok(accepted.len())
}

pub fn days_with_points(user_id: String) -> Result<Vec<NaiveDate>> {
    Ok(get()?
        .storage
        .days_with_points(&user_id)?
        .into_iter()
        .map(|day| day.date())
        .collect())
}

pub fn get_raw_points(user_id: String, date: NaiveDate) -> Result<Route, RouteError> {
    let state = get().map_err(RouteError::persistence)?;
    state.route_engine.get_raw_points(&route_key(user_id, date))
}

/// Blocks until the route is available. `listener` gets progress updates
/// from a worker thread in the meantime.
pub fn get_route(
    user_id: String,
    date: NaiveDate,
    listener: Option<Arc<dyn RouteListener>>,
) -> Result<RouteOutcome, RouteError> {
    let state = get().map_err(RouteError::persistence)?;
    state.runtime.block_on(
        state
            .route_engine
            .get_route(route_key(user_id, date), listener),
    )
}

pub fn recalculate_route(
    user_id: String,
    date: NaiveDate,
    listener: Option<Arc<dyn RouteListener>>,
) -> Result<RouteOutcome, RouteError> {
    let state = get().map_err(RouteError::persistence)?;
    state.runtime.block_on(
        state
            .route_engine
            .recalculate_route(route_key(user_id, date), listener),
    )
}

pub fn clear_cached_route(user_id: String, date: NaiveDate) -> Result<bool, RouteError> {
    let state = get().map_err(RouteError::persistence)?;
    state
        .route_engine
        .clear_cached_route(&route_key(user_id, date))
}

pub fn list_all_raw_data() -> Result<Vec<storage::RawDataFile>> {
    get()?.storage.list_all_raw_data()
}

pub fn get_raw_data_mode() -> Result<bool> {
    Ok(get()?.storage.get_raw_data_mode())
}

pub fn toggle_raw_data_mode(enable: bool) -> Result<()> {
    get()?.storage.toggle_raw_data_mode(enable)
}

pub fn directions_quota_used() -> Result<u32> {
    get()?.storage.directions_quota_used()
}

/// Called by the daily maintenance job.
pub fn reset_directions_quota() -> Result<()> {
    get()?.storage.reset_directions_quota()
}

pub fn set_unlimited(unlimited: bool) -> Result<()> {
    get()?.storage.set_unlimited(unlimited)
}

pub fn flush() -> Result<()> {
    get()?.storage.flush()
}
