use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::FilterConfig;
use crate::gps_processor::{GpsProcessor, RawData, RecordedPoint};
use crate::storage::Storage;
use crate::utils::DayBucket;

/// The remote copy of the point log.
pub trait RemotePointLog: Send + Sync {
    fn submit(&self, user_id: &str, day: DayBucket, point: &RecordedPoint) -> Result<()>;
}

/// Told how many fixes of a batch made it into the point log. Never called
/// for a batch where nothing was accepted.
pub trait AcceptedFixesListener: Send + Sync {
    fn on_fixes_accepted(&self, user_id: &str, count: usize);
}

pub struct TrackRecorder {
    storage: Arc<Storage>,
    config: FilterConfig,
    // one baseline per user; a batch holds its user's lock from start to end
    processors: Mutex<HashMap<String, Arc<Mutex<GpsProcessor>>>>,
    remote: Option<Arc<dyn RemotePointLog>>,
    listener: Option<Arc<dyn AcceptedFixesListener>>,
}

impl TrackRecorder {
    pub fn new(storage: Arc<Storage>, config: FilterConfig) -> Self {
        TrackRecorder {
            storage,
            config,
            processors: Mutex::new(HashMap::new()),
            remote: None,
            listener: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemotePointLog>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn AcceptedFixesListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    fn processor_for(&self, user_id: &str) -> Result<Arc<Mutex<GpsProcessor>>> {
        let mut processors = self
            .processors
            .lock()
            .map_err(|_| anyhow!("processor map lock poisoned"))?;
        if let Some(processor) = processors.get(user_id) {
            return Ok(processor.clone());
        }
        // keep chaining distances from where the last session stopped
        let baseline = self
            .storage
            .get_latest_recorded_point(user_id)?
            .map(|p| p.point);
        debug!(
            "[recorder] new baseline for user {}: {:?}",
            user_id, baseline
        );
        let processor = Arc::new(Mutex::new(GpsProcessor::with_baseline(
            self.config.clone(),
            baseline,
        )));
        processors.insert(user_id.to_string(), processor.clone());
        Ok(processor)
    }

    /// Filters a batch of fixes of one user and persists the accepted ones.
    /// Returns the accepted points in the order they were recorded.
    pub fn on_location_update(
        &self,
        user_id: &str,
        mut raw_data_list: Vec<RawData>,
    ) -> Result<Vec<RecordedPoint>> {
        let processor = self.processor_for(user_id)?;
        // we need handle a batch in one go so we hold the lock for the whole time
        let mut processor = processor
            .lock()
            .map_err(|_| anyhow!("processor lock poisoned"))?;
        let baseline_before = processor.last_accepted().cloned();

        // batches are not always delivered in order
        raw_data_list.sort_by_key(|raw_data| raw_data.timestamp_ms);
        let mut accepted = Vec::new();
        for raw_data in &raw_data_list {
            let decision = processor.preprocess(raw_data);
            self.storage.record_raw_data(user_id, raw_data, decision);
            if decision.is_accepted() {
                accepted.push(RecordedPoint::of_accepted(raw_data, decision.distance_m()));
            }
        }
        if accepted.is_empty() {
            return Ok(accepted);
        }

        if let Err(e) = self.storage.append_recorded_points(user_id, &accepted) {
            // nothing of this batch is in the log, so it must not be the baseline either
            processor.reset_baseline(baseline_before);
            return Err(e);
        }
        drop(processor);

        if let Some(remote) = &self.remote {
            for point in &accepted {
                let result = DayBucket::of_timestamp_ms(point.timestamp_ms)
                    .ok_or_else(|| anyhow!("invalid timestamp: {}", point.timestamp_ms))
                    .and_then(|day| remote.submit(user_id, day, point));
                if let Err(e) = result {
                    warn!("[recorder] failed to submit point to remote log: {}", e);
                }
            }
        }
        info!(
            "[recorder] user {}: {}/{} fixes accepted",
            user_id,
            accepted.len(),
            raw_data_list.len()
        );
        if let Some(listener) = &self.listener {
            listener.on_fixes_accepted(user_id, accepted.len());
        }
        Ok(accepted)
    }
}
