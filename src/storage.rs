use anyhow::Result;
use chrono::Utc;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::cache_db::CacheDb;
use crate::gps_processor::{FilterDecision, RawData, RecordedPoint};
use crate::main_db::{MainDb, Setting};
use crate::route::RouteKey;
use crate::utils::DayBucket;

pub struct RawDataFile {
    pub name: String,
    pub path: String,
}

/* Optional and off by default: every fix we receive, accepted or not, with its
   filter decision. It is meant for debugging the filter thresholds. Data goes
   to a simple csv file, a new one every time the recorder is created.
*/
struct RawDataRecorder {
    dir: PathBuf,
    file: Option<File>,
}

impl RawDataRecorder {
    fn init(support_dir: &str) -> Result<RawDataRecorder> {
        let dir = Path::new(support_dir).join("raw_data/");
        std::fs::create_dir_all(&dir)?;
        Ok(RawDataRecorder { dir, file: None })
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(ref mut file) = self.file {
            file.flush()?;
        }
        Ok(())
    }

    fn open_new_file(&self) -> Result<File> {
        let timestamp_sec = Utc::now().timestamp();
        let mut i = 0;
        let filename = loop {
            let filename = self.dir.join(format!("gps-{}-{}.csv", timestamp_sec, i));
            if std::fs::metadata(&filename).is_err() {
                break filename;
            }
            i += 1;
        };
        let mut file = File::create(filename)?;
        file.write_all(
            "user_id,timestamp_ms,latitude,longitude,accuracy,altitude,speed,bearing,decision\n"
                .as_bytes(),
        )?;
        Ok(file)
    }

    fn record(&mut self, user_id: &str, raw_data: &RawData, decision: FilterDecision) -> Result<()> {
        if self.file.is_none() {
            self.file = Some(self.open_new_file()?);
        }
        if let Some(ref mut file) = self.file {
            let optional = |x: Option<String>| x.unwrap_or_default();
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{}",
                user_id,
                raw_data.timestamp_ms,
                raw_data.point.latitude,
                raw_data.point.longitude,
                optional(raw_data.accuracy.map(|x| x.to_string())),
                optional(raw_data.altitude.map(|x| x.to_string())),
                optional(raw_data.speed.map(|x| x.to_string())),
                optional(raw_data.bearing.map(|x| x.to_string())),
                decision.to_int()
            )?;
        }
        Ok(())
    }
}

pub struct Storage {
    support_dir: String,
    main_db: Mutex<MainDb>,
    raw_data_recorder: Mutex<Option<RawDataRecorder>>, // `None` means disabled
    cache_db: Mutex<CacheDb>,
}

impl Storage {
    pub fn init(support_dir: String, cache_dir: String) -> Result<Self> {
        let mut main_db = MainDb::open(&support_dir)?;
        let cache_db = CacheDb::open(&cache_dir)?;
        let raw_data_recorder = if main_db.get_setting_with_default(Setting::RawDataMode, false) {
            Some(RawDataRecorder::init(&support_dir)?)
        } else {
            None
        };
        Ok(Storage {
            support_dir,
            main_db: Mutex::new(main_db),
            raw_data_recorder: Mutex::new(raw_data_recorder),
            cache_db: Mutex::new(cache_db),
        })
    }

    fn main_db(&self) -> Result<std::sync::MutexGuard<'_, MainDb>> {
        self.main_db
            .lock()
            .map_err(|_| anyhow!("main db lock poisoned"))
    }

    fn cache_db(&self) -> Result<std::sync::MutexGuard<'_, CacheDb>> {
        self.cache_db
            .lock()
            .map_err(|_| anyhow!("cache db lock poisoned"))
    }

    fn raw_data_recorder(&self) -> Result<std::sync::MutexGuard<'_, Option<RawDataRecorder>>> {
        self.raw_data_recorder
            .lock()
            .map_err(|_| anyhow!("raw data recorder lock poisoned"))
    }

    pub fn toggle_raw_data_mode(&self, enable: bool) -> Result<()> {
        let mut raw_data_recorder = self.raw_data_recorder()?;
        if enable {
            if raw_data_recorder.is_none() {
                *raw_data_recorder = Some(RawDataRecorder::init(&self.support_dir)?);
                debug!("[storage] raw data mode enabled");
                self.main_db()?.set_setting(Setting::RawDataMode, true)?;
            }
        } else if raw_data_recorder.is_some() {
            debug!("[storage] raw data mode disabled");
            // `drop` should do the right thing and release all resources.
            *raw_data_recorder = None;
            self.main_db()?.set_setting(Setting::RawDataMode, false)?;
        }
        Ok(())
    }

    pub fn get_raw_data_mode(&self) -> bool {
        self.raw_data_recorder
            .lock()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    /// Best effort, only does something in raw data mode.
    pub fn record_raw_data(&self, user_id: &str, raw_data: &RawData, decision: FilterDecision) {
        let result = self.raw_data_recorder().and_then(|mut recorder| match *recorder {
            Some(ref mut x) => x.record(user_id, raw_data, decision),
            None => Ok(()),
        });
        if let Err(e) = result {
            warn!("[storage] failed to record raw data: {}", e);
        }
    }

    pub fn list_all_raw_data(&self) -> Result<Vec<RawDataFile>> {
        let dir = Path::new(&self.support_dir).join("raw_data/");
        let mut result = Vec::new();
        if !dir.exists() {
            return Ok(result);
        }
        for entry in std::fs::read_dir(dir)? {
            let file = entry?;
            let filename = file.file_name().to_string_lossy().into_owned();
            if filename.ends_with(".csv") {
                result.push(RawDataFile {
                    name: filename,
                    path: file.path().to_string_lossy().into_owned(),
                })
            }
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    /// Appends points of one user in a single transaction. Returns how many
    /// were new.
    pub fn append_recorded_points(&self, user_id: &str, points: &[RecordedPoint]) -> Result<usize> {
        self.main_db()?.with_txn(|txn| {
            let mut added = 0;
            for point in points {
                if txn.append_recorded_point(user_id, point)? {
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    pub fn get_recorded_points(&self, key: &RouteKey) -> Result<Vec<RecordedPoint>> {
        self.main_db()?
            .with_txn(|txn| txn.get_recorded_points(&key.user_id, key.day))
    }

    pub fn get_latest_recorded_point(&self, user_id: &str) -> Result<Option<RecordedPoint>> {
        self.main_db()?
            .with_txn(|txn| txn.get_latest_recorded_point(user_id))
    }

    pub fn days_with_points(&self, user_id: &str) -> Result<Vec<DayBucket>> {
        self.main_db()?.with_txn(|txn| txn.days_with_points(user_id))
    }

    pub fn get_cached_route_document(&self, key: &RouteKey) -> Result<Option<String>> {
        self.cache_db()?.get_route_cache(key)
    }

    pub fn set_cached_route_document(&self, key: &RouteKey, document: &str) -> Result<()> {
        self.cache_db()?.set_route_cache(key, document)
    }

    pub fn delete_cached_route_document(&self, key: &RouteKey) -> Result<bool> {
        self.cache_db()?.delete_route_cache(key)
    }

    pub fn directions_quota_used(&self) -> Result<u32> {
        Self::quota_used(&mut *self.main_db()?)
    }

    // an unreadable counter is an error, never "nothing used"
    fn quota_used(main_db: &mut MainDb) -> Result<u32> {
        Ok(main_db
            .get_setting(Setting::DirectionsQuotaUsed)?
            .unwrap_or(0))
    }

    pub fn is_unlimited(&self) -> Result<bool> {
        Ok(self
            .main_db()?
            .get_setting_with_default(Setting::UnlimitedKey, false))
    }

    pub fn set_unlimited(&self, unlimited: bool) -> Result<()> {
        self.main_db()?.set_setting(Setting::UnlimitedKey, unlimited)
    }

    /// The quota is exhausted once more than `daily_limit` calls were made.
    pub fn is_directions_quota_exhausted(&self, daily_limit: u32) -> Result<bool> {
        let mut main_db = self.main_db()?;
        if main_db.get_setting_with_default(Setting::UnlimitedKey, false) {
            return Ok(false);
        }
        Ok(Self::quota_used(&mut main_db)? > daily_limit)
    }

    /// Counts one directions call against the device quota.
    pub fn charge_directions_quota(&self) -> Result<u32> {
        self.main_db()?
            .increment_counter(Setting::DirectionsQuotaUsed)
    }

    /// Checks the quota and charges one call in one step. Returns the new
    /// count, or `None` without charging when the quota is exhausted.
    pub fn try_charge_directions_quota(&self, daily_limit: u32) -> Result<Option<u32>> {
        let mut main_db = self.main_db()?;
        if !main_db.get_setting_with_default(Setting::UnlimitedKey, false)
            && Self::quota_used(&mut main_db)? > daily_limit
        {
            return Ok(None);
        }
        Ok(Some(main_db.increment_counter(Setting::DirectionsQuotaUsed)?))
    }

    pub fn reset_directions_quota(&self) -> Result<()> {
        info!("[storage] resetting directions quota");
        self.main_db()?
            .set_setting(Setting::DirectionsQuotaUsed, 0)
    }

    pub fn flush(&self) -> Result<()> {
        debug!("[storage] flushing");

        self.main_db()?.flush()?;
        self.cache_db()?.flush()?;

        if let Some(ref mut x) = *self.raw_data_recorder()? {
            x.flush()?;
        }

        Ok(())
    }
}
