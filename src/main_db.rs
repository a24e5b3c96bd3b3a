use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::cmp::Ordering;
use std::error::Error;
use std::path::Path;
use std::str::FromStr;
use strum_macros::EnumIter;

use crate::gps_processor::{Point, RecordedPoint};
use crate::utils::{self, DayBucket};

/* The main database. It holds everything that cannot be recomputed:

`recorded_point` is the point log, one row per accepted fix, partitioned by
user and UTC day. Rows are never updated.

`setting` holds small device-local values, including the directions quota
counter.
*/

#[allow(clippy::type_complexity)]
fn open_db_and_run_migration(
    support_dir: &str,
    file_name: &str,
    migrations: &[&dyn Fn(&Transaction) -> Result<()>],
) -> Result<Connection> {
    debug!("open and run migration for {}", file_name);
    let mut conn = Connection::open(Path::new(support_dir).join(file_name))?;
    let tx = conn.transaction()?;

    let version = utils::db::init_metadata_and_get_version(&tx)? as usize;
    let target_version = migrations.len();
    debug!(
        "current version = {}, target_version = {}",
        version, target_version
    );
    match version.cmp(&target_version) {
        Ordering::Equal => (),
        Ordering::Less => {
            for (i, f) in migrations.iter().enumerate().skip(version) {
                info!("running migration for version: {}", i + 1);
                f(&tx)?;
            }
            utils::db::set_version_in_metadata(&tx, target_version as i32)?;
        }
        Ordering::Greater => {
            bail!(
                "version too high: current version = {}, target_version = {}",
                version,
                target_version
            );
        }
    }
    tx.commit()?;
    Ok(conn)
}

pub struct Txn<'a> {
    db_txn: Transaction<'a>,
}

impl Txn<'_> {
    /// Returns false if a point with the same key already exists, the
    /// existing one is kept as is.
    pub fn append_recorded_point(
        &mut self,
        user_id: &str,
        recorded_point: &RecordedPoint,
    ) -> Result<bool> {
        let day = DayBucket::of_timestamp_ms(recorded_point.timestamp_ms).ok_or_else(|| {
            anyhow!("invalid timestamp: {}", recorded_point.timestamp_ms)
        })?;
        let sql = "INSERT OR IGNORE INTO recorded_point (user_id, day, timestamp_ms, lat, lng, distance, speed, bearing) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);";
        let changes = self.db_txn.prepare_cached(sql)?.execute((
            user_id,
            day.days_since_epoch(),
            recorded_point.timestamp_ms,
            recorded_point.point.latitude,
            recorded_point.point.longitude,
            recorded_point.distance_from_previous,
            recorded_point.speed,
            recorded_point.bearing,
        ))?;
        Ok(changes == 1)
    }

    /// Points of one user on one day, oldest first.
    pub fn get_recorded_points(&self, user_id: &str, day: DayBucket) -> Result<Vec<RecordedPoint>> {
        let mut query = self.db_txn.prepare(
            "SELECT timestamp_ms, lat, lng, distance, speed, bearing FROM recorded_point WHERE user_id = ?1 AND day = ?2 ORDER BY timestamp_ms ASC;",
        )?;
        let results = query.query_map((user_id, day.days_since_epoch()), |row| {
            Ok(RecordedPoint {
                timestamp_ms: row.get(0)?,
                point: Point::new(row.get(1)?, row.get(2)?),
                distance_from_previous: row.get(3)?,
                speed: row.get(4)?,
                bearing: row.get(5)?,
            })
        })?;
        let mut points = Vec::new();
        for point in results {
            points.push(point?);
        }
        Ok(points)
    }

    pub fn get_latest_recorded_point(&self, user_id: &str) -> Result<Option<RecordedPoint>> {
        let mut query = self.db_txn.prepare(
            "SELECT timestamp_ms, lat, lng, distance, speed, bearing FROM recorded_point WHERE user_id = ?1 ORDER BY timestamp_ms DESC LIMIT 1;",
        )?;
        Ok(query
            .query_row((user_id,), |row| {
                Ok(RecordedPoint {
                    timestamp_ms: row.get(0)?,
                    point: Point::new(row.get(1)?, row.get(2)?),
                    distance_from_previous: row.get(3)?,
                    speed: row.get(4)?,
                    bearing: row.get(5)?,
                })
            })
            .optional()?)
    }

    pub fn days_with_points(&self, user_id: &str) -> Result<Vec<DayBucket>> {
        let mut query = self
            .db_txn
            .prepare("SELECT DISTINCT day FROM recorded_point WHERE user_id = ?1 ORDER BY day;")?;
        let mut days = Vec::new();
        for row in query.query_map((user_id,), |row| row.get::<_, i32>(0))? {
            let day = row?;
            days.push(
                DayBucket::of_days_since_epoch(day)
                    .ok_or_else(|| anyhow!("Invalid DB state, day out of range: {}", day))?,
            );
        }
        Ok(days)
    }
}

pub struct MainDb {
    conn: Connection,
}

impl MainDb {
    pub fn open(support_dir: &str) -> Result<MainDb> {
        let conn = open_db_and_run_migration(
            support_dir,
            "main.db",
            &[&|tx| {
                let sql = "
                CREATE TABLE recorded_point (
                    user_id      TEXT    NOT NULL,
                    day          INTEGER NOT NULL, -- days since epoch (UTC)
                    timestamp_ms INTEGER NOT NULL,
                    lat          REAL    NOT NULL,
                    lng          REAL    NOT NULL,
                    distance     REAL    NOT NULL,
                    speed        REAL,
                    bearing      REAL,
                    PRIMARY KEY (user_id, day, timestamp_ms)
                );
                CREATE INDEX recorded_point_latest_index ON recorded_point (
                    user_id, timestamp_ms DESC
                );
                CREATE TABLE setting (
                    key               TEXT    PRIMARY KEY
                                              NOT NULL
                                              UNIQUE,
                    value             TEXT
                );
                ";
                for s in sql_split::split(sql) {
                    tx.execute(&s, ())?;
                }
                Ok(())
            }],
        )?;
        Ok(MainDb { conn })
    }

    pub fn with_txn<F, O>(&mut self, f: F) -> Result<O>
    where
        F: FnOnce(&mut Txn) -> Result<O>,
    {
        let mut txn = Txn {
            db_txn: self.conn.transaction()?,
        };
        let output = f(&mut txn)?;
        txn.db_txn.commit()?;
        Ok(output)
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.cache_flush()?;
        Ok(())
    }

    pub fn get_setting<T: FromStr>(&mut self, setting: Setting) -> Result<Option<T>>
    where
        <T as FromStr>::Err: Error + Send + Sync + 'static,
    {
        let mut query = self
            .conn
            .prepare("SELECT value FROM setting WHERE key = ?1;")?;
        let result: Option<String> = query
            .query_row([setting.to_db_key()], |row| row.get(0))
            .optional()?;
        match result {
            None => Ok(None),
            Some(s) => {
                let v = FromStr::from_str(&s)?;
                Ok(Some(v))
            }
        }
    }

    pub fn get_setting_with_default<T: FromStr>(&mut self, setting: Setting, default: T) -> T
    where
        <T as FromStr>::Err: Error + Send + Sync + 'static,
    {
        match self.get_setting(setting) {
            Ok(v) => v,
            Err(error) => {
                warn!(
                    "[main_db.get_setting_with_default] setting:{:?}, error:{}",
                    setting, error
                );
                None
            }
        }
        .unwrap_or(default)
    }

    pub fn set_setting<T: ToString>(&mut self, setting: Setting, value: T) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO setting (key, value) VALUES (?1, ?2);";
        self.conn
            .execute(sql, (setting.to_db_key(), value.to_string()))?;
        Ok(())
    }

    /// Adds one to an integer setting (missing counts as 0) and returns the
    /// new value.
    pub fn increment_counter(&mut self, setting: Setting) -> Result<u32> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO setting (key, value) VALUES (?1, '1') ON CONFLICT(key) DO UPDATE SET value = CAST(value AS INTEGER) + 1;",
            (setting.to_db_key(),),
        )?;
        let value: String = tx.query_row(
            "SELECT value FROM setting WHERE key = ?1;",
            (setting.to_db_key(),),
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(value.parse()?)
    }
}

#[derive(Debug, Clone, Copy, EnumIter, PartialEq, Eq)]
pub enum Setting {
    RawDataMode,
    /// Directions requests issued today. Reset by the daily maintenance job.
    DirectionsQuotaUsed,
    /// License derived, disables the quota entirely.
    UnlimitedKey,
}

impl Setting {
    fn to_db_key(self) -> &'static str {
        match self {
            Self::RawDataMode => "RAW_DATA_MODE",
            Self::DirectionsQuotaUsed => "DIRECTIONS_QUOTA_USED",
            Self::UnlimitedKey => "UNLIMITED_KEY",
        }
    }
}
