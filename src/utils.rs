use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};

// We could just use num days from ce instead of epoch, but ce is quite far
// away and the day number is also part of the db primary key, so a small
// number is nicer to look at.
lazy_static! {
    static ref EPOCH_NUM_OF_DAYS_FROM_CE: i32 = NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap()
        .num_days_from_ce();
}

pub fn date_to_days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - *EPOCH_NUM_OF_DAYS_FROM_CE
}

pub fn date_of_days_since_epoch(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + *EPOCH_NUM_OF_DAYS_FROM_CE)
}

/// A UTC calendar day. Points and routes of a user are partitioned by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayBucket(NaiveDate);

impl DayBucket {
    pub fn of_date(date: NaiveDate) -> Self {
        DayBucket(date)
    }

    /// Truncates a unix timestamp (in ms) to its UTC day.
    pub fn of_timestamp_ms(timestamp_ms: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(timestamp_ms).map(|t| DayBucket(t.date_naive()))
    }

    pub fn of_days_since_epoch(days: i32) -> Option<Self> {
        date_of_days_since_epoch(days).map(DayBucket)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn days_since_epoch(&self) -> i32 {
        date_to_days_since_epoch(self.0)
    }

    pub fn start_timestamp_ms(&self) -> i64 {
        self.0.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
    }
}

impl fmt::Display for DayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod db {
    use anyhow::Result;
    use rusqlite::{OptionalExtension, Transaction};

    pub fn init_metadata_and_get_version(tx: &Transaction) -> Result<i32> {
        let create_db_metadata_sql = "
        CREATE TABLE IF NOT EXISTS `db_metadata` (
        `key`   TEXT NOT NULL,
        `value` TEXT,
        PRIMARY KEY(`key`)
        )";
        tx.execute(create_db_metadata_sql, ())?;
        let version_str: Option<String> = tx
            .query_row(
                "SELECT `value` FROM `db_metadata` WHERE key='version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match version_str {
            None => 0,
            Some(s) => s.parse()?,
        })
    }

    pub fn set_version_in_metadata(tx: &Transaction, version: i32) -> Result<()> {
        tx.execute(
            "INSERT OR REPLACE INTO `db_metadata` (key, value) VALUES (?1, ?2)",
            ("version", version.to_string()),
        )?;
        Ok(())
    }
}
