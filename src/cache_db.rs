use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::cmp::Ordering;
use std::path::Path;

use crate::route::RouteKey;
use crate::utils;

// Everything in here can be recomputed from the point log, at the price of
// directions quota. So it is fine to drop the whole db on a schema change, but
// entries must never be dropped casually.

pub const TARGET_VERSION: i32 = 1;

fn open_db(cache_dir: &str, file_name: &str, sql: &str) -> Result<Connection> {
    debug!("opening cache db for {}", file_name);
    let mut conn = Connection::open(Path::new(cache_dir).join(file_name))?;

    let tx = conn.transaction()?;
    let version = utils::db::init_metadata_and_get_version(&tx)?;
    let target_version = TARGET_VERSION;
    debug!(
        "current version = {}, target_version = {}",
        version, target_version
    );
    match version.cmp(&target_version) {
        Ordering::Equal => (),
        Ordering::Less => {
            tx.execute("DROP TABLE IF EXISTS route_cache;", ())?;
            utils::db::set_version_in_metadata(&tx, target_version)?;
        }
        Ordering::Greater => {
            bail!(
                "version too high: current version = {}, target_version = {}",
                version,
                target_version
            );
        }
    }

    tx.execute(sql, [])?;
    tx.commit()?;
    Ok(conn)
}

pub struct CacheDb {
    conn: Connection,
}

impl CacheDb {
    pub fn open(cache_dir: &str) -> Result<CacheDb> {
        let conn = open_db(
            cache_dir,
            "cache.db",
            "CREATE TABLE IF NOT EXISTS `route_cache` (
                        user_id       TEXT    NOT NULL,
                        day           INTEGER NOT NULL,
                        document      TEXT    NOT NULL,
                        updated_at_ms INTEGER NOT NULL,
                        PRIMARY KEY (user_id, day)
                    );",
        )?;
        Ok(CacheDb { conn })
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.cache_flush()?;
        Ok(())
    }

    pub fn get_route_cache(&self, key: &RouteKey) -> Result<Option<String>> {
        let mut query = self
            .conn
            .prepare("SELECT document FROM `route_cache` WHERE user_id = ?1 AND day = ?2;")?;
        Ok(query
            .query_row((&key.user_id, key.day.days_since_epoch()), |row| row.get(0))
            .optional()?)
    }

    /// Overwrites whatever is cached for `key`.
    pub fn set_route_cache(&self, key: &RouteKey, document: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO `route_cache` (user_id, day, document, updated_at_ms) VALUES (?1, ?2, ?3, ?4);",
            (
                &key.user_id,
                key.day.days_since_epoch(),
                document,
                Utc::now().timestamp_millis(),
            ),
        )?;
        Ok(())
    }

    pub fn delete_route_cache(&self, key: &RouteKey) -> Result<bool> {
        let changes = self.conn.execute(
            "DELETE FROM `route_cache` WHERE user_id = ?1 AND day = ?2;",
            (&key.user_id, key.day.days_since_epoch()),
        )?;
        Ok(changes > 0)
    }

    pub fn clear_route_cache(&self) -> Result<()> {
        self.conn.execute("DELETE FROM route_cache;", [])?;
        Ok(())
    }
}
