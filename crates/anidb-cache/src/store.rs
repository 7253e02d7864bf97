//! The durable cache store (C6): identities, fields, and backoff-aware
//! negative records, all behind one SQLite connection (spec.md §4.6).

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::error::CacheError;
use crate::schema::SCHEMA;

/// Negative records are never kept alive longer than this, regardless of
/// how often a lookup keeps failing.
const NEGATIVE_CAP: i64 = 30 * 24 * 60 * 60;
/// Each additional failure extends the backoff window by one hour.
const NEGATIVE_BACKOFF_STEP: i64 = 60 * 60;

pub struct CacheStore {
    conn: Connection,
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl CacheStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Returns the server-assigned `fid` for a content key, if known.
    pub fn fid_for(&self, ed2k: &str, size: u64) -> Result<Option<u32>, CacheError> {
        let fid: Option<i64> = self
            .conn
            .query_row(
                "SELECT fid FROM identity WHERE ed2k = ?1 AND size = ?2",
                params![ed2k, size as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fid.map(|f| f as u32))
    }

    pub fn put_identity(&mut self, ed2k: &str, size: u64, fid: u32) -> Result<(), CacheError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO identity (ed2k, size, fid) VALUES (?1, ?2, ?3)
             ON CONFLICT(ed2k, size) DO UPDATE SET fid = excluded.fid",
            params![ed2k, size as i64, fid],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Reads cached field values for `fid`, lazily evicting any that have
    /// expired. Returns only the fields actually present and unexpired.
    pub fn get_fields(
        &mut self,
        fid: u32,
        field_names: &[&str],
    ) -> Result<HashMap<String, String>, CacheError> {
        let object_key = format!("f{fid}");
        let t = now();
        let mut result = HashMap::new();
        let mut expired = Vec::new();

        for name in field_names {
            let row: Option<(String, Option<i64>)> = self
                .conn
                .query_row(
                    "SELECT value, expires_at FROM field WHERE object_key = ?1 AND field_name = ?2",
                    params![object_key, name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((_value, Some(expires_at))) if expires_at < t => {
                    expired.push(name.to_string());
                }
                Some((value, _)) => {
                    result.insert(name.to_string(), value);
                }
                None => {}
            }
        }

        if !expired.is_empty() {
            let tx = self.conn.transaction()?;
            for name in &expired {
                tx.execute(
                    "DELETE FROM field WHERE object_key = ?1 AND field_name = ?2",
                    params![object_key, name],
                )?;
            }
            tx.commit()?;
        }

        Ok(result)
    }

    pub fn put_fields(
        &mut self,
        fid: u32,
        values: &[(&str, String)],
        ttl_secs: Option<i64>,
    ) -> Result<(), CacheError> {
        let object_key = format!("f{fid}");
        let expires_at = ttl_secs.map(|ttl| now() + ttl);
        let tx = self.conn.transaction()?;
        for (name, value) in values {
            tx.execute(
                "INSERT INTO field (object_key, field_name, value, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(object_key, field_name)
                 DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![object_key, name, value, expires_at],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// True iff the content key is within an active backoff window. Lazily
    /// deletes the record once it has fully expired.
    pub fn is_known_negative(&mut self, ed2k: &str, size: u64) -> Result<bool, CacheError> {
        let t = now();
        let row: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT synthesised_failure_until, expires_at FROM negative
                 WHERE ed2k = ?1 AND size = ?2",
                params![ed2k, size as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(false),
            Some((synth_until, expires_at)) => {
                if t <= synth_until && t <= expires_at {
                    Ok(true)
                } else if t > expires_at {
                    self.conn.execute(
                        "DELETE FROM negative WHERE ed2k = ?1 AND size = ?2",
                        params![ed2k, size as i64],
                    )?;
                    Ok(false)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Records an observed `NO SUCH FILE`, extending the exponential
    /// backoff window (spec.md §4.6).
    pub fn bump_negative(&mut self, ed2k: &str, size: u64) -> Result<(), CacheError> {
        let t = now();
        let tx = self.conn.transaction()?;
        let existing: Option<(i64, i64)> = tx
            .query_row(
                "SELECT failure_count, first_failed_at FROM negative WHERE ed2k = ?1 AND size = ?2",
                params![ed2k, size as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (failure_count, first_failed_at) = match existing {
            Some((count, first)) => (count + 1, first),
            None => (1, t),
        };
        let synthesised_failure_until =
            (first_failed_at + NEGATIVE_CAP).min(t + NEGATIVE_BACKOFF_STEP * failure_count);
        let expires_at = first_failed_at + NEGATIVE_CAP;

        tx.execute(
            "INSERT INTO negative
                (ed2k, size, failure_count, first_failed_at, synthesised_failure_until, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(ed2k, size) DO UPDATE SET
                failure_count = excluded.failure_count,
                synthesised_failure_until = excluded.synthesised_failure_until,
                expires_at = excluded.expires_at",
            params![ed2k, size as i64, failure_count, first_failed_at, synthesised_failure_until, expires_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_meta(&mut self, key: &str) -> Result<Option<String>, CacheError> {
        let t = now();
        let row: Option<(String, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT value, expires_at FROM meta WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((_, Some(expires_at))) if expires_at < t => {
                self.conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    pub fn set_meta(&mut self, key: &str, value: &str, ttl_secs: Option<i64>) -> Result<(), CacheError> {
        let expires_at = ttl_secs.map(|ttl| now() + ttl);
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO meta (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        tx.commit()?;
        Ok(())
    }
}
