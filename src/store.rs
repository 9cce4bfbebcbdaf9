//! SQLite-backed rate store.
//!
//! Rates are append-only: reconciliation inserts a new row for every accepted
//! observation and never updates an existing one. Readers see the latest
//! version of each rate date no newer than an import bound, so a run that is
//! still writing stays invisible until its completion marker lands.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::Result;
use crate::models::rate::{CurrencyRate, EventKind, RateChange};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS currency_rates (
    id            INTEGER PRIMARY KEY,
    currency_code TEXT NOT NULL,
    rate_date     TEXT NOT NULL,
    rate          REAL NOT NULL,
    import_date   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_currency_rates_code_date
    ON currency_rates (currency_code, rate_date);

CREATE TABLE IF NOT EXISTS import_runs (
    id          INTEGER PRIMARY KEY,
    import_date TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id            INTEGER PRIMARY KEY,
    kind          TEXT NOT NULL,
    event_date    TEXT NOT NULL,
    currency_code TEXT,
    rate_date     TEXT,
    previous_rate REAL,
    new_rate      REAL
);
CREATE INDEX IF NOT EXISTS idx_events_kind_date ON events (kind, event_date);

CREATE TABLE IF NOT EXISTS historical_files (
    url         TEXT PRIMARY KEY,
    hash        TEXT NOT NULL,
    import_date TEXT NOT NULL
);
";

// Optional bounds for a rate query. `as_of` falls back to the last completed
// import run when not given.
#[derive(Debug, Clone, Default)]
pub struct RateQuery {
    pub as_of: Option<NaiveDateTime>,
    pub imported_after: Option<NaiveDateTime>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// Registry row for a processed historical file.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalFile {
    pub hash: String,
    pub import_date: NaiveDateTime,
}

pub struct RateStore {
    conn: Mutex<Connection>,
}

impl RateStore {
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self> {
        debug!("Opening the rate store at {}", path);
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Latest version of each rate date for a currency, ascending by rate date.
    //
    // Rows imported after the `as_of` bound (the last completed run when the
    // caller gives none) do not exist for this query; with no completed run
    // and no explicit bound nothing is visible at all. `imported_after` is
    // exclusive, the rate-date bounds are inclusive.
    pub fn currency_rates(
        &self,
        currency_code: &str,
        query: &RateQuery,
    ) -> Result<Vec<CurrencyRate>> {
        let as_of = match query.as_of {
            Some(bound) => bound,
            None => match self.last_import_run()? {
                Some(marker) => marker,
                None => return Ok(Vec::new()),
            },
        };

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT currency_code, rate_date, MAX(import_date) AS import_date, rate
             FROM currency_rates
             WHERE currency_code = ?1
               AND import_date <= ?2
               AND (?3 IS NULL OR import_date > ?3)
               AND (?4 IS NULL OR rate_date >= ?4)
               AND (?5 IS NULL OR rate_date <= ?5)
             GROUP BY rate_date
             ORDER BY rate_date",
        )?;

        let rows = stmt.query_map(
            params![
                currency_code,
                as_of,
                query.imported_after,
                query.start_date,
                query.end_date
            ],
            |row| {
                Ok(CurrencyRate {
                    currency_code: row.get(0)?,
                    rate_date: row.get(1)?,
                    import_date: row.get(2)?,
                    rate: row.get(3)?,
                })
            },
        )?;

        let mut rates = Vec::new();
        for row in rows {
            rates.push(row?);
        }

        Ok(rates)
    }

    // True when this exact (currency, rate date, rate) triple is already
    // stored, at six-decimal precision.
    pub fn rate_exists(&self, currency_code: &str, rate_date: NaiveDate, rate: f64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists = conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM currency_rates
                 WHERE currency_code = ?1 AND rate_date = ?2
                   AND ROUND(rate, 6) = ROUND(?3, 6)
             )",
            params![currency_code, rate_date, rate],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // Latest stored rate for a (currency, rate date) pair, or 0 when none
    // has ever been imported.
    pub fn current_value(&self, currency_code: &str, rate_date: NaiveDate) -> Result<f64> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT rate FROM currency_rates
                 WHERE currency_code = ?1 AND rate_date = ?2
                 ORDER BY import_date DESC, id DESC
                 LIMIT 1",
                params![currency_code, rate_date],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0.0))
    }

    pub fn insert_rate(&self, rate: &CurrencyRate) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO currency_rates (currency_code, rate_date, rate, import_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                rate.currency_code,
                rate.rate_date,
                rate.rate,
                rate.import_date
            ],
        )?;
        Ok(())
    }

    // Completion marker: published once per successful run, with the run's
    // start timestamp.
    pub fn mark_import_run(&self, import_date: NaiveDateTime) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO import_runs (import_date) VALUES (?1)",
            params![import_date],
        )?;
        Ok(())
    }

    pub fn last_import_run(&self) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn.lock().unwrap();
        let marker = conn
            .query_row(
                "SELECT MAX(import_date) FROM import_runs",
                [],
                |row| row.get::<_, Option<NaiveDateTime>>(0),
            )
            .optional()?;
        Ok(marker.flatten())
    }

    pub fn record_event(&self, kind: EventKind, event_date: NaiveDateTime) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (kind, event_date) VALUES (?1, ?2)",
            params![kind.as_str(), event_date],
        )?;
        Ok(())
    }

    pub fn record_rate_update(
        &self,
        kind: EventKind,
        event_date: NaiveDateTime,
        change: &RateChange,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (kind, event_date, currency_code, rate_date, previous_rate, new_rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                kind.as_str(),
                event_date,
                change.currency_code,
                change.rate_date,
                change.previous,
                change.rate
            ],
        )?;
        Ok(())
    }

    pub fn last_event(&self, kind: EventKind) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn.lock().unwrap();
        let event_date = conn
            .query_row(
                "SELECT MAX(event_date) FROM events WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get::<_, Option<NaiveDateTime>>(0),
            )
            .optional()?;
        Ok(event_date.flatten())
    }

    pub fn rate_updated_since(
        &self,
        kind: EventKind,
        currency_code: &str,
        since: NaiveDateTime,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM events
                 WHERE kind = ?1 AND currency_code = ?2 AND event_date >= ?3
             )",
            params![kind.as_str(), currency_code, since],
            |row| row.get(0),
        )?;
        Ok(updated)
    }

    pub fn historical_file(&self, url: &str) -> Result<Option<HistoricalFile>> {
        let conn = self.conn.lock().unwrap();
        let file = conn
            .query_row(
                "SELECT hash, import_date FROM historical_files WHERE url = ?1",
                params![url],
                |row| {
                    Ok(HistoricalFile {
                        hash: row.get(0)?,
                        import_date: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(file)
    }

    pub fn upsert_historical_file(
        &self,
        url: &str,
        hash: &str,
        import_date: NaiveDateTime,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO historical_files (url, hash, import_date)
             VALUES (?1, ?2, ?3)",
            params![url, hash, import_date],
        )?;
        Ok(())
    }
}
