//! Attendance ledger: append-only log with a configurable dedup window.

use crate::db::Database;
use chrono::{DateTime, FixedOffset, NaiveDate};
use rollcall_core::Identity;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DAY_FORMAT: &str = "%Y-%m-%d";
pub const STATUS_PRESENT: &str = "present";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("stored timestamp {value:?} is invalid: {source}")]
    BadTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// How repeated matches of the same roll are suppressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// One entry per roll per calendar day.
    #[default]
    Daily,
    /// One entry per roll, ever.
    Ever,
    /// No suppression.
    Off,
}

impl std::str::FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "ever" => Ok(Self::Ever),
            "off" | "none" => Ok(Self::Off),
            other => Err(format!("unknown dedup policy {other:?} (expected daily, ever or off)")),
        }
    }
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEntry {
    pub id: i64,
    pub roll: String,
    pub name: String,
    pub status: String,
    pub timestamp: DateTime<FixedOffset>,
}

impl AttendanceEntry {
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceEntry),
    /// Suppressed by the dedup policy; nothing was written.
    AlreadyRecordedToday,
}

/// Inclusive range of calendar days; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn day(day: NaiveDate) -> Self {
        Self {
            from: Some(day),
            to: Some(day),
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }
}

pub struct Ledger<'db> {
    db: &'db Database,
    policy: DedupPolicy,
}

impl<'db> Ledger<'db> {
    pub fn new(db: &'db Database, policy: DedupPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Append an entry unless the dedup policy suppresses it.
    ///
    /// The calendar day is taken in the timestamp's own offset. The check and
    /// the insert share one write transaction, and `Recorded` is only returned
    /// after the commit.
    pub fn record(
        &self,
        identity: &Identity,
        at: DateTime<FixedOffset>,
    ) -> Result<RecordOutcome, LedgerError> {
        let day = at.date_naive().format(DAY_FORMAT).to_string();
        let txn = self.db.write_txn()?;

        let seen: i64 = match self.policy {
            DedupPolicy::Daily => txn.query_row(
                "SELECT COUNT(*) FROM attendance WHERE roll = ?1 AND day = ?2",
                params![identity.roll, day],
                |r| r.get(0),
            )?,
            DedupPolicy::Ever => txn.query_row(
                "SELECT COUNT(*) FROM attendance WHERE roll = ?1",
                params![identity.roll],
                |r| r.get(0),
            )?,
            DedupPolicy::Off => 0,
        };

        if seen > 0 {
            tracing::debug!(
                roll = %identity.roll,
                %day,
                policy = ?self.policy,
                "attendance already recorded"
            );
            return Ok(RecordOutcome::AlreadyRecordedToday);
        }

        txn.execute(
            "INSERT INTO attendance (roll, name, status, day, recorded_at, recorded_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.roll,
                identity.name,
                STATUS_PRESENT,
                day,
                at.to_rfc3339(),
                at.timestamp_millis(),
            ],
        )?;
        let id = txn.last_insert_rowid();
        txn.commit()?;

        tracing::info!(roll = %identity.roll, name = %identity.name, %day, "attendance recorded");
        Ok(RecordOutcome::Recorded(AttendanceEntry {
            id,
            roll: identity.roll.clone(),
            name: identity.name.clone(),
            status: STATUS_PRESENT.to_string(),
            timestamp: at,
        }))
    }

    /// Entries within `range`, oldest first (ties by insertion order).
    pub fn query(&self, range: DateRange) -> Result<Vec<AttendanceEntry>, LedgerError> {
        let from = range.from.map(|d| d.format(DAY_FORMAT).to_string());
        let to = range.to.map(|d| d.format(DAY_FORMAT).to_string());

        let mut stmt = self.db.conn().prepare(
            "SELECT id, roll, name, status, recorded_at FROM attendance
             WHERE (?1 IS NULL OR day >= ?1) AND (?2 IS NULL OR day <= ?2)
             ORDER BY recorded_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![from, to], raw_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    pub fn entries_for_day(&self, day: NaiveDate) -> Result<Vec<AttendanceEntry>, LedgerError> {
        self.query(DateRange::day(day))
    }

    pub fn count(&self) -> Result<usize, LedgerError> {
        let n: i64 = self
            .db
            .conn()
            .query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

struct RawEntry {
    id: i64,
    roll: String,
    name: String,
    status: String,
    recorded_at: String,
}

fn raw_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        roll: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        recorded_at: row.get(4)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> Result<AttendanceEntry, LedgerError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.recorded_at).map_err(|source| {
            LedgerError::BadTimestamp {
                value: self.recorded_at.clone(),
                source,
            }
        })?;
        Ok(AttendanceEntry {
            id: self.id,
            roll: self.roll,
            name: self.name,
            status: self.status,
            timestamp,
        })
    }
}
