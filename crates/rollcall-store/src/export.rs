//! CSV and JSON rendering of the roster and the attendance log.

use crate::ledger::AttendanceEntry;
use rollcall_core::StudentRecord;
use serde::Serialize;
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format {other:?} (expected csv or json)")),
        }
    }
}

#[derive(Debug, Serialize)]
struct AttendanceRow<'a> {
    roll: &'a str,
    name: &'a str,
    status: &'a str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct StudentRow<'a> {
    roll: &'a str,
    name: &'a str,
    image_path: String,
    registered_at: &'a str,
}

pub fn write_attendance<W: Write>(
    entries: &[AttendanceEntry],
    format: ExportFormat,
    out: W,
) -> Result<(), ExportError> {
    let rows = entries.iter().map(|e| AttendanceRow {
        roll: &e.roll,
        name: &e.name,
        status: &e.status,
        timestamp: e.timestamp.to_rfc3339(),
    });
    write_rows(rows, format, out)
}

pub fn write_students<W: Write>(
    students: &[StudentRecord],
    format: ExportFormat,
    out: W,
) -> Result<(), ExportError> {
    let rows = students.iter().map(|s| StudentRow {
        roll: &s.identity.roll,
        name: &s.identity.name,
        image_path: s.image_path.display().to_string(),
        registered_at: &s.registered_at,
    });
    write_rows(rows, format, out)
}

fn write_rows<T, I, W>(rows: I, format: ExportFormat, mut out: W) -> Result<(), ExportError>
where
    T: Serialize,
    I: Iterator<Item = T>,
    W: Write,
{
    match format {
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        ExportFormat::Json => {
            let rows: Vec<T> = rows.collect();
            serde_json::to_writer_pretty(&mut out, &rows)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use rollcall_core::{Embedding, Identity};
    use std::path::PathBuf;

    fn entry(id: i64, roll: &str, name: &str, ts: &str) -> AttendanceEntry {
        AttendanceEntry {
            id,
            roll: roll.into(),
            name: name.into(),
            status: "present".into(),
            timestamp: DateTime::<FixedOffset>::parse_from_rfc3339(ts).unwrap(),
        }
    }

    #[test]
    fn test_attendance_csv_has_header_and_rows() {
        let entries = vec![
            entry(1, "101", "Alice", "2026-10-16T09:00:00+05:30"),
            entry(2, "102", "Bob, Jr.", "2026-10-16T09:05:00+05:30"),
        ];
        let mut buf = Vec::new();
        write_attendance(&entries, ExportFormat::Csv, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "roll,name,status,timestamp");
        assert_eq!(lines[1], "101,Alice,present,2026-10-16T09:00:00+05:30");
        assert_eq!(lines[2], "102,\"Bob, Jr.\",present,2026-10-16T09:05:00+05:30");
    }

    #[test]
    fn test_attendance_json_is_array() {
        let entries = vec![entry(1, "101", "Alice", "2026-10-16T09:00:00Z")];
        let mut buf = Vec::new();
        write_attendance(&entries, ExportFormat::Json, &mut buf).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value[0]["roll"], "101");
        assert_eq!(value[0]["timestamp"], "2026-10-16T09:00:00+00:00");
    }

    #[test]
    fn test_empty_log_json() {
        let mut buf = Vec::new();
        write_attendance(&[], ExportFormat::Json, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().trim(), "[]");
    }

    #[test]
    fn test_students_csv() {
        let students = vec![StudentRecord {
            id: "x".into(),
            identity: Identity::new("101", "Alice").unwrap(),
            embedding: Embedding::new(vec![1.0, 0.0]),
            image_path: PathBuf::from("/data/images/101.png"),
            registered_at: "2026-10-16T08:00:00+05:30".into(),
        }];
        let mut buf = Vec::new();
        write_students(&students, ExportFormat::Csv, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("roll,name,image_path,registered_at\n"));
        assert!(text.contains("101,Alice,/data/images/101.png,"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
