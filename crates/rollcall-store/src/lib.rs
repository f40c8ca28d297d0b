//! rollcall-store — persistent state.
//!
//! The student registry and the attendance ledger share one SQLite database.
//! Both are thin borrowing views over a [`Database`] handle.

pub mod db;
pub mod export;
pub mod ledger;
pub mod registry;

#[cfg(test)]
mod testing;

pub use db::{Database, StoreError};
pub use export::{write_attendance, write_students, ExportError, ExportFormat};
pub use ledger::{AttendanceEntry, DateRange, DedupPolicy, Ledger, LedgerError, RecordOutcome};
pub use registry::{BulkFailure, BulkReport, Registry, RegistryError};
