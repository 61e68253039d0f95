//! progressbook: folds periodic gradebook spreadsheet exports into a
//! versioned, per-student JSON record store.
//!
//! The crate is a library; the spreadsheet reader and whatever front end
//! drives an import are external. Callers hand [`ingest::Importer`] the
//! already-read sheet data (rows plus the column→date and column→context
//! maps) and a [`store::RecordStore`] to load and persist records through.
//!
//! Processing is a single-pass, idempotent batch transform: re-running the
//! same workbook is a no-op on the second run. Bad columns, bad cells and
//! bad rows are warned about and skipped; only an unreadable store is fatal.

pub mod aggregate;
pub mod columns;
pub mod config;
pub mod curriculum;
pub mod ingest;
pub mod migrate;
pub mod missions;
pub mod model;
pub mod names;
pub mod schema;
pub mod store;
