//! Bulk keyword import from CSV and spreadsheet uploads

pub mod keyword_importer;

pub use keyword_importer::{ImportFileKind, ImportReport, KeywordImporter, KeywordSink};
