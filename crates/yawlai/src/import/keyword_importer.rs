use std::collections::HashSet;
use std::io::Cursor;
use std::str::FromStr;

use anyhow::Context;
use calamine::{Data, Range, Reader, Xls, Xlsx};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::metrics;
use crate::store::keyword_store::{keyword_key, validate_keyword_text, validate_target_url};
use crate::store::{KeywordStore, NewKeyword};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFileKind {
    Csv,
    Spreadsheet,
}

impl ImportFileKind {
    /// Guess the kind from a file name's extension.
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = std::path::Path::new(name).extension()?.to_str()?;
        ext.parse().ok()
    }
}

impl FromStr for ImportFileKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "text/csv" => Ok(Self::Csv),
            "xlsx" | "xls" | "excel" | "spreadsheet" => Ok(Self::Spreadsheet),
            other => Err(anyhow::anyhow!("Unsupported import file type: {}", other)),
        }
    }
}

/// Outcome of one import. Rows rejected during parsing appear only in `errors`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

/// Destination of imported rows.
pub trait KeywordSink {
    /// [`keyword_key`] of every keyword already stored.
    fn existing_keywords(&self) -> anyhow::Result<HashSet<String>>;
    fn insert_batch(&self, batch: &[NewKeyword]) -> anyhow::Result<usize>;
}

impl KeywordSink for KeywordStore {
    fn existing_keywords(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.existing_keyword_set()?)
    }

    fn insert_batch(&self, batch: &[NewKeyword]) -> anyhow::Result<usize> {
        Ok(KeywordStore::insert_batch(self, batch)?)
    }
}

pub struct KeywordImporter<'a> {
    sink: &'a dyn KeywordSink,
    batch_size: usize,
}

impl<'a> KeywordImporter<'a> {
    pub fn new(sink: &'a dyn KeywordSink) -> Self {
        Self { sink, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Parse, validate, dedupe and insert. Fails only when the file cannot be
    /// read at all or existing keywords cannot be loaded; per-row and
    /// per-batch problems are reported in the result.
    pub fn import_keywords(&self, bytes: &[u8], kind: ImportFileKind) -> anyhow::Result<ImportReport> {
        let rows = parse_rows(bytes, kind)?;
        let (candidates, mut errors) = extract_candidates(&rows);

        let mut seen = self.sink.existing_keywords()?;
        let mut fresh = Vec::new();
        let mut skipped = 0;
        for candidate in candidates {
            if seen.insert(keyword_key(&candidate.keyword)) {
                fresh.push(candidate);
            } else {
                skipped += 1;
            }
        }

        let mut inserted = 0;
        let mut failed = 0;
        for (index, batch) in fresh.chunks(self.batch_size).enumerate() {
            match self.sink.insert_batch(batch) {
                Ok(count) => inserted += count,
                Err(e) => {
                    error!("Keyword import batch {} ({} rows) failed: {}", index + 1, batch.len(), e);
                    errors.push(format!("Batch {} ({} rows) failed: {}", index + 1, batch.len(), e));
                    failed += batch.len();
                }
            }
        }

        metrics::inc_imported_keywords(inserted as u64);
        let report = ImportReport {
            inserted,
            skipped,
            failed,
            total: inserted + skipped + failed,
            errors,
        };
        info!(
            "Keyword import finished: {} inserted, {} skipped, {} failed, {} errors",
            report.inserted,
            report.skipped,
            report.failed,
            report.errors.len()
        );
        Ok(report)
    }
}

/// Split the upload into rows of trimmed cells.
pub fn parse_rows(bytes: &[u8], kind: ImportFileKind) -> anyhow::Result<Vec<Vec<String>>> {
    match kind {
        ImportFileKind::Csv => parse_csv(bytes),
        ImportFileKind::Spreadsheet => parse_spreadsheet(bytes),
    }
}

fn parse_csv(bytes: &[u8]) -> anyhow::Result<Vec<Vec<String>>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.context("Failed to read CSV row")?;
        rows.push(
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        );
    }
    Ok(rows)
}

fn parse_spreadsheet(bytes: &[u8]) -> anyhow::Result<Vec<Vec<String>>> {
    let range = match Xlsx::new(Cursor::new(bytes.to_vec())) {
        Ok(mut workbook) => first_sheet(&mut workbook)?,
        Err(xlsx_err) => {
            let mut workbook: Xls<_> = Xls::new(Cursor::new(bytes.to_vec())).map_err(|_| {
                anyhow::anyhow!("Unrecognized spreadsheet format: {}", xlsx_err)
            })?;
            first_sheet(&mut workbook)?
        }
    };

    Ok(range
        .rows()
        .map(|row| row.iter().map(|cell| cell_to_string(cell).trim().to_string()).collect())
        .collect())
}

fn first_sheet<R>(workbook: &mut R) -> anyhow::Result<Range<Data>>
where
    R: Reader<Cursor<Vec<u8>>>,
{
    workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow::anyhow!("Spreadsheet has no sheets"))?
        .map_err(|e| anyhow::anyhow!("Failed to read first sheet: {:?}", e))
}

/// Render a spreadsheet cell as text. Whole floats lose their fraction so
/// numeric keywords such as `1500` survive.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR:{:?}", e),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

fn parse_active(cell: Option<&String>) -> Option<bool> {
    match cell.map(|c| c.trim().to_lowercase()).as_deref() {
        None | Some("") => Some(true),
        Some("true" | "yes" | "1" | "active") => Some(true),
        Some("false" | "no" | "0" | "inactive") => Some(false),
        Some(_) => None,
    }
}

/// Turn rows into validated candidates. Expected columns: keyword, URL and
/// an optional active flag. Returns the candidates and one message per
/// rejected row.
pub fn extract_candidates(rows: &[Vec<String>]) -> (Vec<NewKeyword>, Vec<String>) {
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let line = index + 1;
        let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or("");

        if index == 0 && cell(0).to_lowercase().contains("keyword") {
            continue;
        }

        let (keyword, url) = (cell(0), cell(1));
        if keyword.is_empty() && url.is_empty() {
            continue;
        }
        if keyword.is_empty() || url.is_empty() {
            warn!("Skipping row {}: missing keyword or URL", line);
            errors.push(format!("Row {}: missing keyword or URL", line));
            continue;
        }
        if let Err(e) = validate_target_url(url) {
            warn!("Skipping row {}: invalid URL '{}' for keyword '{}'", line, url, keyword);
            errors.push(format!("Row {}: invalid URL '{}' for keyword '{}' ({})", line, url, keyword, e));
            continue;
        }
        let keyword = match validate_keyword_text(keyword) {
            Ok(k) => k,
            Err(e) => {
                warn!("Skipping row {}: {}", line, e);
                errors.push(format!("Row {}: {}", line, e));
                continue;
            }
        };
        let Some(active) = parse_active(row.get(2)) else {
            warn!("Skipping row {}: unrecognized active flag '{}'", line, cell(2));
            errors.push(format!("Row {}: unrecognized active flag '{}'", line, cell(2)));
            continue;
        };

        candidates.push(NewKeyword {
            keyword,
            target_url: url.to_string(),
            active,
        });
    }

    (candidates, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, KeywordError};
    use rust_xlsxwriter::Workbook;
    use std::cell::RefCell;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("CSV".parse::<ImportFileKind>().unwrap(), ImportFileKind::Csv);
        assert_eq!("xlsx".parse::<ImportFileKind>().unwrap(), ImportFileKind::Spreadsheet);
        assert_eq!(ImportFileKind::from_filename("keywords.XLS"), Some(ImportFileKind::Spreadsheet));
        assert_eq!(ImportFileKind::from_filename("keywords.csv"), Some(ImportFileKind::Csv));
        assert_eq!(ImportFileKind::from_filename("keywords.pdf"), None);
        assert_eq!(ImportFileKind::from_filename("keywords"), None);
    }

    #[test]
    fn test_quoted_fields_with_commas() {
        let csv = b"keyword,url\n\"Nike, Inc.\",\"https://nike.com/?a=1,2\"\nTesla , https://tesla.com \n";
        let rows = parse_rows(csv, ImportFileKind::Csv).unwrap();
        assert_eq!(rows[1], vec!["Nike, Inc.", "https://nike.com/?a=1,2"]);
        assert_eq!(rows[2], vec!["Tesla", "https://tesla.com"]);

        let (candidates, errors) = extract_candidates(&rows);
        assert!(errors.is_empty());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].keyword, "Nike, Inc.");
    }

    #[test]
    fn test_header_only_skipped_when_it_mentions_keyword() {
        let rows = vec![
            vec!["Brand".to_string(), "https://brand.example".to_string()],
            vec!["Puma".to_string(), "https://puma.com".to_string()],
        ];
        let (candidates, _) = extract_candidates(&rows);
        assert_eq!(candidates.len(), 2);

        let rows = vec![
            vec!["Keywords".to_string(), "Target URL".to_string()],
            vec!["Puma".to_string(), "https://puma.com".to_string()],
        ];
        let (candidates, _) = extract_candidates(&rows);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_invalid_url_row_is_excluded_from_counts() {
        let db = Database::new_in_memory().unwrap();
        let importer = KeywordImporter::new(&db.keywords);

        let report = importer
            .import_keywords(b"keyword,url\nTesla,not-a-url\n", ImportFileKind::Csv)
            .unwrap();

        assert_eq!(report.inserted, 0);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("invalid URL"));
    }

    #[test]
    fn test_missing_cells_and_bad_flags_rejected() {
        let rows = vec![
            vec!["Nike".to_string()],
            vec!["".to_string(), "https://x.example".to_string()],
            vec!["".to_string(), "".to_string()],
            vec!["Puma".to_string(), "https://puma.com".to_string(), "maybe".to_string()],
            vec!["Adidas".to_string(), "https://adidas.com".to_string(), "no".to_string()],
        ];
        let (candidates, errors) = extract_candidates(&rows);
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].active);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let db = Database::new_in_memory().unwrap();
        let importer = KeywordImporter::new(&db.keywords);
        let csv = b"keyword,url\nNike,https://nike.com\nTesla,https://tesla.com\nnike,https://nike.com/dup\n";

        let first = importer.import_keywords(csv, ImportFileKind::Csv).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.total, 3);

        let second = importer.import_keywords(csv, ImportFileKind::Csv).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(db.keywords.count_keywords().unwrap(), 2);
    }

    #[test]
    fn test_existing_keyword_skipped_case_insensitively() {
        let db = Database::new_in_memory().unwrap();
        db.keywords.create_keyword("TESLA", "https://tesla.com", false).unwrap();

        let report = KeywordImporter::new(&db.keywords)
            .import_keywords(b"tesla,https://tesla.com\n", ImportFileKind::Csv)
            .unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_import_and_create_agree_on_non_ascii_case() {
        let db = Database::new_in_memory().unwrap();
        db.keywords.create_keyword("Ärger", "https://a.example", true).unwrap();

        let report = KeywordImporter::new(&db.keywords)
            .import_keywords("ÄRGER,https://a.example\nÉcole,https://e.example\nécole,https://e.example\n".as_bytes(), ImportFileKind::Csv)
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 2);

        let err = db.keywords.create_keyword("ÉCOLE", "https://e.example", true).unwrap_err();
        assert!(matches!(err, KeywordError::Duplicate(_)));
        assert_eq!(db.keywords.count_keywords().unwrap(), 2);
    }

    /// Accepts batches until `fail_on` and records their sizes.
    struct FlakySink {
        fail_on: usize,
        batches: RefCell<Vec<usize>>,
    }

    impl KeywordSink for FlakySink {
        fn existing_keywords(&self) -> anyhow::Result<HashSet<String>> {
            Ok(HashSet::new())
        }

        fn insert_batch(&self, batch: &[NewKeyword]) -> anyhow::Result<usize> {
            let mut batches = self.batches.borrow_mut();
            batches.push(batch.len());
            if batches.len() == self.fail_on {
                anyhow::bail!("connection reset");
            }
            Ok(batch.len())
        }
    }

    #[test]
    fn test_failed_batch_is_reported_not_retried() {
        let csv: String = (0..250)
            .map(|i| format!("brand{},https://brand{}.example\n", i, i))
            .collect();
        let sink = FlakySink { fail_on: 2, batches: RefCell::new(Vec::new()) };

        let report = KeywordImporter::new(&sink)
            .import_keywords(csv.as_bytes(), ImportFileKind::Csv)
            .unwrap();

        assert_eq!(*sink.batches.borrow(), vec![100, 100, 50]);
        assert_eq!(report.inserted, 150);
        assert_eq!(report.failed, 100);
        assert_eq!(report.total, 250);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_custom_batch_size() {
        let db = Database::new_in_memory().unwrap();
        let csv: String = (0..7).map(|i| format!("k{},https://k{}.example\n", i, i)).collect();
        let report = KeywordImporter::new(&db.keywords)
            .with_batch_size(3)
            .import_keywords(csv.as_bytes(), ImportFileKind::Csv)
            .unwrap();
        assert_eq!(report.inserted, 7);
    }

    #[test]
    fn test_garbage_spreadsheet_is_an_error() {
        let db = Database::new_in_memory().unwrap();
        let result = KeywordImporter::new(&db.keywords)
            .import_keywords(b"definitely not a workbook", ImportFileKind::Spreadsheet);
        assert!(result.is_err());
    }

    /// First sheet holds keywords; a second sheet must be ignored.
    fn keyword_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Keywords").unwrap();
        sheet.write_string(0, 0, "Keyword").unwrap();
        sheet.write_string(0, 1, "Target URL").unwrap();
        sheet.write_string(0, 2, "Active").unwrap();
        sheet.write_string(1, 0, "Nike").unwrap();
        sheet.write_string(1, 1, "https://nike.com").unwrap();
        sheet.write_number(2, 0, 1500.0).unwrap();
        sheet.write_string(2, 1, "https://1500.example").unwrap();
        sheet.write_boolean(2, 2, false).unwrap();
        sheet.write_string(3, 0, "NIKE").unwrap();
        sheet.write_string(3, 1, "https://nike.com/dup").unwrap();
        sheet.write_string(4, 0, "Broken").unwrap();
        sheet.write_string(4, 1, "ftp://broken.example").unwrap();

        let other = workbook.add_worksheet();
        other.write_string(0, 0, "Tesla").unwrap();
        other.write_string(0, 1, "https://tesla.com").unwrap();

        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_spreadsheet_first_sheet_rows() {
        let rows = parse_rows(&keyword_workbook(), ImportFileKind::Spreadsheet).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0][0], "Keyword");
        assert_eq!(rows[2], vec!["1500", "https://1500.example", "false"]);
    }

    #[test]
    fn test_spreadsheet_import() {
        let db = Database::new_in_memory().unwrap();
        let report = KeywordImporter::new(&db.keywords)
            .import_keywords(&keyword_workbook(), ImportFileKind::Spreadsheet)
            .unwrap();

        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.total, 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Row 5"));

        assert!(db.keywords.find_by_keyword("keyword").unwrap().is_none());
        assert!(db.keywords.find_by_keyword("tesla").unwrap().is_none());
        let numeric = db.keywords.find_by_keyword("1500").unwrap().unwrap();
        assert!(!numeric.active);
        assert_eq!(db.keywords.list_active_keywords().unwrap().len(), 1);
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell_to_string(&Data::Float(1500.0)), "1500");
        assert_eq!(cell_to_string(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_to_string(&Data::Int(7)), "7");
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("Nike".into())), "Nike");
    }
}
