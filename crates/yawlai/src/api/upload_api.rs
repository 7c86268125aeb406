//! Bulk keyword upload. The request body is the raw file; its type comes
//! from `?kind=` or, failing that, the extension of `?filename=`.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::{ApiError, ApiResult};
use crate::import::{ImportFileKind, ImportReport, KeywordImporter};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub kind: Option<String>,
    pub filename: Option<String>,
}

impl UploadParams {
    fn file_kind(&self) -> Result<ImportFileKind, ApiError> {
        if let Some(kind) = &self.kind {
            return kind.parse().map_err(|e: anyhow::Error| ApiError::bad_request(e.to_string()));
        }
        self.filename
            .as_deref()
            .and_then(ImportFileKind::from_filename)
            .ok_or_else(|| ApiError::bad_request("Specify ?kind=csv|xlsx or a filename with a .csv, .xlsx or .xls extension"))
    }
}

pub async fn upload_keywords(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> ApiResult<Json<ImportReport>> {
    let kind = params.file_kind()?;
    if body.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }
    info!(
        "Importing {} bytes of {:?} keywords{}",
        body.len(),
        kind,
        params.filename.as_deref().map(|f| format!(" from {}", f)).unwrap_or_default()
    );

    let database = state.database.clone();
    let batch_size = state.config.import_batch_size;
    let report = tokio::task::spawn_blocking(move || {
        KeywordImporter::new(&database.keywords)
            .with_batch_size(batch_size)
            .import_keywords(&body, kind)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Import task failed: {}", e)))?
    .map_err(|e| ApiError::bad_request(format!("Could not read uploaded file: {:#}", e)))?;

    if report.inserted > 0 {
        state.keyword_cache.clear();
        state.counters.add_keywords_imported(report.inserted);
    }
    Ok(Json(report))
}
