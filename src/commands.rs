use crate::config::ExtractionConfig;
use crate::db::{Db, RecordFilter};
use crate::error::Result;
use crate::extraction;
use crate::models::{BatchConversionResult, ScanHistoryEntry, ScanStatus, StoredRecord};
use crate::services::coordinate_validator;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// What happened to one scanned or imported document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub scan_id: i64,
    pub status: ScanStatus,
    pub inserted_ids: Vec<i64>,
    pub result: BatchConversionResult,
}

/// Dry run: validate extraction JSON without touching storage.
pub fn validate_extraction(json_text: &str) -> Result<BatchConversionResult> {
    let response: Value = serde_json::from_str(json_text)?;
    Ok(coordinate_validator::convert_ai_response_to_sql(&response))
}

/// Validate an extraction response, record it in the scan history and store its
/// accepted rows (with their format warnings).
pub fn import_response(db: &Db, source: &str, response: &Value) -> Result<ScanOutcome> {
    let result = coordinate_validator::convert_ai_response_to_sql(response);
    let phase = response.get("phase").and_then(Value::as_str);

    let (scan_id, inserted_ids) = db.import_batch(source, phase, &result)?;
    let status = ScanStatus::from_batch(&result);

    if result.errors.is_empty() {
        info!(
            source,
            scan_id,
            saved = inserted_ids.len(),
            flagged = result.warnings.len(),
            "route sheet saved"
        );
    } else {
        warn!(
            source,
            scan_id,
            saved = inserted_ids.len(),
            rejected = result.errors.len(),
            "route sheet saved with rejected rows"
        );
    }

    Ok(ScanOutcome {
        scan_id,
        status,
        inserted_ids,
        result,
    })
}

pub fn import_extraction(db: &Db, source: &str, json_text: &str) -> Result<ScanOutcome> {
    let response: Value = serde_json::from_str(json_text)?;
    import_response(db, source, &response)
}

/// Full pipeline for one document: extraction service, validation, storage.
pub fn scan_route_sheet(db: &Db, config: &ExtractionConfig, file_path: &Path) -> Result<ScanOutcome> {
    let response = extraction::extract_route_sheet(file_path, config)?;
    import_response(db, &source_name(file_path), &response)
}

/// File name recorded as the scan source; empty when the path has none.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string()
}

pub fn list_records(db: &Db, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
    db.list_records(filter)
}

pub fn update_record_field(db: &Db, id: i64, column: &str, value: &str) -> Result<StoredRecord> {
    let record = db.update_field(id, column, Some(value))?;
    info!(id, column, "record field updated");
    Ok(record)
}

pub fn delete_record(db: &Db, id: i64) -> Result<()> {
    db.delete_record(id)?;
    info!(id, "record deleted");
    Ok(())
}

pub fn get_history(db: &Db, limit: usize) -> Result<Vec<ScanHistoryEntry>> {
    db.list_scans(limit)
}
