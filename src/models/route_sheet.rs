use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Flat SQL column → value record. Blank fields are `Value::Null`.
pub type MappedRecord = serde_json::Map<String, Value>;

/// Integer from a JSON number or numeric string (`2`, `2.0`, `"2"`). Anything else is `None`.
pub fn lenient_int(value: &Value) -> Option<i64> {
    fn whole(f: f64) -> Option<i64> {
        (f.is_finite() && f.fract() == 0.0).then_some(f as i64)
    }
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole)),
        Value::String(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(whole))
        }
        _ => None,
    }
}

/// Float from a JSON number or numeric string. Anything else is `None`.
pub fn lenient_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

// Informational fields never make a row unreadable: a wrong type reads as absent.
fn de_lenient_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(lenient_int(&Value::deserialize(d)?))
}

fn de_lenient_float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(lenient_float(&Value::deserialize(d)?))
}

/// One detected table cell as reported by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(
        default,
        deserialize_with = "de_lenient_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub position: Option<i64>,
    /// Header text read above the cell; `None` when the extractor sent none.
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(
        default,
        deserialize_with = "de_lenient_float",
        skip_serializing_if = "Option::is_none"
    )]
    pub x_read_from: Option<f64>,
}

impl Cell {
    pub fn header_text(&self) -> &str {
        self.header.as_deref().unwrap_or("")
    }

    /// Value as text for format checks and display. Null reads as empty.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One extracted table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowToValidate {
    #[serde(
        default,
        deserialize_with = "de_lenient_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub row_number: Option<i64>,
    #[serde(
        default,
        deserialize_with = "de_lenient_float",
        skip_serializing_if = "Option::is_none"
    )]
    pub y_position: Option<f64>,
    /// Keyed by the position as a string ("1".."17").
    #[serde(default)]
    pub cells_by_position: BTreeMap<String, Cell>,
}

impl RowToValidate {
    /// Integer positions whose keys parse; other keys are ignored.
    pub fn present_positions(&self) -> BTreeSet<u32> {
        self.cells_by_position
            .keys()
            .filter_map(|k| parse_position_key(k))
            .collect()
    }

    /// Cells with a numeric key, ordered by position rather than by key text.
    pub fn cells_in_position_order(&self) -> Vec<(u32, &Cell)> {
        let mut cells: Vec<(u32, &Cell)> = self
            .cells_by_position
            .iter()
            .filter_map(|(k, cell)| parse_position_key(k).map(|p| (p, cell)))
            .collect();
        cells.sort_by_key(|(p, _)| *p);
        cells
    }
}

fn parse_position_key(key: &str) -> Option<u32> {
    key.trim().parse::<u32>().ok()
}

/// Outcome of validating a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapped_data: Option<MappedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowErrors {
    pub row: i64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWarnings {
    pub row: i64,
    pub warnings: Vec<String>,
}

/// Outcome of converting a whole extraction response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConversionResult {
    pub success: bool,
    pub valid_rows: Vec<MappedRecord>,
    /// Row number of each entry of `valid_rows`, same order.
    #[serde(default)]
    pub valid_row_numbers: Vec<i64>,
    /// Format warnings of each entry of `valid_rows`, same order (empty when clean).
    #[serde(default)]
    pub valid_row_warnings: Vec<Vec<String>>,
    pub errors: Vec<RowErrors>,
    /// Accepted rows that carry format warnings, in input order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RowWarnings>,
}

/// One accepted row with its position in the batch.
#[derive(Debug, Clone, Copy)]
pub struct AcceptedRow<'a> {
    pub row_number: Option<i64>,
    pub record: &'a MappedRecord,
    pub warnings: &'a [String],
}

impl BatchConversionResult {
    pub fn total_rows(&self) -> usize {
        self.valid_rows.len() + self.errors.len()
    }

    /// Accepted rows by index, each with its own row number and warnings.
    pub fn accepted_rows(&self) -> impl Iterator<Item = AcceptedRow<'_>> + '_ {
        self.valid_rows.iter().enumerate().map(move |(i, record)| AcceptedRow {
            row_number: self.valid_row_numbers.get(i).copied(),
            record,
            warnings: self
                .valid_row_warnings
                .get(i)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Saved,
    Partial,
    Rejected,
}

impl ScanStatus {
    pub fn from_batch(batch: &BatchConversionResult) -> Self {
        if batch.success && !batch.valid_rows.is_empty() {
            ScanStatus::Saved
        } else if batch.valid_rows.is_empty() {
            ScanStatus::Rejected
        } else {
            ScanStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Saved => "saved",
            ScanStatus::Partial => "partial",
            ScanStatus::Rejected => "rejected",
        }
    }
}

/// A persisted route-sheet row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub scan_id: Option<i64>,
    pub row_number: Option<i64>,
    #[serde(flatten)]
    pub fields: MappedRecord,
    pub warnings: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One processed document (or imported extraction) in the scan history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub id: i64,
    pub created_at: String,
    pub source: String,
    pub phase: Option<String>,
    pub status: String,
    pub total_rows: i64,
    pub valid_rows: i64,
    pub errors: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_numbers() {
        assert_eq!(lenient_int(&json!(3)), Some(3));
        assert_eq!(lenient_int(&json!(3.0)), Some(3));
        assert_eq!(lenient_int(&json!(" 3 ")), Some(3));
        assert_eq!(lenient_int(&json!("3.0")), Some(3));
        assert_eq!(lenient_int(&json!(3.5)), None);
        assert_eq!(lenient_int(&json!("three")), None);
        assert_eq!(lenient_int(&json!([3])), None);
        assert_eq!(lenient_float(&json!("312.5")), Some(312.5));
        assert_eq!(lenient_float(&json!(true)), None);
    }

    #[test]
    fn informational_fields_of_any_type_still_deserialize() {
        let row: RowToValidate = serde_json::from_value(json!({
            "row_number": "3",
            "y_position": "near the top",
            "cells_by_position": {
                "1": { "position": "1", "header": "Tournée", "value": "TCT0046", "x_read_from": null },
                "2": { "position": 2.0, "header": "Compagnie", "value": "", "x_read_from": { "px": 4 } },
            },
        }))
        .unwrap();
        assert_eq!(row.row_number, Some(3));
        assert_eq!(row.y_position, None);
        assert_eq!(row.cells_by_position["1"].position, Some(1));
        assert_eq!(row.cells_by_position["2"].position, Some(2));
        assert_eq!(row.cells_by_position["2"].x_read_from, None);
    }
}
