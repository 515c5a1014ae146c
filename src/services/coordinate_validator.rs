//! Gatekeeper between the AI extraction and SQL storage.
//!
//! A row reaches storage only when all 17 positions are present and the header read at
//! each position plausibly matches the column expected there. Value formats are checked
//! too, but a bad format only produces a warning: OCR noise on an otherwise good row
//! (a dropped leading zero, say) must not discard it.

use crate::models::position_schema::{self, POSITION_COUNT};
use crate::models::route_sheet::lenient_int;
use crate::models::{
    BatchConversionResult, MappedRecord, RowErrors, RowToValidate, RowWarnings, ValidationResult,
};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::fmt::Write as _;
use std::sync::OnceLock;
use tracing::{debug, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const MALFORMED_RESPONSE: &str = "Invalid AI response: missing 'rows' array";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceCheck {
    pub valid: bool,
    pub missing: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderMismatch {
    pub position: u32,
    pub expected: Vec<String>,
    pub got: String,
}

impl fmt::Display for HeaderMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Position {}: header \"{}\" does not match expected [{}]",
            self.position,
            self.got,
            self.expected.join(" / ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderCheck {
    pub valid: bool,
    pub errors: Vec<HeaderMismatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatWarning {
    pub position: u32,
    pub field: String,
    pub expected: String,
    pub got: String,
}

impl fmt::Display for FormatWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Position {} ({}): expected {}, got \"{}\"",
            self.position, self.field, self.expected, self.got
        )
    }
}

/// Format check outcome. `valid` is always true: mismatches are advisory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTypeCheck {
    pub valid: bool,
    pub errors: Vec<FormatWarning>,
}

struct FormatRule {
    position: u32,
    field: &'static str,
    pattern: &'static str,
    description: &'static str,
}

const FORMAT_RULES: [FormatRule; 6] = [
    FormatRule {
        position: 1,
        field: "tournee",
        pattern: r"^TCT[0-9]{4}$",
        description: "TCT followed by 4 digits (e.g. TCT0046)",
    },
    FormatRule {
        position: 6,
        field: "id_employe",
        pattern: r"^[0-9]{4}$",
        description: "4 digits (e.g. 0450)",
    },
    FormatRule {
        position: 8,
        field: "id_employe_confirm",
        pattern: r"^[0-9]{4}$",
        description: "4 digits (e.g. 0450)",
    },
    FormatRule {
        position: 9,
        field: "vehicule",
        pattern: r"^[0-9]{3}$",
        description: "3 digits (e.g. 232)",
    },
    FormatRule {
        position: 3,
        field: "debut_tournee",
        pattern: r"^[0-9]{1,2}:[0-9]{2}$",
        description: "time H:MM or HH:MM (e.g. 9:18)",
    },
    FormatRule {
        position: 4,
        field: "fin_tournee",
        pattern: r"^[0-9]{1,2}:[0-9]{2}$",
        description: "time H:MM or HH:MM (e.g. 9:54)",
    },
];

/// Compiled `FORMAT_RULES` patterns, same order.
fn format_regexes() -> &'static [Regex] {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        FORMAT_RULES
            .iter()
            .map(|rule| Regex::new(rule.pattern).expect("format rule regex"))
            .collect()
    })
}

/// Lowercase, strip diacritics (NFD then drop combining marks), trim.
pub fn normalize_header(raw: &str) -> String {
    let stripped: String = raw
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    stripped.trim().to_string()
}

/// Two-way substring test between a normalized detected header and one accepted
/// variant. The variant is only lowercased, so "tournee" does not match "Tournée".
pub fn header_matches(normalized_detected: &str, variant: &str) -> bool {
    let expected = variant.to_lowercase();
    normalized_detected.contains(expected.as_str()) || expected.contains(normalized_detected)
}

pub fn validate_positions_present(row: &RowToValidate) -> PresenceCheck {
    let present = row.present_positions();
    let missing: Vec<u32> = (1..=POSITION_COUNT)
        .filter(|p| !present.contains(p))
        .collect();
    PresenceCheck {
        valid: missing.is_empty(),
        missing,
    }
}

pub fn validate_headers_at_positions(row: &RowToValidate) -> HeaderCheck {
    let mut errors = Vec::new();
    for (position, cell) in row.cells_in_position_order() {
        let Some(variants) = position_schema::expected_headers(position) else {
            continue;
        };
        let detected = normalize_header(cell.header_text());
        if !variants.iter().any(|v| header_matches(&detected, v)) {
            errors.push(HeaderMismatch {
                position,
                expected: variants.iter().map(|v| v.to_string()).collect(),
                got: cell.header_text().to_string(),
            });
        }
    }
    HeaderCheck {
        valid: errors.is_empty(),
        errors,
    }
}

pub fn validate_data_types(row: &RowToValidate) -> DataTypeCheck {
    let cells = row.cells_in_position_order();
    let mut errors = Vec::new();
    for (rule, regex) in FORMAT_RULES.iter().zip(format_regexes()) {
        let Some((_, cell)) = cells.iter().find(|(p, _)| *p == rule.position) else {
            continue;
        };
        let value = cell.value_text();
        if value.is_empty() {
            continue;
        }
        if !regex.is_match(&value) {
            errors.push(FormatWarning {
                position: rule.position,
                field: rule.field.to_string(),
                expected: rule.description.to_string(),
                got: value,
            });
        }
    }
    DataTypeCheck {
        valid: true,
        errors,
    }
}

fn missing_message(position: u32) -> String {
    match position_schema::column_for(position) {
        Some(column) => format!("Missing position {} ({})", position, column),
        None => format!("Missing position {}", position),
    }
}

/// Copy every mapped cell into its SQL column. Empty strings become null; positions
/// without a column are skipped.
pub fn map_row(row: &RowToValidate) -> MappedRecord {
    let mut record = MappedRecord::new();
    for (position, cell) in row.cells_in_position_order() {
        let Some(column) = position_schema::column_for(position) else {
            continue;
        };
        let value = match &cell.value {
            Value::String(s) if s.is_empty() => Value::Null,
            other => other.clone(),
        };
        record.insert(column.to_string(), value);
    }
    record
}

pub fn validate_row_before_sql(row: &RowToValidate) -> ValidationResult {
    log_row_mapping(row);

    let presence = validate_positions_present(row);
    let headers = validate_headers_at_positions(row);

    let mut errors: Vec<String> = presence.missing.iter().map(|p| missing_message(*p)).collect();
    errors.extend(headers.errors.iter().map(ToString::to_string));

    if !presence.valid || !headers.valid {
        return ValidationResult {
            valid: false,
            errors,
            warnings: Vec::new(),
            mapped_data: None,
        };
    }

    let warnings = validate_data_types(row)
        .errors
        .iter()
        .map(ToString::to_string)
        .collect();

    ValidationResult {
        valid: true,
        errors,
        warnings,
        mapped_data: Some(map_row(row)),
    }
}

/// Validate every row of an extraction response, keeping input order.
pub fn convert_ai_response_to_sql(ai_response: &Value) -> BatchConversionResult {
    let Some(rows) = ai_response.get("rows").and_then(Value::as_array) else {
        warn!("AI response has no rows array");
        return BatchConversionResult {
            success: false,
            valid_rows: Vec::new(),
            valid_row_numbers: Vec::new(),
            valid_row_warnings: Vec::new(),
            errors: vec![RowErrors {
                row: 0,
                errors: vec![MALFORMED_RESPONSE.to_string()],
            }],
            warnings: Vec::new(),
        };
    };

    let mut valid_rows = Vec::new();
    let mut valid_row_numbers = Vec::new();
    let mut valid_row_warnings = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (index, raw_row) in rows.iter().enumerate() {
        let row_id = raw_row
            .get("row_number")
            .and_then(lenient_int)
            .unwrap_or(index as i64 + 1);

        let row: RowToValidate = match serde_json::from_value(raw_row.clone()) {
            Ok(row) => row,
            Err(e) => {
                warn!(row = row_id, "malformed row: {}", e);
                errors.push(RowErrors {
                    row: row_id,
                    errors: vec![format!("Malformed row: {}", e)],
                });
                continue;
            }
        };

        let result = validate_row_before_sql(&row);
        match result.mapped_data {
            Some(mapped) if result.valid => {
                if !result.warnings.is_empty() {
                    debug!(row = row_id, warnings = ?result.warnings, "row accepted with warnings");
                    warnings.push(RowWarnings {
                        row: row_id,
                        warnings: result.warnings.clone(),
                    });
                }
                valid_rows.push(mapped);
                valid_row_numbers.push(row_id);
                valid_row_warnings.push(result.warnings);
            }
            _ => {
                warn!(row = row_id, errors = ?result.errors, "row rejected");
                errors.push(RowErrors {
                    row: row_id,
                    errors: result.errors,
                });
            }
        }
    }

    debug!(
        valid = valid_rows.len(),
        rejected = errors.len(),
        "converted AI response"
    );

    BatchConversionResult {
        success: errors.is_empty(),
        valid_rows,
        valid_row_numbers,
        valid_row_warnings,
        errors,
        warnings,
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Debug table of position → detected header → value → column for one row.
fn log_row_mapping(row: &RowToValidate) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:>3} | {:<28} | {:<28} | {}",
        "pos", "header", "value", "column"
    );
    let _ = writeln!(table, "{}", "-".repeat(90));
    for (position, cell) in row.cells_in_position_order() {
        let _ = writeln!(
            table,
            "{:>3} | {:<28} | {:<28} | {}",
            position,
            clip(cell.header_text(), 28),
            clip(&cell.value_text(), 28),
            position_schema::column_for(position).unwrap_or("(unmapped)")
        );
    }
    debug!(row = ?row.row_number, "cell mapping\n{}", table);
}
