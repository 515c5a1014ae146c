//! Client for the vision-language-model service that reads route-sheet tables.
//!
//! The service is any OpenAI-compatible `chat/completions` endpoint. The page is sent as
//! a base64 data URL and the model is asked to answer with the `{phase, rows}` JSON
//! consumed by the coordinate validator.

use crate::config::ExtractionConfig;
use crate::error::{Result, ScannerError};
use crate::models::position_schema::{self, POSITION_COUNT};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageUrl, ResponseFormat,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const MAX_DOCUMENT_BYTES: u64 = 20 * 1024 * 1024;
const DEFAULT_PHASE: &str = "extraction";

/// Check that `path` is a readable scan we can send; returns its MIME type.
pub fn validate_document_file(path: &Path) -> Result<&'static str> {
    if !path.exists() {
        return Err(ScannerError::InvalidDocument("File not found.".to_string()));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => {
            return Err(ScannerError::InvalidDocument(
                "Unsupported file type (use PNG, JPEG, WebP or PDF).".to_string(),
            ))
        }
    };
    let metadata = fs::metadata(path)?;
    if metadata.len() == 0 {
        return Err(ScannerError::InvalidDocument("File is empty.".to_string()));
    }
    if metadata.len() > MAX_DOCUMENT_BYTES {
        return Err(ScannerError::InvalidDocument(
            "File too large (max 20MB).".to_string(),
        ));
    }
    if mime == "application/pdf" {
        let mut header = [0u8; 5];
        let mut f = fs::File::open(path)?;
        if f.read(&mut header).unwrap_or(0) < 5 || !header.starts_with(b"%PDF-") {
            return Err(ScannerError::InvalidDocument(
                "Not a valid PDF file.".to_string(),
            ));
        }
    }
    Ok(mime)
}

/// Instructions sent with every page, built from the position schema.
pub fn build_extraction_prompt() -> String {
    let mut prompt = String::from(
        "You are reading a scanned route sheet (feuille de route). \
         The table has 17 columns, numbered from left to right:\n",
    );
    for position in 1..=POSITION_COUNT {
        let header = position_schema::canonical_header(position).unwrap_or("");
        let column = position_schema::column_for(position).unwrap_or("");
        let _ = writeln!(prompt, "{}. {} ({})", position, header, column);
    }
    prompt.push_str(
        "Return only JSON of the form {\"phase\": \"extraction\", \"rows\": [{\"row_number\": 1, \
         \"y_position\": <pixel y of the row>, \"cells_by_position\": {\"1\": {\"position\": 1, \
         \"header\": \"<header text as printed>\", \"value\": \"<cell text>\", \
         \"x_read_from\": <pixel x of the cell>}}}]}.\n\
         Include all 17 positions for every data row, numbering rows from the top starting at 1. \
         Use an empty string for blank cells. Copy header and cell text exactly as printed; \
         do not reformat times or identifiers.",
    );
    prompt
}

/// Send one document to the extraction service and return its normalized JSON reply.
pub fn extract_route_sheet(file_path: &Path, config: &ExtractionConfig) -> Result<Value> {
    let mime = validate_document_file(file_path)?;

    let bytes = fs::read(file_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScannerError::InvalidDocument("File not found.".to_string())
        } else {
            ScannerError::InvalidDocument(format!("Could not read file: {}", e))
        }
    })?;
    let data_url = format!("data:{};base64,{}", mime, BASE64.encode(&bytes));

    let request = ChatRequest {
        model: config.model.clone(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: vec![
                ContentPart::Text {
                    text: build_extraction_prompt(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ],
        }],
        temperature: 0.0,
        response_format: ResponseFormat {
            kind: "json_object".to_string(),
        },
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| ScannerError::Extraction(e.to_string()))?;

    let url = format!("{}/chat/completions", config.api_url);
    info!(file = %file_path.display(), model = %config.model, "sending page to extraction service");

    let response = client
        .post(&url)
        .bearer_auth(&config.api_key)
        .json(&request)
        .send()
        .map_err(|e| {
            ScannerError::Extraction(
                if e.is_connect() || e.is_timeout() {
                    "Check your internet connection and try again."
                } else {
                    "Network error."
                }
                .to_string(),
            )
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ScannerError::Extraction(format!(
            "Extraction failed ({}): {}",
            status,
            if body.is_empty() {
                "Invalid key or endpoint?"
            } else {
                body.as_str()
            }
        )));
    }

    let reply: ChatResponse = response
        .json()
        .map_err(|e| ScannerError::Extraction(format!("Invalid JSON: {}", e)))?;
    let content = reply
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ScannerError::Extraction("Extraction returned no content.".to_string()))?;
    debug!(chars = content.len(), "extraction reply received");

    parse_model_content(&content)
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse the model's text answer into the `{phase, rows}` shape.
///
/// A bare row array is wrapped and a missing `phase` is filled in. Any other shape is
/// returned as-is so the validator can report it.
pub fn parse_model_content(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(strip_code_fences(text))?;
    Ok(normalize_extraction(value))
}

pub fn normalize_extraction(value: Value) -> Value {
    match value {
        Value::Array(rows) => json!({ "phase": DEFAULT_PHASE, "rows": rows }),
        Value::Object(mut obj) => {
            if !obj.contains_key("phase") {
                obj.insert("phase".to_string(), Value::String(DEFAULT_PHASE.to_string()));
            }
            Value::Object(obj)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"phase\": \"p1\", \"rows\": []}\n```";
        let value = parse_model_content(text).unwrap();
        assert_eq!(value, json!({ "phase": "p1", "rows": [] }));
    }

    #[test]
    fn bare_array_is_wrapped() {
        let value = parse_model_content("[{\"row_number\": 1}]").unwrap();
        assert_eq!(value["phase"], json!("extraction"));
        assert_eq!(value["rows"][0]["row_number"], json!(1));
    }

    #[test]
    fn missing_phase_is_filled() {
        let value = parse_model_content("{\"rows\": []}").unwrap();
        assert_eq!(value["phase"], json!("extraction"));
    }

    #[test]
    fn other_shapes_pass_through() {
        assert_eq!(parse_model_content("\"hello\"").unwrap(), json!("hello"));
        assert!(matches!(
            parse_model_content("not json"),
            Err(ScannerError::Json(_))
        ));
    }

    #[test]
    fn prompt_lists_every_position() {
        let prompt = build_extraction_prompt();
        for column in position_schema::columns() {
            assert!(prompt.contains(column), "prompt misses {}", column);
        }
        assert!(prompt.contains("17. Changement par (changement_par)"));
    }

    #[test]
    fn document_validation() {
        let dir = tempdir().unwrap();

        let png = dir.path().join("sheet.PNG");
        fs::File::create(&png).unwrap().write_all(b"\x89PNG....").unwrap();
        assert_eq!(validate_document_file(&png).unwrap(), "image/png");

        let pdf = dir.path().join("sheet.pdf");
        fs::File::create(&pdf).unwrap().write_all(b"%PDF-1.7\n").unwrap();
        assert_eq!(validate_document_file(&pdf).unwrap(), "application/pdf");

        let fake_pdf = dir.path().join("fake.pdf");
        fs::File::create(&fake_pdf).unwrap().write_all(b"hello world").unwrap();
        assert!(validate_document_file(&fake_pdf).is_err());

        let empty = dir.path().join("empty.jpg");
        fs::File::create(&empty).unwrap();
        assert_eq!(
            validate_document_file(&empty).unwrap_err().to_string(),
            "File is empty."
        );

        let text = dir.path().join("notes.txt");
        fs::File::create(&text).unwrap().write_all(b"x").unwrap();
        assert!(validate_document_file(&text).is_err());

        assert_eq!(
            validate_document_file(&dir.path().join("missing.png"))
                .unwrap_err()
                .to_string(),
            "File not found."
        );
    }
}
