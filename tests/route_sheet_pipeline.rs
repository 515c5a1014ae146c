use route_sheet_scanner_lib::commands;
use route_sheet_scanner_lib::db::{Db, RecordFilter};
use route_sheet_scanner_lib::models::ScanStatus;
use serde_json::{json, Value};
use tempfile::tempdir;

const FIXTURE: &str = include_str!("fixtures/route_sheet_extraction.json");

fn fixture_rows() -> Vec<Value> {
    let fixture: Value = serde_json::from_str(FIXTURE).unwrap();
    fixture["rows"].as_array().unwrap().clone()
}

#[test]
fn fixture_validates_without_storage() {
    let result = commands::validate_extraction(FIXTURE).unwrap();
    assert!(!result.success);
    assert_eq!(result.valid_rows.len(), 2);
    assert_eq!(result.valid_row_numbers, vec![1, 2]);

    let rejected: Vec<i64> = result.errors.iter().map(|e| e.row).collect();
    assert_eq!(rejected, vec![3, 4]);
    assert_eq!(result.errors[0].errors, vec!["Missing position 9 (vehicule)"]);
    assert!(result.errors[1].errors[0].starts_with("Position 2:"));

    assert_eq!(result.warnings.len(), 1);
    assert_eq!(result.warnings[0].row, 2);
    assert!(result.warnings[0].warnings[0].contains("vehicule"));
}

#[test]
fn import_stores_accepted_rows_and_history() {
    let db = Db::open_in_memory().unwrap();
    let outcome = commands::import_extraction(&db, "feuille_0046.png", FIXTURE).unwrap();

    assert_eq!(outcome.status, ScanStatus::Partial);
    assert_eq!(outcome.inserted_ids.len(), 2);

    let stored = commands::list_records(&db, &RecordFilter::default()).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].fields["tournee"], json!("TCT0046"));
    assert_eq!(stored[0].fields["retour"], Value::Null);
    assert_eq!(stored[0].row_number, Some(1));
    assert!(stored[0].warnings.is_empty());
    assert_eq!(stored[1].warnings.len(), 1);

    let history = commands::get_history(&db, 5).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source, "feuille_0046.png");
    assert_eq!(history[0].phase.as_deref(), Some("extraction"));
    assert_eq!(history[0].status, "partial");
    assert_eq!(history[0].total_rows, 4);
    assert_eq!(history[0].valid_rows, 2);
}

#[test]
fn operator_corrects_flagged_row() {
    let db = Db::open_in_memory().unwrap();
    commands::import_extraction(&db, "feuille.png", FIXTURE).unwrap();

    let flagged = commands::list_records(
        &db,
        &RecordFilter {
            tournee: Some("TCT0047".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(flagged.len(), 1);

    let fixed = commands::update_record_field(&db, flagged[0].id, "vehicule", "230").unwrap();
    assert_eq!(fixed.fields["vehicule"], json!("230"));

    commands::delete_record(&db, flagged[0].id).unwrap();
    assert_eq!(db.count_records().unwrap(), 1);
}

#[test]
fn malformed_response_is_recorded_as_rejected() {
    let db = Db::open_in_memory().unwrap();
    let outcome = commands::import_extraction(&db, "blank.png", "{\"phase\": \"extraction\"}").unwrap();
    assert_eq!(outcome.status, ScanStatus::Rejected);
    assert!(outcome.inserted_ids.is_empty());
    assert_eq!(outcome.result.errors[0].row, 0);
    assert_eq!(db.count_records().unwrap(), 0);
    assert_eq!(db.list_scans(1).unwrap()[0].status, "rejected");
}

#[test]
fn invalid_json_is_an_error() {
    assert!(commands::validate_extraction("{ rows: ").is_err());
}

#[test]
fn results_serialize_with_camel_case_keys() {
    let result = commands::validate_extraction(FIXTURE).unwrap();
    let value = serde_json::to_value(&result).unwrap();
    assert!(value.get("validRows").is_some());
    assert!(value.get("validRowNumbers").is_some());
    assert_eq!(value["errors"][0]["row"], json!(3));
}

#[test]
fn on_disk_database_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("route_sheets.db");
    {
        let db = Db::new(path.clone()).unwrap();
        commands::import_extraction(&db, "feuille.png", FIXTURE).unwrap();
    }
    let db = Db::new(path).unwrap();
    assert_eq!(db.count_records().unwrap(), 2);
    assert_eq!(db.list_scans(10).unwrap().len(), 1);
}

#[test]
fn loosely_typed_row_metadata_is_accepted() {
    let rows = fixture_rows();
    let mut quoted = rows[0].clone();
    quoted["row_number"] = json!("7");
    quoted["y_position"] = json!("top");
    quoted["cells_by_position"]["1"]["position"] = json!("1");
    let mut float = rows[0].clone();
    float["row_number"] = json!(8.0);
    float["cells_by_position"]["9"]["x_read_from"] = json!("n/a");

    let text = json!({ "phase": "extraction", "rows": [quoted, float] }).to_string();
    let result = commands::validate_extraction(&text).unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.valid_row_numbers, vec![7, 8]);

    let db = Db::open_in_memory().unwrap();
    commands::import_extraction(&db, "feuille.png", &text).unwrap();
    let stored = commands::list_records(&db, &RecordFilter::default()).unwrap();
    let numbers: Vec<Option<i64>> = stored.iter().map(|r| r.row_number).collect();
    assert_eq!(numbers, vec![Some(7), Some(8)]);
}

#[test]
fn clean_row_sharing_a_row_number_keeps_no_warnings() {
    let rows = fixture_rows();
    let flagged = rows[1].clone();
    let mut clean = rows[0].clone();
    clean.as_object_mut().unwrap().remove("row_number");
    clean["cells_by_position"]["9"]["value"] = json!("232");

    let text = json!({ "phase": "extraction", "rows": [flagged, clean] }).to_string();
    let db = Db::open_in_memory().unwrap();
    let outcome = commands::import_extraction(&db, "feuille.png", &text).unwrap();
    assert_eq!(outcome.result.valid_row_numbers, vec![2, 2]);

    let stored = commands::list_records(&db, &RecordFilter::default()).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].warnings.len(), 1);
    assert!(stored[1].warnings.is_empty());
    assert_eq!(stored[1].fields["vehicule"], json!("232"));
}
