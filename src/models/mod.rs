pub mod position_schema;
pub mod route_sheet;

pub use route_sheet::{
    AcceptedRow, BatchConversionResult, Cell, MappedRecord, RowErrors, RowToValidate, RowWarnings,
    ScanHistoryEntry, ScanStatus, StoredRecord, ValidationResult,
};
