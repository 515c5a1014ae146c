pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod logging;
pub mod models;
pub mod services;
pub mod types;

pub use error::{Result, ScannerError};
pub use services::coordinate_validator::{convert_ai_response_to_sql, validate_row_before_sql};
