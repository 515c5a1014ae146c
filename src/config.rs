use crate::error::{Result, ScannerError};
use std::path::PathBuf;

const APP_DIR_NAME: &str = "route-sheet-scanner";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Load `.env` from the working directory, then from the app data dir so installed
/// copies can keep credentials next to the database. Already-set variables win.
pub fn load_env() {
    let _ = dotenvy::dotenv();
    if let Some(dir) = app_data_dir() {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
        }
    }
}

pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR_NAME))
}

/// `ROUTE_SHEET_DB` if set, else `<data_dir>/route-sheet-scanner/route_sheets.db`.
pub fn database_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("ROUTE_SHEET_DB") {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path.trim()));
        }
    }
    app_data_dir()
        .map(|d| d.join("route_sheets.db"))
        .ok_or_else(|| ScannerError::Config("Could not locate app data directory; set ROUTE_SHEET_DB".to_string()))
}

/// Connection settings for the vision-language-model service.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl ExtractionConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ScannerError::Config(format!("{} not set in .env", key)))
        };
        let api_url = required("VLM_API_URL")?
            .trim_end_matches('/')
            .to_string();
        let api_key = required("VLM_API_KEY")?;
        let model = lookup("VLM_MODEL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = match lookup("VLM_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ScannerError::Config(format!("VLM_TIMEOUT_SECS is not a number: {}", raw))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(ExtractionConfig {
            api_url,
            api_key,
            model,
            timeout_secs,
        })
    }

    /// "configured" when URL and key are present, for status displays.
    pub fn status() -> &'static str {
        match Self::from_env() {
            Ok(_) => "configured",
            Err(_) => "not_configured",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = ExtractionConfig::from_lookup(lookup_from(&[
            ("VLM_API_URL", "https://vlm.example.com/v1/"),
            ("VLM_API_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://vlm.example.com/v1");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn missing_key_is_named() {
        let err = ExtractionConfig::from_lookup(lookup_from(&[("VLM_API_URL", "http://x")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "VLM_API_KEY not set in .env");
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let result = ExtractionConfig::from_lookup(lookup_from(&[
            ("VLM_API_URL", "http://x"),
            ("VLM_API_KEY", "k"),
            ("VLM_TIMEOUT_SECS", "soon"),
        ]));
        assert!(matches!(result, Err(ScannerError::Config(_))));
    }
}
