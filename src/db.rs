use crate::error::{Result, ScannerError};
use crate::models::position_schema;
use crate::models::{
    BatchConversionResult, MappedRecord, ScanHistoryEntry, ScanStatus, StoredRecord,
};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Index of the first route-sheet column in `select_columns()`.
const FIRST_FIELD_INDEX: usize = 3;

pub struct Db {
    conn: Mutex<Connection>,
}

/// Filters for `list_records`. Unset or blank fields do not filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    /// Prefix match, e.g. "TCT00".
    pub tournee: Option<String>,
    pub id_employe: Option<String>,
    pub vehicule: Option<String>,
    /// Substring over every route-sheet column.
    pub search: Option<String>,
    pub scan_id: Option<i64>,
    pub limit: Option<usize>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Escape `!`, `%` and `_` for `LIKE ... ESCAPE '!'`.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '!' | '%' | '_' => {
                out.push('!');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

fn select_columns() -> String {
    let fields: Vec<&str> = position_schema::columns().collect();
    format!(
        "id, scan_id, row_number, {}, warnings, created_at, updated_at",
        fields.join(", ")
    )
}

fn json_to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::String(s)) if s.is_empty() => SqlValue::Null,
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, index: usize) -> rusqlite::Result<T> {
    let text: String = row.get(index)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn insert_scan(
    conn: &Connection,
    source: &str,
    phase: Option<&str>,
    batch: &BatchConversionResult,
) -> Result<i64> {
    let created_at = chrono::Utc::now().to_rfc3339();
    let errors_json = serde_json::to_string(&batch.errors)?;
    let status = ScanStatus::from_batch(batch);
    conn.execute(
        "INSERT INTO scans (created_at, source, phase, status, total_rows, valid_rows, errors)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            created_at,
            source,
            phase,
            status.as_str(),
            batch.total_rows() as i64,
            batch.valid_rows.len() as i64,
            errors_json
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert the accepted rows of `batch`. Callers own the transaction.
fn insert_rows(
    conn: &Connection,
    scan_id: Option<i64>,
    batch: &BatchConversionResult,
) -> Result<Vec<i64>> {
    let fields: Vec<&str> = position_schema::columns().collect();
    let column_count = fields.len() + 5;
    let placeholders: Vec<String> = (1..=column_count).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO route_sheets (scan_id, row_number, {}, warnings, created_at, updated_at)
         VALUES ({})",
        fields.join(", "),
        placeholders.join(", ")
    );
    let now = chrono::Utc::now().to_rfc3339();

    let mut stmt = conn.prepare(&sql)?;
    let mut ids = Vec::with_capacity(batch.valid_rows.len());
    for row in batch.accepted_rows() {
        let mut values: Vec<SqlValue> = Vec::with_capacity(column_count);
        values.push(scan_id.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
        values.push(row.row_number.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
        for column in &fields {
            values.push(json_to_sql(row.record.get(*column)));
        }
        values.push(SqlValue::Text(serde_json::to_string(row.warnings)?));
        values.push(SqlValue::Text(now.clone()));
        values.push(SqlValue::Text(now.clone()));

        stmt.execute(params_from_iter(values))?;
        ids.push(conn.last_insert_rowid());
    }
    Ok(ids)
}

fn map_stored_record(row: &rusqlite::Row) -> rusqlite::Result<StoredRecord> {
    let mut fields = MappedRecord::new();
    let mut index = FIRST_FIELD_INDEX;
    for column in position_schema::columns() {
        let value: Option<String> = row.get(index)?;
        fields.insert(
            column.to_string(),
            value.map(Value::String).unwrap_or(Value::Null),
        );
        index += 1;
    }
    Ok(StoredRecord {
        id: row.get(0)?,
        scan_id: row.get(1)?,
        row_number: row.get(2)?,
        fields,
        warnings: json_column(row, index)?,
        created_at: row.get(index + 1)?,
        updated_at: row.get(index + 2)?,
    })
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&db_path)?;
        debug!(path = %db_path.display(), "opened database");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let field_columns: String = position_schema::columns()
            .map(|c| format!("                {} TEXT,\n", c))
            .collect();
        conn.execute_batch(&format!(
            "
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                source TEXT NOT NULL,
                phase TEXT,
                status TEXT NOT NULL,
                total_rows INTEGER NOT NULL,
                valid_rows INTEGER NOT NULL,
                errors TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS route_sheets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id INTEGER REFERENCES scans(id) ON DELETE SET NULL,
                row_number INTEGER,
{}                warnings TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_route_sheets_tournee ON route_sheets(tournee);
            CREATE INDEX IF NOT EXISTS idx_route_sheets_scan ON route_sheets(scan_id);
            ",
            field_columns
        ))?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ScannerError::LockPoisoned)
    }

    /// Add a scan history entry summarizing `batch`; returns its id.
    pub fn record_scan(
        &self,
        source: &str,
        phase: Option<&str>,
        batch: &BatchConversionResult,
    ) -> Result<i64> {
        let conn = self.lock()?;
        insert_scan(&conn, source, phase, batch)
    }

    /// Store the accepted rows of `batch` in one transaction; returns the new ids in order.
    pub fn insert_records(
        &self,
        scan_id: Option<i64>,
        batch: &BatchConversionResult,
    ) -> Result<Vec<i64>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let ids = insert_rows(&tx, scan_id, batch)?;
        tx.commit()?;
        debug!(count = ids.len(), ?scan_id, "inserted route sheet rows");
        Ok(ids)
    }

    /// Scan history entry and accepted rows together: either both are written or neither.
    pub fn import_batch(
        &self,
        source: &str,
        phase: Option<&str>,
        batch: &BatchConversionResult,
    ) -> Result<(i64, Vec<i64>)> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let scan_id = insert_scan(&tx, source, phase, batch)?;
        let ids = if batch.valid_rows.is_empty() {
            Vec::new()
        } else {
            insert_rows(&tx, Some(scan_id), batch)?
        };
        tx.commit()?;
        debug!(scan_id, count = ids.len(), "imported batch");
        Ok((scan_id, ids))
    }

    pub fn get_record(&self, id: i64) -> Result<StoredRecord> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM route_sheets WHERE id = ?1", select_columns()),
            params![id],
            map_stored_record,
        )
        .optional()?
        .ok_or(ScannerError::NotFound(id))
    }

    pub fn list_records(&self, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut sql_params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(tournee) = non_blank(&filter.tournee) {
            sql_params.push(Box::new(format!("{}%", escape_like(tournee))));
            clauses.push(format!("tournee LIKE ?{} ESCAPE '!'", sql_params.len()));
        }
        if let Some(id_employe) = non_blank(&filter.id_employe) {
            sql_params.push(Box::new(id_employe.to_string()));
            clauses.push(format!("id_employe = ?{}", sql_params.len()));
        }
        if let Some(vehicule) = non_blank(&filter.vehicule) {
            sql_params.push(Box::new(vehicule.to_string()));
            clauses.push(format!("vehicule = ?{}", sql_params.len()));
        }
        if let Some(search) = non_blank(&filter.search) {
            sql_params.push(Box::new(format!("%{}%", escape_like(search))));
            let n = sql_params.len();
            let any_column = position_schema::columns()
                .map(|c| format!("{} LIKE ?{} ESCAPE '!'", c, n))
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({})", any_column));
        }
        if let Some(scan_id) = filter.scan_id {
            sql_params.push(Box::new(scan_id));
            clauses.push(format!("scan_id = ?{}", sql_params.len()));
        }

        let mut sql = format!("SELECT {} FROM route_sheets", select_columns());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = filter.limit {
            sql_params.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", sql_params.len()));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(sql_params.iter()), map_stored_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Operator correction of one field. Blank values are stored as NULL.
    pub fn update_field(&self, id: i64, column: &str, value: Option<&str>) -> Result<StoredRecord> {
        if !position_schema::is_known_column(column) {
            return Err(ScannerError::UnknownColumn(column.to_string()));
        }
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        let updated_at = chrono::Utc::now().to_rfc3339();
        {
            let conn = self.lock()?;
            let changed = conn.execute(
                &format!(
                    "UPDATE route_sheets SET {} = ?1, updated_at = ?2 WHERE id = ?3",
                    column
                ),
                params![value, updated_at, id],
            )?;
            if changed == 0 {
                return Err(ScannerError::NotFound(id));
            }
        }
        self.get_record(id)
    }

    pub fn delete_record(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute("DELETE FROM route_sheets WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(ScannerError::NotFound(id));
        }
        Ok(())
    }

    pub fn count_records(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM route_sheets", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Most recent scans first.
    pub fn list_scans(&self, limit: usize) -> Result<Vec<ScanHistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, source, phase, status, total_rows, valid_rows, errors
             FROM scans ORDER BY id DESC LIMIT ?1",
        )?;
        let scans = stmt
            .query_map(params![limit as i64], |row| {
                Ok(ScanHistoryEntry {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    source: row.get(2)?,
                    phase: row.get(3)?,
                    status: row.get(4)?,
                    total_rows: row.get(5)?,
                    valid_rows: row.get(6)?,
                    errors: json_column(row, 7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(scans)
    }
}
