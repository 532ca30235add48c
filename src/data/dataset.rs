//! CSV-backed dataset held in an in-memory SQLite table named `df`

use super::{DataError, Table};
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Name of the table every query runs against
pub const TABLE_NAME: &str = "df";

/// Statements a query may start with
const READ_KEYWORDS: [&str; 4] = ["SELECT", "WITH", "VALUES", "PRAGMA"];

/// Introspection pragmas a query may run
const READ_PRAGMAS: [&str; 4] = ["table_info", "table_xinfo", "index_list", "index_info"];

/// VM steps between cancellation checks
const PROGRESS_STEPS: i32 = 1000;

/// Inferred column type, named the way pandas reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Int64,
    Float64,
    Bool,
    Object,
}

impl Dtype {
    fn sql_type(self) -> &'static str {
        match self {
            Dtype::Int64 | Dtype::Bool => "INTEGER",
            Dtype::Float64 => "REAL",
            Dtype::Object => "TEXT",
        }
    }

    fn infer<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let mut int = true;
        let mut float = true;
        let mut boolean = true;
        let mut seen = false;

        for v in values.filter(|v| !v.is_empty()) {
            seen = true;
            int = int && v.parse::<i64>().is_ok();
            float = float && v.parse::<f64>().is_ok();
            boolean = boolean && parse_bool(v).is_some();
            if !int && !float && !boolean {
                return Dtype::Object;
            }
        }

        match (seen, int, float, boolean) {
            (false, ..) => Dtype::Object,
            (_, true, ..) => Dtype::Int64,
            (_, _, true, _) => Dtype::Float64,
            (_, _, _, true) => Dtype::Bool,
            _ => Dtype::Object,
        }
    }

    fn convert(self, raw: &str) -> SqlValue {
        if raw.is_empty() {
            return SqlValue::Null;
        }
        match self {
            Dtype::Int64 => raw.parse().map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            Dtype::Float64 => raw.parse().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            Dtype::Bool => parse_bool(raw)
                .map(|b| SqlValue::Integer(b as i64))
                .unwrap_or(SqlValue::Null),
            Dtype::Object => SqlValue::Text(raw.to_string()),
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dtype::Int64 => "int64",
            Dtype::Float64 => "float64",
            Dtype::Bool => "bool",
            Dtype::Object => "object",
        };
        f.write_str(name)
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    if v.eq_ignore_ascii_case("true") {
        Some(true)
    } else if v.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub dtype: Dtype,
    pub non_null: usize,
}

/// Serializable description of a loaded dataset
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<ColumnInfo>,
}

/// Result of a read-only query
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub table: Table,
    /// More rows matched than were returned
    pub truncated: bool,
}

/// Stops a running query from another thread
#[derive(Debug, Clone, Default)]
pub struct QueryCancel(Arc<AtomicBool>);

impl QueryCancel {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Dataset {
    name: String,
    columns: Vec<ColumnInfo>,
    row_count: usize,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("rows", &self.row_count)
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl Dataset {
    /// Parse CSV (with a header row) into a fresh in-memory table
    pub fn from_csv_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self, DataError> {
        let name = name.into();
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = dedupe_headers(csv_reader.headers()?.iter());
        if headers.is_empty() {
            return Err(DataError::Empty(format!("{} has no header row", name)));
        }

        let records = csv_reader
            .records()
            .collect::<Result<Vec<csv::StringRecord>, csv::Error>>()?;

        let mut columns = Vec::with_capacity(headers.len());
        for (idx, header) in headers.into_iter().enumerate() {
            let values = || records.iter().map(move |r| r.get(idx).unwrap_or(""));
            columns.push(ColumnInfo {
                dtype: Dtype::infer(values()),
                non_null: values().filter(|v| !v.is_empty()).count(),
                name: header,
            });
        }

        let conn = Connection::open_in_memory()?;
        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.dtype.sql_type()))
            .collect();
        conn.execute(
            &format!(
                "CREATE TABLE {} ({})",
                TABLE_NAME,
                column_defs.join(", ")
            ),
            [],
        )?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let insert_sql = format!(
            "INSERT INTO {} VALUES ({})",
            TABLE_NAME,
            placeholders.join(", ")
        );

        conn.execute_batch("BEGIN")?;
        {
            let mut stmt = conn.prepare(&insert_sql)?;
            for record in &records {
                let values: Vec<SqlValue> = columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| col.dtype.convert(record.get(idx).unwrap_or("")))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(values))?;
            }
        }
        conn.execute_batch("COMMIT")?;
        conn.execute_batch("PRAGMA query_only = ON")?;
        conn.authorizer(Some(authorize_read));

        tracing::info!(
            dataset = %name,
            rows = records.len(),
            columns = columns.len(),
            "Loaded dataset"
        );

        Ok(Self {
            name,
            columns,
            row_count: records.len(),
            conn: Mutex::new(conn),
        })
    }

    pub fn from_csv_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self, DataError> {
        Self::from_csv_reader(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            name: self.name.clone(),
            rows: self.row_count,
            columns: self.columns.clone(),
        }
    }

    /// Column listing in the layout of `DataFrame.info()`
    pub fn schema(&self) -> String {
        let name_width = self
            .columns
            .iter()
            .map(|c| c.name.chars().count())
            .max()
            .unwrap_or(0)
            .max("Column".len());

        let mut out = format!("Table: {}\n", TABLE_NAME);
        if self.row_count == 0 {
            out.push_str("RangeIndex: 0 entries\n");
        } else {
            out.push_str(&format!(
                "RangeIndex: {} entries, 0 to {}\n",
                self.row_count,
                self.row_count - 1
            ));
        }
        out.push_str(&format!(
            "Data columns (total {} columns):\n",
            self.columns.len()
        ));
        out.push_str(&format!(
            " #   {:<name_width$}  Non-Null Count  Dtype\n",
            "Column"
        ));
        out.push_str(&format!(
            "---  {:<name_width$}  --------------  -----\n",
            "------"
        ));
        for (idx, col) in self.columns.iter().enumerate() {
            out.push_str(&format!(
                " {:<3} {:<name_width$}  {:<14}  {}\n",
                idx,
                col.name,
                format!("{} non-null", col.non_null),
                col.dtype
            ));
        }
        out
    }

    /// First `n` rows, like `df.head(n)`
    pub fn preview(&self, n: usize) -> Result<Table, DataError> {
        let sql = format!("SELECT * FROM {} LIMIT {}", TABLE_NAME, n);
        Ok(self.query(&sql, n)?.table)
    }

    /// Run one read-only statement, returning at most `limit` rows
    pub fn query(&self, sql: &str, limit: usize) -> Result<QueryResult, DataError> {
        self.query_cancellable(sql, limit, &QueryCancel::default())
    }

    /// [`Dataset::query`] that gives up with `DataError::Cancelled` once
    /// `cancel` fires, releasing the connection
    pub fn query_cancellable(
        &self,
        sql: &str,
        limit: usize,
        cancel: &QueryCancel,
    ) -> Result<QueryResult, DataError> {
        let sql = sql.trim().trim_end_matches(';').trim();
        if sql.is_empty() {
            return Err(DataError::Query("empty query".to_string()));
        }
        if !READ_KEYWORDS.contains(&leading_keyword(sql).as_str()) {
            return Err(DataError::ReadOnly);
        }

        let conn = self
            .conn
            .lock()
            .map_err(|_| DataError::Query("dataset connection poisoned".to_string()))?;
        if cancel.is_cancelled() {
            return Err(DataError::Cancelled);
        }

        let flag = cancel.clone();
        conn.progress_handler(PROGRESS_STEPS, Some(move || flag.is_cancelled()));
        let _reset = ProgressReset(&conn);

        let mut stmt = conn.prepare(sql).map_err(query_error)?;
        if !stmt.readonly() {
            return Err(DataError::ReadOnly);
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();
        let mut table = Table::new(columns);
        let mut truncated = false;

        let mut rows = stmt.query([]).map_err(query_error)?;
        while let Some(row) = rows.next().map_err(query_error)? {
            if table.rows.len() >= limit {
                truncated = true;
                break;
            }
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(to_json(row.get_ref(idx).map_err(query_error)?));
            }
            table.rows.push(values);
        }

        Ok(QueryResult { table, truncated })
    }
}

fn query_error(e: rusqlite::Error) -> DataError {
    match e {
        rusqlite::Error::MultipleStatement => {
            DataError::Query("only a single statement is allowed".to_string())
        }
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::OperationInterrupted => {
            DataError::Cancelled
        }
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::AuthorizationForStatementDenied =>
        {
            DataError::ReadOnly
        }
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("readonly") => {
            DataError::ReadOnly
        }
        other => DataError::Query(other.to_string()),
    }
}

/// Clears the cancellation hook when a query ends
struct ProgressReset<'a>(&'a Connection);

impl Drop for ProgressReset<'_> {
    fn drop(&mut self) {
        self.0.progress_handler(0, None::<fn() -> bool>);
    }
}

/// Authorizer for loaded datasets: reads, functions and introspection only
fn authorize_read(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Select
        | AuthAction::Read { .. }
        | AuthAction::Function { .. }
        | AuthAction::Recursive => Authorization::Allow,
        AuthAction::Pragma { pragma_name, .. }
            if READ_PRAGMAS.contains(&pragma_name.to_ascii_lowercase().as_str()) =>
        {
            Authorization::Allow
        }
        _ => Authorization::Deny,
    }
}

/// First keyword of a statement, past leading comments
fn leading_keyword(sql: &str) -> String {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, r)| r).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, r)| r).trim_start();
        } else {
            break;
        }
    }
    rest.chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Blank headers become `Unnamed: i`; repeats get `.1`, `.2`, ... suffixes
fn dedupe_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::new();

    for (idx, header) in headers.enumerate() {
        let base = if header.is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            header.to_string()
        };

        let mut candidate = base.clone();
        while seen.contains_key(&candidate.to_lowercase()) {
            let count = seen.entry(base.to_lowercase()).or_insert(0);
            *count += 1;
            candidate = format!("{}.{}", base, count);
        }
        seen.insert(candidate.to_lowercase(), 0);
        out.push(candidate);
    }

    // A single empty header means the input had no header row at all
    if out.len() == 1 && out[0] == "Unnamed: 0" {
        out.clear();
    }
    out
}
