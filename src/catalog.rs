//! # Schema catalog
//!
//! Read-only view over the connected relational data source.
//!
//! The engine consumes a [`SchemaCatalog`] in two ways:
//! - [`SchemaCatalog::get_tables`] returns a [`SchemaSnapshot`]: every table with its ordered
//!   columns, primary key, foreign keys and up to five sample rows. The translator binds its
//!   templates against this snapshot.
//! - [`SchemaCatalog::execute_read_query`] runs a [`ReadQuery`] produced by the translator and
//!   returns rows as JSON objects.
//!
//! [`SqliteCatalog`] is the bundled implementation. It opens the database **read-only** and
//! additionally refuses any statement SQLite does not report as read-only, so a translated
//! query can never mutate data.
//!
//! ## Database URLs
//! Both plain paths (`company_demo.db`) and SQLAlchemy-style URLs
//! (`sqlite:///company_demo.db`) are accepted.
//!
//! ```no_run
//! use nlq_engine::catalog::{ReadQuery, SchemaCatalog, SqliteCatalog};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = SqliteCatalog::open("sqlite:///company_demo.db")?;
//! for (name, table) in catalog.get_tables()? {
//!     println!("{name}: {} columns", table.columns.len());
//! }
//! let rows = catalog.execute_read_query(&ReadQuery::new("SELECT COUNT(*) AS count FROM employees"))?;
//! println!("{rows:?}");
//! # Ok(()) }
//! ```

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One result row: column name → JSON value.
pub type Row = serde_json::Map<String, JsonValue>;

/// Table name → table metadata, ordered by name.
pub type SchemaSnapshot = BTreeMap<String, SchemaTable>;

/// Number of sample rows captured per table.
pub const SAMPLE_ROW_LIMIT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unsupported database url `{0}` (expected a path or sqlite:///path)")]
    UnsupportedUrl(String),

    #[error("failed to open database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("query rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub columns: Vec<String>,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
}

/// Metadata for a single table. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaTable {
    pub columns: Vec<SchemaColumn>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub sample_rows: Vec<Row>,
}

impl SchemaTable {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// A parameterized read-only statement. Parameters bind positionally (`?1`, `?2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadQuery {
    pub sql: String,
    pub params: Vec<String>,
}

impl ReadQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.params.push(param.into());
        self
    }
}

/// Source of schema metadata and executor for translated queries.
pub trait SchemaCatalog: Send + Sync {
    fn get_tables(&self) -> Result<SchemaSnapshot, CatalogError>;

    fn execute_read_query(&self, query: &ReadQuery) -> Result<Vec<Row>, CatalogError>;
}

/// Resolve `sqlite:///x.db`, `sqlite://x.db` or a bare path to a filesystem path.
pub fn sqlite_path_from_url(url: &str) -> Result<PathBuf, CatalogError> {
    let trimmed = url.trim();
    let path = if let Some(rest) = trimmed.strip_prefix("sqlite:///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        rest
    } else if trimmed.contains("://") || trimmed.is_empty() {
        return Err(CatalogError::UnsupportedUrl(url.to_string()));
    } else {
        trimmed
    };

    if path.is_empty() {
        return Err(CatalogError::UnsupportedUrl(url.to_string()));
    }
    Ok(PathBuf::from(path))
}

/// Quote an identifier for SQLite unless it is a plain `[A-Za-z_][A-Za-z0-9_]*` name.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// [`SchemaCatalog`] backed by a read-only SQLite connection.
pub struct SqliteCatalog {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open the database named by `url` read-only.
    pub fn open(url: &str) -> Result<Self, CatalogError> {
        let path = sqlite_path_from_url(url)?;
        let connection = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| CatalogError::Open {
            path: path.clone(),
            source,
        })?;

        debug!("Opened catalog {}", path.display());
        Ok(Self {
            path,
            connection: Mutex::new(connection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table_names(conn: &Connection) -> Result<Vec<String>, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn describe_table(conn: &Connection, table: &str) -> Result<SchemaTable, CatalogError> {
        let quoted = quote_ident(table);

        // (cid, name, type, notnull, dflt_value, pk)
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({quoted})"))?;
        let mut columns = Vec::new();
        let mut pk_positions: Vec<(i64, String)> = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let data_type: String = row.get(2)?;
            let pk: i64 = row.get(5)?;
            if pk > 0 {
                pk_positions.push((pk, name.clone()));
            }
            columns.push(SchemaColumn { name, data_type });
        }
        pk_positions.sort();

        // (id, seq, table, from, to, on_update, on_delete, match)
        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({quoted})"))?;
        let mut grouped: BTreeMap<i64, ForeignKey> = BTreeMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let referred_table: String = row.get(2)?;
            let from: String = row.get(3)?;
            let to: Option<String> = row.get(4)?;
            let fk = grouped.entry(id).or_insert_with(|| ForeignKey {
                columns: Vec::new(),
                referred_table,
                referred_columns: Vec::new(),
            });
            fk.columns.push(from);
            if let Some(to) = to {
                fk.referred_columns.push(to);
            }
        }

        let sample_rows = match Self::query_rows(
            conn,
            &ReadQuery::new(format!("SELECT * FROM {quoted} LIMIT {SAMPLE_ROW_LIMIT}")),
        ) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Could not sample rows from {}: {}", table, e);
                Vec::new()
            }
        };

        Ok(SchemaTable {
            columns,
            primary_key: pk_positions.into_iter().map(|(_, name)| name).collect(),
            foreign_keys: grouped.into_values().collect(),
            sample_rows,
        })
    }

    fn query_rows(conn: &Connection, query: &ReadQuery) -> Result<Vec<Row>, CatalogError> {
        let mut stmt = conn.prepare(&query.sql)?;
        if !stmt.readonly() {
            return Err(CatalogError::Rejected(
                "only read-only statements may be executed".to_string(),
            ));
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            out.push(record);
        }
        Ok(out)
    }
}

impl SchemaCatalog for SqliteCatalog {
    fn get_tables(&self) -> Result<SchemaSnapshot, CatalogError> {
        let conn = self.connection.lock();
        let mut tables = SchemaSnapshot::new();
        for name in Self::table_names(&conn)? {
            let table = Self::describe_table(&conn, &name)?;
            tables.insert(name, table);
        }
        debug!("Discovered {} tables in {}", tables.len(), self.path.display());
        Ok(tables)
    }

    fn execute_read_query(&self, query: &ReadQuery) -> Result<Vec<Row>, CatalogError> {
        let conn = self.connection.lock();
        Self::query_rows(&conn, query)
    }
}

fn value_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(format!("<{} bytes>", b.len())),
    }
}

/// Create (or recreate) the demo company database at `path`.
///
/// Two tables: `departments` and `employees`, the latter with a foreign key on `dept_id`.
pub fn seed_sample_database(path: &Path) -> Result<(), CatalogError> {
    let conn = Connection::open(path).map_err(|source| CatalogError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS employees;
        DROP TABLE IF EXISTS departments;

        CREATE TABLE departments (
            dept_id INTEGER PRIMARY KEY,
            dept_name TEXT,
            manager_id INTEGER
        );

        CREATE TABLE employees (
            emp_id INTEGER PRIMARY KEY,
            full_name TEXT,
            dept_id INTEGER,
            position TEXT,
            annual_salary REAL,
            join_date TEXT,
            skills TEXT,
            reports_to INTEGER,
            office_location TEXT,
            FOREIGN KEY(dept_id) REFERENCES departments(dept_id)
        );

        INSERT INTO departments (dept_id, dept_name, manager_id) VALUES
            (1, 'Engineering', NULL),
            (2, 'Product', NULL),
            (3, 'HR', NULL);

        INSERT INTO employees (emp_id, full_name, dept_id, position, annual_salary, join_date, skills, reports_to, office_location) VALUES
            (1, 'Alice Johnson', 1, 'Senior Engineer', 120000, '2023-03-15', 'Python,SQL,ML', NULL, 'Bangalore'),
            (2, 'Bob Smith', 1, 'Engineer', 90000, '2024-01-10', 'Java,Python', 1, 'Bangalore'),
            (3, 'Carol Lee', 2, 'Product Manager', 110000, '2022-07-05', 'roadmaps,communication', NULL, 'Bangalore'),
            (4, 'David Kim', 1, 'Engineering Manager', 150000, '2019-10-01', 'management,python', NULL, 'Mumbai'),
            (5, 'Eve Patel', 3, 'HR Executive', 70000, '2021-11-11', 'people,process', NULL, 'Bangalore');
        "#,
    )?;

    debug!("Seeded sample database at {}", path.display());
    Ok(())
}
