use std::time::Instant;

use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::core::safety::FixType;
use crate::error::DeskError;

/// Database engines the service recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
    Mysql,
}

impl DatabaseKind {
    pub fn from_wire(name: &str) -> Result<Self, DeskError> {
        match name {
            "sqlite" => Ok(DatabaseKind::Sqlite),
            "postgres" => Ok(DatabaseKind::Postgres),
            "mysql" => Ok(DatabaseKind::Mysql),
            other => Err(DeskError::InvalidInput(format!(
                "unsupported database type: {}",
                other
            ))),
        }
    }
}

/// Result of applying a fix to a live database.
#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub success: bool,
    pub message: String,
    pub rows_affected: u64,
    pub execution_time_ms: f64,
    pub error: Option<String>,
}

/// Executes verified fixes on client databases. Only runs after the safety
/// layer gives the green light.
///
/// SQLite is supported natively; postgres and mysql connection strings are
/// recognized but rejected in this build.
#[derive(Default)]
pub struct DatabaseFixer;

impl DatabaseFixer {
    pub fn new() -> Self {
        Self
    }

    pub fn apply_fix(
        &self,
        code: &str,
        fix_type: FixType,
        db_kind: DatabaseKind,
        connection_string: &str,
    ) -> FixOutcome {
        let start = Instant::now();

        if fix_type != FixType::Sql {
            return FixOutcome {
                success: false,
                message: "Fix failed to apply".to_string(),
                rows_affected: 0,
                execution_time_ms: elapsed_ms(start),
                error: Some("only SQL fixes can be applied in this build".to_string()),
            };
        }

        match self.apply_sql(code, db_kind, connection_string) {
            Ok(rows_affected) => {
                info!("fix applied, {} rows affected", rows_affected);
                FixOutcome {
                    success: true,
                    message: "Fix applied successfully to sqlite database".to_string(),
                    rows_affected,
                    execution_time_ms: elapsed_ms(start),
                    error: None,
                }
            }
            Err(e) => {
                warn!("fix failed to apply: {e}");
                FixOutcome {
                    success: false,
                    message: "Fix failed to apply".to_string(),
                    rows_affected: 0,
                    execution_time_ms: elapsed_ms(start),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn apply_sql(
        &self,
        code: &str,
        db_kind: DatabaseKind,
        connection_string: &str,
    ) -> Result<u64, DeskError> {
        let mut conn = self.connect(db_kind, connection_string)?;

        // All statements commit together; any error rolls the whole fix back.
        let tx = conn.transaction()?;
        let mut rows_affected: u64 = 0;
        for statement in code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let mut prepared = tx.prepare(statement)?;
            if prepared.column_count() == 0 {
                rows_affected += prepared.execute([])? as u64;
            } else {
                let mut rows = prepared.query([])?;
                while rows.next()?.is_some() {
                    rows_affected += 1;
                }
            }
        }
        tx.commit()?;

        Ok(rows_affected)
    }

    fn connect(
        &self,
        db_kind: DatabaseKind,
        connection_string: &str,
    ) -> Result<Connection, DeskError> {
        match db_kind {
            DatabaseKind::Sqlite => {
                let path = connection_string
                    .strip_prefix("sqlite://")
                    .unwrap_or(connection_string);
                Ok(Connection::open(path)?)
            }
            DatabaseKind::Postgres | DatabaseKind::Mysql => Err(DeskError::InvalidInput(
                "postgres/mysql execution is not supported in this build".to_string(),
            )),
        }
    }

    /// Test whether a database connection is usable.
    pub fn verify_connection(
        &self,
        db_kind: DatabaseKind,
        connection_string: &str,
    ) -> Result<String, DeskError> {
        let conn = self.connect(db_kind, connection_string)?;
        let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        Ok(format!("Connected successfully. Version: {version}"))
    }

    /// Concatenated DDL of every table, used as LLM context.
    pub fn get_schema(
        &self,
        db_kind: DatabaseKind,
        connection_string: &str,
    ) -> Result<Option<String>, DeskError> {
        let conn = self.connect(db_kind, connection_string)?;
        let mut statement = conn
            .prepare("SELECT sql FROM sqlite_master WHERE type='table' AND sql IS NOT NULL")?;
        let ddl: Vec<String> = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        if ddl.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ddl.join("\n\n")))
        }
    }

    /// Sample rows from a table, formatted for LLM context. The table name is
    /// checked against the schema before it is interpolated into SQL.
    pub fn get_sample_data(
        &self,
        db_kind: DatabaseKind,
        connection_string: &str,
        table_name: &str,
        limit: usize,
    ) -> Result<String, DeskError> {
        let conn = self.connect(db_kind, connection_string)?;

        let known: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?1",
            [table_name],
            |row| row.get(0),
        )?;
        if !known {
            return Err(DeskError::InvalidInput(format!(
                "unknown table: {}",
                table_name
            )));
        }

        let mut statement =
            conn.prepare(&format!("SELECT * FROM \"{table_name}\" LIMIT {limit}"))?;
        let columns: Vec<String> = statement
            .column_names()
            .iter()
            .map(|c| c.to_string())
            .collect();

        let mut output = columns.join(" | ");
        output.push('\n');
        output.push_str(&"-".repeat(output.len()));
        output.push('\n');

        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                let cell: rusqlite::types::Value = row.get(index)?;
                cells.push(format_cell(&cell));
            }
            output.push_str(&cells.join(" | "));
            output.push('\n');
        }

        Ok(output)
    }
}

fn format_cell(value: &rusqlite::types::Value) -> String {
    use rusqlite::types::Value;
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded_db(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("client.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, status TEXT, total REAL);
             INSERT INTO orders (status, total) VALUES ('pending', 10.0), ('pending', 20.0), ('shipped', 5.0);",
        )
        .unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_database_kind_parsing() {
        assert_eq!(DatabaseKind::from_wire("sqlite").unwrap(), DatabaseKind::Sqlite);
        assert!(DatabaseKind::from_wire("oracle").is_err());
    }

    #[test]
    fn test_apply_fix_updates_rows() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let fixer = DatabaseFixer::new();

        let outcome = fixer.apply_fix(
            "UPDATE orders SET status = 'cancelled' WHERE status = 'pending'",
            FixType::Sql,
            DatabaseKind::Sqlite,
            &db,
        );
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.rows_affected, 2);

        let conn = Connection::open(&db).unwrap();
        let cancelled: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM orders WHERE status = 'cancelled'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(cancelled, 2);
    }

    #[test]
    fn test_failed_fix_rolls_back() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let fixer = DatabaseFixer::new();

        let outcome = fixer.apply_fix(
            "UPDATE orders SET status = 'x' WHERE id = 1; UPDATE nope SET y = 2 WHERE id = 1",
            FixType::Sql,
            DatabaseKind::Sqlite,
            &db,
        );
        assert!(!outcome.success);

        let conn = Connection::open(&db).unwrap();
        let first: String = conn
            .query_row("SELECT status FROM orders WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(first, "pending");
    }

    #[test]
    fn test_python_fix_rejected() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let outcome = DatabaseFixer::new().apply_fix(
            "cursor.execute('...')",
            FixType::Python,
            DatabaseKind::Sqlite,
            &db,
        );
        assert!(!outcome.success);
    }

    #[test]
    fn test_postgres_rejected() {
        let fixer = DatabaseFixer::new();
        let err = fixer
            .verify_connection(DatabaseKind::Postgres, "postgres://localhost/db")
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidInput(_)));
    }

    #[test]
    fn test_verify_connection_and_schema() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let fixer = DatabaseFixer::new();

        let message = fixer
            .verify_connection(DatabaseKind::Sqlite, &db)
            .unwrap();
        assert!(message.contains("Connected successfully"));

        let schema = fixer
            .get_schema(DatabaseKind::Sqlite, &db)
            .unwrap()
            .unwrap();
        assert!(schema.contains("CREATE TABLE orders"));
    }

    #[test]
    fn test_sample_data_validates_table_name() {
        let dir = tempdir().unwrap();
        let db = seeded_db(&dir);
        let fixer = DatabaseFixer::new();

        let sample = fixer
            .get_sample_data(DatabaseKind::Sqlite, &db, "orders", 2)
            .unwrap();
        assert!(sample.starts_with("id | status | total"));
        assert!(sample.contains("pending"));

        let err = fixer
            .get_sample_data(DatabaseKind::Sqlite, &db, "orders; DROP TABLE orders", 2)
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidInput(_)));
    }
}
