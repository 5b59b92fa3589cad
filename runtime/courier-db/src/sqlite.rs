//! SQLite connector for the courier dispatch layer.

use crate::registry::MEMORY_SENTINEL;
use crate::value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 100;

/// Engine configuration derived from the requested path.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub filename: String,
    pub memory: bool,
}

impl EngineConfig {
    pub fn for_path(path: &str) -> Self {
        Self {
            filename: path.to_string(),
            memory: path == MEMORY_SENTINEL,
        }
    }
}

/// One SQL operation inside a batch.
#[derive(Debug, Deserialize)]
pub struct BatchOp {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
}

/// Rows produced by a single statement. Empty for statements without output.
#[derive(Debug, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub values: Vec<Vec<JsonValue>>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            values: Vec::new(),
        }
    }
}

/// An open database connection owned by the handle registry.
pub struct SqliteHandle {
    conn: Connection,
}

impl SqliteHandle {
    pub fn open(config: &EngineConfig, busy_timeout: Duration) -> Result<Self, rusqlite::Error> {
        let conn = if config.memory {
            Connection::open_in_memory()?
        } else {
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
            Connection::open_with_flags(&config.filename, flags)?
        };
        conn.busy_timeout(busy_timeout)?;
        Ok(Self { conn })
    }

    /// Runs one statement with positional parameters. Statements that
    /// produce no rows (DDL, INSERT, ...) return an empty result.
    pub fn exec(&mut self, sql: &str, params: &[JsonValue]) -> Result<QueryResult, String> {
        let bound = value::bind_params(params)?;
        let mut stmt = self.conn.prepare(sql).map_err(|err| err.to_string())?;
        let column_count = stmt.column_count();
        if column_count == 0 {
            stmt.execute(params_from_iter(bound.iter()))
                .map_err(|err| err.to_string())?;
            return Ok(QueryResult::empty());
        }
        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let mut rows = stmt
            .query(params_from_iter(bound.iter()))
            .map_err(|err| err.to_string())?;
        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(|err| err.to_string())? {
            let mut record = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let cell = row.get_ref(idx).map_err(|err| err.to_string())?;
                record.push(value::from_sql(cell));
            }
            values.push(record);
        }
        Ok(QueryResult { columns, values })
    }

    /// Runs the operations inside one transaction. Any failure rolls the
    /// transaction back and discards results collected so far.
    pub fn run_batch(&mut self, ops: &[BatchOp]) -> Result<Vec<QueryResult>, String> {
        self.exec_literal("BEGIN TRANSACTION")?;
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            match self.exec(&op.sql, &op.params) {
                Ok(result) => results.push(result),
                Err(err) => {
                    if let Err(rollback_err) = self.exec_literal("ROLLBACK") {
                        return Err(format!("{err} (rollback also failed: {rollback_err})"));
                    }
                    return Err(err);
                }
            }
        }
        self.exec_literal("COMMIT").map_err(|err| {
            let _ = self.exec_literal("ROLLBACK");
            err
        })?;
        Ok(results)
    }

    fn exec_literal(&mut self, sql: &str) -> Result<(), String> {
        self.conn.execute_batch(sql).map_err(|err| err.to_string())
    }

    /// The engine releases the connection on drop; close() exists so the
    /// registry can make teardown explicit at the call site.
    pub fn close(self) {
        let _ = self.conn.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_handle() -> SqliteHandle {
        let config = EngineConfig::for_path(MEMORY_SENTINEL);
        SqliteHandle::open(&config, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
            .expect("open in-memory")
    }

    #[test]
    fn exec_roundtrip_with_params() {
        let mut handle = memory_handle();
        handle
            .exec("CREATE TABLE t (x INTEGER, name TEXT)", &[])
            .expect("create");
        handle
            .exec("INSERT INTO t VALUES (?1, ?2)", &[json!(1), json!("one")])
            .expect("insert");
        let result = handle.exec("SELECT x, name FROM t", &[]).expect("select");
        assert_eq!(result.columns, vec!["x", "name"]);
        assert_eq!(result.values, vec![vec![json!(1), json!("one")]]);
    }

    #[test]
    fn exec_without_rows_returns_empty_result() {
        let mut handle = memory_handle();
        let result = handle.exec("CREATE TABLE t (x)", &[]).expect("create");
        assert_eq!(result, QueryResult::empty());
    }

    #[test]
    fn exec_surfaces_engine_errors() {
        let mut handle = memory_handle();
        let err = handle.exec("SELECT * FROM missing", &[]).expect_err("error");
        assert!(err.contains("missing"), "unexpected message: {err}");
    }

    #[test]
    fn batch_commits_in_submission_order() {
        let mut handle = memory_handle();
        handle.exec("CREATE TABLE t (x)", &[]).expect("create");
        let ops = vec![
            BatchOp {
                sql: "INSERT INTO t VALUES (?1)".to_string(),
                params: vec![json!(1)],
            },
            BatchOp {
                sql: "INSERT INTO t VALUES (?1)".to_string(),
                params: vec![json!(2)],
            },
            BatchOp {
                sql: "SELECT x FROM t ORDER BY x".to_string(),
                params: vec![],
            },
        ];
        let results = handle.run_batch(&ops).expect("batch");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], QueryResult::empty());
        assert_eq!(results[2].values, vec![vec![json!(1)], vec![json!(2)]]);
    }

    #[test]
    fn failed_batch_rolls_back_applied_operations() {
        let mut handle = memory_handle();
        handle.exec("CREATE TABLE t (x)", &[]).expect("create");
        let ops = vec![
            BatchOp {
                sql: "INSERT INTO t VALUES (1)".to_string(),
                params: vec![],
            },
            BatchOp {
                sql: "INSERT INTO nowhere VALUES (2)".to_string(),
                params: vec![],
            },
        ];
        handle.run_batch(&ops).expect_err("batch must fail");
        let result = handle.exec("SELECT x FROM t", &[]).expect("select");
        assert!(result.values.is_empty(), "first insert was not rolled back");
    }

    #[test]
    fn memory_sentinel_selects_memory_config() {
        let config = EngineConfig::for_path(MEMORY_SENTINEL);
        assert!(config.memory);
        let config = EngineConfig::for_path("/tmp/data.db");
        assert!(!config.memory);
    }
}
