use std::path::Path;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, OpenFlags, ToSql, params_from_iter};

use crate::core::error::Result;
use crate::core::types::FieldValue;

/// Narrow interface the core talks to. Single-statement execution is
/// atomic; batches between `begin` and `commit` are all-or-nothing.
pub trait StorageBackend {
    fn execute(&self, sql: &str, params: &[FieldValue]) -> Result<usize>;
    fn query(&self, sql: &str, params: &[FieldValue]) -> Result<Vec<RawRow>>;
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    fn last_insert_id(&self) -> Result<i64>;
}

/// One fetched row, column order preserved.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub columns: Vec<(String, FieldValue)>,
}

impl RawRow {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// SQLite connection behind the `StorageBackend` seam. The busy timeout
/// doubles as the writer-lock timeout: a second writer blocks until the
/// first commits or the timeout elapses with `LockTimeout`.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool, lock_timeout: Duration) -> Result<Self> {
        let conn = if read_only {
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?
        } else {
            Connection::open(path)?
        };
        conn.busy_timeout(lock_timeout)?;
        Ok(SqliteStorage { conn: Mutex::new(conn) })
    }

    /// Private store; two in-memory handles never share state.
    pub fn in_memory(lock_timeout: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(lock_timeout)?;
        Ok(SqliteStorage { conn: Mutex::new(conn) })
    }
}

impl StorageBackend for SqliteStorage {
    fn execute(&self, sql: &str, params: &[FieldValue]) -> Result<usize> {
        debug!("execute: {} {:?}", sql, params);
        let conn = self.conn.lock();
        let changed = conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(changed)
    }

    fn query(&self, sql: &str, params: &[FieldValue]) -> Result<Vec<RawRow>> {
        debug!("query: {} {:?}", sql, params);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(names.len());
            for (idx, name) in names.iter().enumerate() {
                columns.push((name.clone(), value_from_ref(row.get_ref(idx)?)));
            }
            out.push(RawRow { columns });
        }
        Ok(out)
    }

    fn begin(&self) -> Result<()> {
        debug!("begin immediate");
        self.conn.lock().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        debug!("commit");
        self.conn.lock().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        debug!("rollback");
        self.conn.lock().execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn last_insert_id(&self) -> Result<i64> {
        Ok(self.conn.lock().last_insert_rowid())
    }
}

fn value_from_ref(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(i) => FieldValue::Int(i),
        ValueRef::Real(r) => FieldValue::Real(r),
        ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => FieldValue::Blob(b.to_vec()),
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Int(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            FieldValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            FieldValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            FieldValue::Date(d) => {
                ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string()))
            }
            FieldValue::Datetime(dt) => {
                ToSqlOutput::Owned(Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn round_trips_values_through_a_table() {
        let storage = SqliteStorage::in_memory(Duration::from_millis(100)).unwrap();
        storage
            .execute("CREATE TABLE t (a TEXT, b INTEGER, c REAL)", &[])
            .unwrap();
        storage
            .execute(
                "INSERT INTO t (a, b, c) VALUES (?, ?, ?)",
                &[
                    FieldValue::Text("x".to_string()),
                    FieldValue::Int(7),
                    FieldValue::Real(1.5),
                ],
            )
            .unwrap();
        assert_eq!(storage.last_insert_id().unwrap(), 1);
        let rows = storage.query("SELECT a, b, c FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("a"), Some(&FieldValue::Text("x".to_string())));
        assert_eq!(rows[0].get("b"), Some(&FieldValue::Int(7)));
        assert_eq!(rows[0].get("c"), Some(&FieldValue::Real(1.5)));
    }

    #[test]
    fn rollback_discards_the_batch() {
        let storage = SqliteStorage::in_memory(Duration::from_millis(100)).unwrap();
        storage.execute("CREATE TABLE t (a TEXT)", &[]).unwrap();
        storage.begin().unwrap();
        storage
            .execute("INSERT INTO t (a) VALUES (?)", &[FieldValue::Text("x".into())])
            .unwrap();
        storage.rollback().unwrap();
        assert!(storage.query("SELECT a FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn second_writer_times_out_with_lock_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let first = SqliteStorage::open(&path, false, Duration::from_millis(50)).unwrap();
        let second = SqliteStorage::open(&path, false, Duration::from_millis(50)).unwrap();
        first.execute("CREATE TABLE t (a TEXT)", &[]).unwrap();

        first.begin().unwrap();
        first
            .execute("INSERT INTO t (a) VALUES (?)", &[FieldValue::Text("x".into())])
            .unwrap();
        let err = second.begin().unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockTimeout);
        first.commit().unwrap();

        // Lock released: the second writer proceeds.
        second.begin().unwrap();
        second
            .execute("INSERT INTO t (a) VALUES (?)", &[FieldValue::Text("y".into())])
            .unwrap();
        second.commit().unwrap();
        assert_eq!(second.query("SELECT a FROM t", &[]).unwrap().len(), 2);
    }
}
