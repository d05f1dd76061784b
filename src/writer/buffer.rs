use log::warn;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, FieldValue};
use crate::schema::schema::Schema;
use crate::storage::backend::StorageBackend;

/// A pending mutation, validated against the schema before it is queued.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert { fields: Vec<(String, FieldValue)> },
    Update { id: DocId, fields: Vec<(String, FieldValue)> },
    Delete { id: DocId },
}

/// Ordered queue of pending mutations, flushed as one transaction when the
/// counter reaches the configured threshold, on explicit flush, or at
/// scope exit. A failed flush rolls the whole batch back.
#[derive(Debug)]
pub struct WriteBuffer {
    pending: Vec<WriteOp>,
    threshold: usize,
}

impl WriteBuffer {
    pub fn new(threshold: usize) -> Self {
        WriteBuffer {
            pending: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    /// Queues an operation; returns true once the buffer is due for a flush.
    pub fn push(&mut self, op: WriteOp) -> bool {
        self.pending.push(op);
        self.pending.len() >= self.threshold
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops all queued operations without touching the store.
    pub fn discard(&mut self) {
        if !self.pending.is_empty() {
            warn!("discarding {} buffered write operations", self.pending.len());
            self.pending.clear();
        }
    }

    /// Flushes the queue as a single transaction. On any failure the
    /// transaction is rolled back, the queue stays consumed, and the error
    /// propagates as `TransactionFailure` (lock timeouts keep their kind).
    pub fn flush(&mut self, storage: &dyn StorageBackend, schema: &Schema) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.pending);
        storage.begin()?;
        for op in &ops {
            if let Err(err) = apply(storage, schema, op) {
                if let Err(rb) = storage.rollback() {
                    warn!("rollback after failed flush also failed: {}", rb);
                }
                return Err(wrap_flush_error(err));
            }
        }
        if let Err(err) = storage.commit() {
            if let Err(rb) = storage.rollback() {
                warn!("rollback after failed commit also failed: {}", rb);
            }
            return Err(wrap_flush_error(err));
        }
        Ok(())
    }
}

fn wrap_flush_error(err: Error) -> Error {
    match err.kind {
        ErrorKind::LockTimeout => err,
        _ => Error::new(
            ErrorKind::TransactionFailure,
            format!("Write buffer flush failed and was rolled back: {}", err),
        ),
    }
}

fn apply(storage: &dyn StorageBackend, schema: &Schema, op: &WriteOp) -> Result<()> {
    let table = &schema.name;
    match op {
        WriteOp::Insert { fields } => {
            let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
            let values: Vec<FieldValue> = fields.iter().map(|(_, v)| v.clone()).collect();
            let placeholders = vec!["?"; values.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                placeholders
            );
            storage.execute(&sql, &values)?;
        }
        WriteOp::Update { id, fields } => {
            let assignments: Vec<String> =
                fields.iter().map(|(n, _)| format!("{} = ?", n)).collect();
            let mut values: Vec<FieldValue> = fields.iter().map(|(_, v)| v.clone()).collect();
            values.push(FieldValue::Int(id.value()));
            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?",
                table,
                assignments.join(", ")
            );
            storage.execute(&sql, &values)?;
        }
        WriteOp::Delete { id } => {
            let sql = format!("DELETE FROM {} WHERE id = ?", table);
            storage.execute(&sql, &[FieldValue::Int(id.value())])?;
        }
    }
    Ok(())
}
