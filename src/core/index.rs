use std::collections::HashMap;
use std::path::Path;
use std::thread;

use chrono::Utc;
use log::{error, info};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, Document, FieldValue};
use crate::query::ast::{QueryArgs, terms};
use crate::query::compiler::QueryCompiler;
use crate::schema::schema::{DefaultValue, Field, FieldType, Schema};
use crate::search::cursor::{self, SearchCursor};
use crate::spell::corrector::SpellCorrector;
use crate::storage::backend::{SqliteStorage, StorageBackend};
use crate::storage::ddl;
use crate::writer::buffer::{WriteBuffer, WriteOp};

/// Connection-like handle over one schema-defined index. Writes are
/// buffered and flushed transactionally; reads flush first so a handle
/// always observes its own writes. Dropping the handle flushes whatever
/// is still pending.
#[derive(Debug)]
pub struct SearchIndex {
    config: Config,
    schema: Schema,
    storage: SqliteStorage,
    buffer: Mutex<WriteBuffer>,
    writable: bool,
}

impl SearchIndex {
    /// Opens (and on first use creates) the index backing file. A
    /// read-only handle rejects every mutation with `ReadOnly` and never
    /// touches the storage schema.
    pub fn open<P: AsRef<Path>>(
        path: P,
        schema: &Schema,
        config: Config,
        writable: bool,
    ) -> Result<Self> {
        let storage = SqliteStorage::open(path, !writable, config.lock_timeout)?;
        let index = SearchIndex {
            buffer: Mutex::new(WriteBuffer::new(config.write_buffer_size)),
            schema: schema.clone(),
            storage,
            config,
            writable,
        };
        if writable {
            index.create_tables()?;
        }
        Ok(index)
    }

    /// Private in-memory index, writable by construction.
    pub fn in_memory(schema: &Schema, config: Config) -> Result<Self> {
        let storage = SqliteStorage::in_memory(config.lock_timeout)?;
        let index = SearchIndex {
            buffer: Mutex::new(WriteBuffer::new(config.write_buffer_size)),
            schema: schema.clone(),
            storage,
            config,
            writable: true,
        };
        index.create_tables()?;
        Ok(index)
    }

    fn create_tables(&self) -> Result<()> {
        self.storage.execute(&ddl::content_table(&self.schema), &[])?;
        self.storage.execute(&ddl::fts_table(&self.schema), &[])?;
        for trigger in ddl::sync_triggers(&self.schema) {
            self.storage.execute(&trigger, &[])?;
        }
        for index_sql in ddl::ordinary_indexes(&self.schema) {
            self.storage.execute(&index_sql, &[])?;
        }
        info!("index '{}' ready", self.schema.name);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn StorageBackend {
        &self.storage
    }

    fn assure_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::new(
                ErrorKind::ReadOnly,
                format!("Index '{}' was opened read-only.", self.schema.name),
            ));
        }
        Ok(())
    }

    /// Queues a new document. Every schema field must be given unless it
    /// declares a default; values are type-checked before queueing.
    pub fn insert(&self, fields: &[(&str, FieldValue)]) -> Result<()> {
        self.assure_writable()?;
        let validated = self.complete_insert_fields(fields)?;
        self.queue(WriteOp::Insert { fields: validated })
    }

    /// Queues a partial update of the addressed document. Only the given
    /// fields change.
    pub fn update(&self, id: DocId, fields: &[(&str, FieldValue)]) -> Result<()> {
        self.assure_writable()?;
        let validated = self.check_given_fields(fields)?;
        if validated.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Update without any fields.".to_string(),
            ));
        }
        self.queue(WriteOp::Update { id, fields: validated })
    }

    pub fn delete(&self, id: DocId) -> Result<()> {
        self.assure_writable()?;
        self.queue(WriteOp::Delete { id })
    }

    /// Upsert keyed on the schema's identity field: updates the document
    /// whose identity value matches, inserts otherwise. Requires an `id()`
    /// field in the schema and flushes the buffer to make the decision on
    /// committed state.
    pub fn insert_or_update(&self, fields: &[(&str, FieldValue)]) -> Result<()> {
        self.assure_writable()?;
        let id_field = self.schema.id_field().ok_or_else(|| {
            Error::new(
                ErrorKind::SchemaViolation,
                format!(
                    "Schema '{}' declares no id field; insert_or_update needs one.",
                    self.schema.name
                ),
            )
        })?;
        let id_name = id_field.name.clone();
        let key = fields
            .iter()
            .find(|(n, _)| *n == id_name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::SchemaViolation,
                    format!("Missing value for id field '{}'.", id_name),
                )
            })?;
        self.flush()?;
        let rows = self.storage.query(
            &format!(
                "SELECT id FROM {} WHERE {} = ? LIMIT 1",
                self.schema.name, id_name
            ),
            &[key],
        )?;
        match rows.first().and_then(|r| r.get("id")).and_then(|v| v.as_int()) {
            Some(id) => self.update(DocId::new(id), fields),
            None => self.insert(fields),
        }
    }

    /// Fetches one document by its rowid identity, flushing first so the
    /// handle observes its own writes.
    pub fn get(&self, id: DocId) -> Result<Document> {
        self.flush()?;
        let sql = format!(
            "SELECT id, {} FROM {} WHERE id = ?",
            self.schema.field_names().join(", "),
            self.schema.name
        );
        let rows = self.storage.query(&sql, &[FieldValue::Int(id.value())])?;
        match rows.first() {
            Some(row) => cursor::document_from_row(&self.schema, row),
            None => Err(Error::new(
                ErrorKind::NotFound,
                format!("No document with id {}.", id.value()),
            )),
        }
    }

    /// Validates the arguments eagerly and hands back a lazy cursor; the
    /// statement itself runs on the cursor's first accessor.
    pub fn search<A: Into<QueryArgs>>(&self, args: A) -> Result<SearchCursor<'_>> {
        self.flush()?;
        let args = args.into();
        QueryCompiler::new(&self.schema).validate(&args)?;
        Ok(SearchCursor::new(self, args))
    }

    /// Search-as-you-type over one indexed text field: the final token of
    /// the input matches as a prefix, earlier tokens match exactly.
    pub fn autocomplete(&self, field: &str, value: &str) -> Result<SearchCursor<'_>> {
        if field.contains("__") {
            return Err(Error::new(
                ErrorKind::InvalidLookup,
                format!("Lookups are not available in autocomplete ('{}').", field),
            ));
        }
        match self.schema.field(field) {
            None => {
                return Err(Error::new(
                    ErrorKind::SchemaViolation,
                    format!("'{}' is not defined in the schema.", field),
                ));
            }
            Some(f) if !f.is_fts() => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("Field '{}' is not part of the full-text index.", field),
                ));
            }
            Some(_) => {}
        }
        self.flush()?;
        Ok(SearchCursor::new_autocomplete(
            self,
            terms().set(field, value),
        ))
    }

    /// Rebuilds the spell-correction index from the committed vocabulary.
    pub fn build_spell_index(&self) -> Result<()> {
        self.assure_writable()?;
        self.flush()?;
        SpellCorrector::new(&self.storage, &self.schema, self.config.suggest_candidates).build()
    }

    /// Per-word correction candidates, ranked by edit distance.
    pub fn suggest(&self, text: &str) -> Result<HashMap<String, Vec<(String, usize)>>> {
        SpellCorrector::new(&self.storage, &self.schema, self.config.suggest_candidates)
            .suggest(text)
    }

    /// Writes every queued operation as one transaction.
    pub fn flush(&self) -> Result<()> {
        self.buffer.lock().flush(&self.storage, &self.schema)
    }

    pub fn pending_writes(&self) -> usize {
        self.buffer.lock().pending_len()
    }

    /// Flushes and consumes the handle.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    fn queue(&self, op: WriteOp) -> Result<()> {
        let due = self.buffer.lock().push(op);
        if due {
            self.flush()?;
        }
        Ok(())
    }

    /// Completes an insert against the schema: unknown names are rejected,
    /// absent fields take their declared default or fail.
    fn complete_insert_fields(
        &self,
        given: &[(&str, FieldValue)],
    ) -> Result<Vec<(String, FieldValue)>> {
        self.reject_unknown(given)?;
        let mut out = Vec::with_capacity(self.schema.fields.len());
        for field in &self.schema.fields {
            match given.iter().find(|(n, _)| *n == field.name) {
                Some((_, value)) => {
                    out.push((field.name.clone(), coerce_value(field, value.clone())?));
                }
                None => match field.default {
                    Some(default) => out.push((field.name.clone(), generate_default(field, default))),
                    None => {
                        return Err(Error::new(
                            ErrorKind::SchemaViolation,
                            format!("Missing value for field '{}'.", field.name),
                        ));
                    }
                },
            }
        }
        Ok(out)
    }

    fn check_given_fields(&self, given: &[(&str, FieldValue)]) -> Result<Vec<(String, FieldValue)>> {
        self.reject_unknown(given)?;
        let mut out = Vec::with_capacity(given.len());
        for (name, value) in given {
            // reject_unknown guarantees the field exists
            if let Some(field) = self.schema.field(name) {
                out.push((field.name.clone(), coerce_value(field, value.clone())?));
            }
        }
        Ok(out)
    }

    fn reject_unknown(&self, given: &[(&str, FieldValue)]) -> Result<()> {
        for (idx, (name, _)) in given.iter().enumerate() {
            if self.schema.field(name).is_none() {
                return Err(Error::new(
                    ErrorKind::SchemaViolation,
                    format!("'{}' is not defined in the schema.", name),
                ));
            }
            if given[..idx].iter().any(|(n, _)| n == name) {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("Field '{}' is given more than once.", name),
                ));
            }
        }
        Ok(())
    }
}

impl Drop for SearchIndex {
    fn drop(&mut self) {
        if self.buffer.lock().is_empty() {
            return;
        }
        // A panicking thread must not commit a half-built batch.
        if thread::panicking() {
            self.buffer.lock().discard();
            return;
        }
        if let Err(err) = self.flush() {
            error!(
                "flush of pending writes on drop of index '{}' failed: {}",
                self.schema.name, err
            );
        }
    }
}

fn generate_default(field: &Field, default: DefaultValue) -> FieldValue {
    match default {
        DefaultValue::Uuid => FieldValue::Text(Uuid::new_v4().to_string()),
        DefaultValue::Now => {
            let now = Utc::now().naive_utc();
            if field.field_type == FieldType::Date {
                FieldValue::Date(now.date())
            } else {
                FieldValue::Datetime(now)
            }
        }
    }
}

/// Type-checks one value against its declared field. Integers widen to
/// reals; every other cross-type combination is rejected.
fn coerce_value(field: &Field, value: FieldValue) -> Result<FieldValue> {
    let accepted = match (&field.field_type, &value) {
        (_, FieldValue::Null) => true,
        (FieldType::Text, FieldValue::Text(_)) => true,
        (FieldType::Int, FieldValue::Int(_)) => true,
        (FieldType::Real, FieldValue::Real(_)) => true,
        (FieldType::Real, FieldValue::Int(i)) => {
            return Ok(FieldValue::Real(*i as f64));
        }
        (FieldType::Blob, FieldValue::Blob(_)) => true,
        (FieldType::Date, FieldValue::Date(_)) => true,
        (FieldType::Datetime, FieldValue::Datetime(_)) => true,
        _ => false,
    };
    if !accepted {
        return Err(Error::new(
            ErrorKind::SchemaViolation,
            format!(
                "Value {:?} does not fit field '{}' of type {:?}.",
                value, field.name, field.field_type
            ),
        ));
    }
    Ok(value)
}
