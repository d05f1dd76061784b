use chrono::{NaiveDate, NaiveDateTime};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::index::SearchIndex;
use crate::core::types::{DocId, Document, FieldValue};
use crate::query::ast::QueryArgs;
use crate::query::compiler::{
    HighlightSpec, OrderSpec, QueryCompiler, QueryPlan, SnippetSpec,
};
use crate::schema::schema::{FieldType, Schema};
use crate::storage::backend::RawRow;

#[derive(Debug)]
enum CursorState {
    Pending,
    Materialized(Vec<Document>),
}

/// A compiled-but-unexecuted query. The first accessor (`get`, `iter`,
/// `documents`, `count`) materializes the row set exactly once and caches
/// it; ordering and formatting options are frozen from that point on.
#[derive(Debug)]
pub struct SearchCursor<'a> {
    index: &'a SearchIndex,
    plan: QueryPlan,
    state: CursorState,
    count_cache: Option<u64>,
}

impl<'a> SearchCursor<'a> {
    pub(crate) fn new(index: &'a SearchIndex, args: QueryArgs) -> Self {
        SearchCursor {
            plan: QueryPlan::new(args, index.config().default_limit),
            index,
            state: CursorState::Pending,
            count_cache: None,
        }
    }

    pub(crate) fn new_autocomplete(index: &'a SearchIndex, args: QueryArgs) -> Self {
        let mut cursor = SearchCursor::new(index, args);
        cursor.plan.autocomplete = true;
        cursor
    }

    fn executed(&self) -> bool {
        matches!(self.state, CursorState::Materialized(_)) || self.count_cache.is_some()
    }

    fn reject_executed(&self, what: &str) -> Result<()> {
        if self.executed() {
            return Err(Error::new(
                ErrorKind::AlreadyExecuted,
                format!("{} must be set before the cursor executes.", what),
            ));
        }
        Ok(())
    }

    /// Replaces the ordering spec. Accepts `field`, `+field` and `-field`;
    /// `rank` orders by relevance.
    pub fn order_by(&mut self, fields: &[&str]) -> Result<&mut Self> {
        self.reject_executed("order_by")?;
        let mut specs = Vec::new();
        for raw in fields {
            let spec = OrderSpec::parse(raw);
            if spec.field != "rank"
                && spec.field != "id"
                && self.index.schema().field(&spec.field).is_none()
            {
                return Err(Error::new(
                    ErrorKind::SchemaViolation,
                    format!("'{}' is not defined in the schema.", spec.field),
                ));
            }
            specs.push(spec);
        }
        self.plan.order_by = specs;
        Ok(self)
    }

    /// Row window applied at execution, replacing the default limit.
    pub fn window(&mut self, offset: usize, limit: usize) -> Result<&mut Self> {
        self.reject_executed("window")?;
        self.plan.offset = offset;
        self.plan.limit = limit;
        Ok(self)
    }

    /// Wraps matched terms of the given indexed text fields in markers.
    pub fn highlight(&mut self, fields: &[&str], start: &str, end: &str) -> Result<&mut Self> {
        self.reject_executed("highlight")?;
        for name in fields {
            self.assure_fts_field(name)?;
        }
        self.plan.highlight = Some(HighlightSpec {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            start: start.to_string(),
            end: end.to_string(),
        });
        Ok(self)
    }

    /// Replaces a field with a snippet of at most `length` tokens around
    /// the match. `length` must lie strictly between 0 and 64.
    pub fn snippet(
        &mut self,
        field: &str,
        length: u32,
        before: &str,
        after: &str,
    ) -> Result<&mut Self> {
        self.reject_executed("snippet")?;
        if !(1..=63).contains(&length) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Snippet length must be between 1 and 63, got {}.", length),
            ));
        }
        self.assure_fts_field(field)?;
        self.plan.snippet = Some(SnippetSpec {
            field: field.to_string(),
            length,
            before: before.to_string(),
            after: after.to_string(),
        });
        Ok(self)
    }

    fn assure_fts_field(&self, name: &str) -> Result<()> {
        match self.index.schema().field(name) {
            None => Err(Error::new(
                ErrorKind::SchemaViolation,
                format!("'{}' is not defined in the schema.", name),
            )),
            Some(f) if !f.is_fts() => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Field '{}' is not part of the full-text index.", name),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Number of matching rows, ignoring the row window. Executes (and
    /// freezes) the cursor on first call; the result is memoized.
    pub fn count(&mut self) -> Result<u64> {
        if let Some(count) = self.count_cache {
            return Ok(count);
        }
        let compiler = QueryCompiler::new(self.index.schema());
        let compiled = compiler.compile_count(&self.plan)?;
        let rows = self.index.backend().query(&compiled.sql, &compiled.params)?;
        let count = rows
            .first()
            .and_then(|r| r.columns.first())
            .and_then(|(_, v)| v.as_int())
            .unwrap_or(0) as u64;
        self.count_cache = Some(count);
        Ok(count)
    }

    fn materialize(&mut self) -> Result<()> {
        if matches!(self.state, CursorState::Materialized(_)) {
            return Ok(());
        }
        let compiler = QueryCompiler::new(self.index.schema());
        let compiled = compiler.compile(&self.plan)?;
        let rows = self.index.backend().query(&compiled.sql, &compiled.params)?;
        let schema = self.index.schema();
        let documents = rows
            .iter()
            .map(|row| document_from_row(schema, row))
            .collect::<Result<Vec<_>>>()?;
        self.state = CursorState::Materialized(documents);
        Ok(())
    }

    /// The materialized row set, executing the query on first access.
    pub fn documents(&mut self) -> Result<&[Document]> {
        self.materialize()?;
        match &self.state {
            CursorState::Materialized(docs) => Ok(docs),
            CursorState::Pending => unreachable!("materialize() always transitions"),
        }
    }

    pub fn get(&mut self, index: usize) -> Result<Option<&Document>> {
        Ok(self.documents()?.get(index))
    }

    pub fn iter(&mut self) -> Result<std::slice::Iter<'_, Document>> {
        Ok(self.documents()?.iter())
    }

    pub fn len(&mut self) -> Result<usize> {
        Ok(self.documents()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.documents()?.is_empty())
    }
}

/// Maps a fetched row onto a `Document`, restoring date/datetime values
/// from their stored text form.
pub(crate) fn document_from_row(schema: &Schema, row: &RawRow) -> Result<Document> {
    let id = row
        .get("id")
        .and_then(|v| v.as_int())
        .ok_or_else(|| Error::new(ErrorKind::Storage, "Row without id column.".to_string()))?;
    let mut document = Document::new(DocId::new(id));
    document.score = match row.get("score") {
        Some(FieldValue::Real(r)) => Some(*r),
        Some(FieldValue::Int(i)) => Some(*i as f64),
        _ => None,
    };
    for field in &schema.fields {
        let value = match row.get(&field.name) {
            Some(v) => restore_value(field.field_type, v)?,
            None => FieldValue::Null,
        };
        document.add_field(field.name.clone(), value);
    }
    Ok(document)
}

fn restore_value(field_type: FieldType, value: &FieldValue) -> Result<FieldValue> {
    match (field_type, value) {
        (FieldType::Date, FieldValue::Text(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(FieldValue::Date)
            .map_err(|e| {
                Error::new(ErrorKind::Storage, format!("Bad stored date '{}': {}", s, e))
            }),
        (FieldType::Datetime, FieldValue::Text(s)) => {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .map(FieldValue::Datetime)
                .map_err(|e| {
                    Error::new(
                        ErrorKind::Storage,
                        format!("Bad stored datetime '{}': {}", s, e),
                    )
                })
        }
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::Config;
    use crate::core::error::ErrorKind;
    use crate::core::index::SearchIndex;
    use crate::query::ast::{or_, q, terms};
    use crate::schema::schema::{Field, Schema};

    fn index() -> SearchIndex {
        let schema = Schema::builder("documents")
            .field(Field::text("text").indexed().spell_checked())
            .field(Field::int("num"))
            .build()
            .unwrap();
        SearchIndex::in_memory(&schema, Config::default()).unwrap()
    }

    fn seed(index: &SearchIndex, rows: &[(&str, i64)]) {
        for (text, num) in rows {
            index
                .insert(&[("text", (*text).into()), ("num", (*num).into())])
                .unwrap();
        }
    }

    #[test]
    fn finds_token_case_insensitively() {
        let index = index();
        seed(&index, &[("Hello World !", 1)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        assert_eq!(cursor.count().unwrap(), 1);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        let doc = cursor.get(0).unwrap().unwrap();
        assert_eq!(doc.text("text"), Some("Hello World !"));
        assert!(doc.score.is_some());
    }

    #[test]
    fn punctuated_query_matches_as_phrase() {
        let index = index();
        seed(&index, &[("Hello World !", 1)]);
        let mut cursor = index.search(terms().set("text", "Hello World !")).unwrap();
        assert_eq!(cursor.len().unwrap(), 1);
    }

    #[test]
    fn prefix_results_are_a_superset_of_exact() {
        let index = index();
        seed(&index, &[("prolog", 1), ("program", 2), ("other", 3)]);
        let mut exact = index.search(terms().set("text", "prolog")).unwrap();
        assert_eq!(exact.count().unwrap(), 1);
        let mut prefixed = index
            .search(terms().set("text__allow_prefix", "pro*"))
            .unwrap();
        assert_eq!(prefixed.count().unwrap(), 2);
    }

    #[test]
    fn initial_token_matches_only_leading_position() {
        let index = index();
        seed(&index, &[("hello world", 1), ("world hello", 2)]);
        let mut anywhere = index.search(terms().set("text", "hello")).unwrap();
        assert_eq!(anywhere.count().unwrap(), 2);
        let mut leading = index
            .search(terms().set("text__allow_initial_token", "^hello"))
            .unwrap();
        let docs = leading.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text("text"), Some("hello world"));
    }

    #[test]
    fn or_combinator_unions_both_branches() {
        let index = index();
        seed(&index, &[("hello world", 1), ("quick brown fox", 2)]);
        let mut cursor = index
            .search(or_(q("text", "world"), q("text", "fox")))
            .unwrap();
        assert_eq!(cursor.count().unwrap(), 2);
    }

    #[test]
    fn highlight_wraps_matched_terms() {
        let index = index();
        seed(&index, &[("Hello World !", 1)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        cursor.highlight(&["text"], "<b>", "</b>").unwrap();
        let doc = cursor.get(0).unwrap().unwrap();
        assert_eq!(doc.text("text"), Some("<b>Hello</b> World !"));
    }

    #[test]
    fn snippet_length_bounds_are_exclusive() {
        let index = index();
        seed(&index, &[("hello world", 1)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        assert_eq!(
            cursor.snippet("text", 0, "[", "]").unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            cursor.snippet("text", 64, "[", "]").unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
        assert!(cursor.snippet("text", 1, "[", "]").is_ok());
        assert!(cursor.snippet("text", 63, "[", "]").is_ok());
    }

    #[test]
    fn snippet_truncates_around_the_match() {
        let index = index();
        let long = (0..50).map(|i| format!("word{}", i)).collect::<Vec<_>>();
        let text = format!("{} needle {}", long[..25].join(" "), long[25..].join(" "));
        seed(&index, &[(text.as_str(), 1)]);
        let mut cursor = index.search(terms().set("text", "needle")).unwrap();
        cursor.snippet("text", 8, "[", "]").unwrap();
        let doc = cursor.get(0).unwrap().unwrap();
        let snippet = doc.text("text").unwrap();
        assert!(snippet.contains("[needle]"));
        assert!(snippet.len() < text.len());
    }

    #[test]
    fn setters_fail_after_materialization() {
        let index = index();
        seed(&index, &[("hello", 1)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        cursor.get(0).unwrap();
        assert_eq!(
            cursor.order_by(&["-num"]).unwrap_err().kind,
            ErrorKind::AlreadyExecuted
        );
        assert_eq!(
            cursor.window(0, 5).unwrap_err().kind,
            ErrorKind::AlreadyExecuted
        );
        assert_eq!(
            cursor.highlight(&["text"], "<b>", "</b>").unwrap_err().kind,
            ErrorKind::AlreadyExecuted
        );
    }

    #[test]
    fn matchless_highlight_fails_from_either_accessor() {
        let index = index();
        seed(&index, &[("hello", 1)]);
        let mut cursor = index.search(terms()).unwrap();
        cursor.highlight(&["text"], "<b>", "</b>").unwrap();
        assert_eq!(cursor.count().unwrap_err().kind, ErrorKind::InvalidArgument);
        let mut cursor = index.search(terms()).unwrap();
        cursor.highlight(&["text"], "<b>", "</b>").unwrap();
        assert_eq!(
            cursor.documents().unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn count_freezes_the_cursor_too() {
        let index = index();
        seed(&index, &[("hello", 1)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        cursor.count().unwrap();
        assert_eq!(
            cursor.window(0, 5).unwrap_err().kind,
            ErrorKind::AlreadyExecuted
        );
    }

    #[test]
    fn count_ignores_the_row_window() {
        let index = index();
        seed(&index, &[("hello a", 1), ("hello b", 2), ("hello c", 3)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        cursor.window(0, 1).unwrap();
        assert_eq!(cursor.count().unwrap(), 3);
        assert_eq!(cursor.len().unwrap(), 1);
    }

    #[test]
    fn window_pages_through_results() {
        let index = index();
        seed(&index, &[("hello", 1), ("hello", 2), ("hello", 3)]);
        let mut cursor = index.search(terms()).unwrap();
        cursor.order_by(&["num"]).unwrap().window(1, 1).unwrap();
        let docs = cursor.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_field("num").unwrap().as_int(), Some(2));
    }

    #[test]
    fn default_order_is_ascending_rank() {
        let index = index();
        seed(&index, &[("hello", 1), ("hello hello hello", 2)]);
        let mut cursor = index.search(terms().set("text", "hello")).unwrap();
        let docs = cursor.documents().unwrap();
        assert_eq!(docs.len(), 2);
        let scores: Vec<f64> = docs.iter().map(|d| d.score.unwrap()).collect();
        assert!(scores[0] <= scores[1]);
    }

    #[test]
    fn explicit_descending_order_applies() {
        let index = index();
        seed(&index, &[("hello", 1), ("hello", 9), ("hello", 5)]);
        let mut cursor = index.search(terms()).unwrap();
        cursor.order_by(&["-num"]).unwrap();
        let nums: Vec<i64> = cursor
            .documents()
            .unwrap()
            .iter()
            .map(|d| d.get_field("num").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(nums, vec![9, 5, 1]);
    }

    #[test]
    fn autocomplete_expands_the_final_token() {
        let index = index();
        seed(&index, &[("programming in rust", 1), ("other things", 2)]);
        let mut cursor = index.autocomplete("text", "prog").unwrap();
        assert_eq!(cursor.count().unwrap(), 1);
        let mut cursor = index.autocomplete("text", "rust prog").unwrap();
        assert_eq!(cursor.count().unwrap(), 1);
        let mut cursor = index.autocomplete("text", "xyz").unwrap();
        assert_eq!(cursor.count().unwrap(), 0);
    }

    #[test]
    fn suggestions_flow_through_the_index_handle() {
        let index = index();
        seed(&index, &[("hello world", 1)]);
        index.build_spell_index().unwrap();
        let suggestions = index.suggest("hllo").unwrap();
        assert_eq!(
            suggestions.get("hllo").unwrap()[0],
            ("hello".to_string(), 1)
        );
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        use crate::core::types::FieldValue;
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let schema = Schema::builder("documents")
            .field(Field::text("text").indexed())
            .build()
            .unwrap();
        // Create the tables before the writers race.
        SearchIndex::open(&path, &schema, Config::default(), true).unwrap();

        let mut handles = Vec::new();
        for w in 0..2 {
            let path = path.clone();
            let schema = schema.clone();
            handles.push(thread::spawn(move || {
                let index = SearchIndex::open(&path, &schema, Config::default(), true).unwrap();
                for i in 0..20 {
                    index
                        .insert(&[(
                            "text",
                            FieldValue::Text(format!("writer {} row {}", w, i)),
                        )])
                        .unwrap();
                }
                index.close().unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let index = SearchIndex::open(&path, &schema, Config::default(), false).unwrap();
        let mut cursor = index.search(terms().set("text", "writer")).unwrap();
        assert_eq!(cursor.count().unwrap(), 40);
    }
}
