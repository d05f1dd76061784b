use std::collections::{BTreeSet, HashMap};

use log::{info, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::FieldValue;
use crate::schema::schema::Schema;
use crate::spell::bigram;
use crate::storage::backend::StorageBackend;
use crate::storage::ddl;

/// Builds and queries the bigram approximate-match index for the fields
/// flagged as spell-checkable.
pub struct SpellCorrector<'a> {
    storage: &'a dyn StorageBackend,
    schema: &'a Schema,
    candidates: usize,
}

impl<'a> SpellCorrector<'a> {
    pub fn new(storage: &'a dyn StorageBackend, schema: &'a Schema, candidates: usize) -> Self {
        SpellCorrector {
            storage,
            schema,
            candidates,
        }
    }

    /// Rebuilds the bigram table from the committed token vocabulary,
    /// replacing any prior content wholesale. There is no incremental
    /// update path; rebuilds without intervening writes are idempotent.
    pub fn build(&self) -> Result<()> {
        let spell_fields = self.schema.spell_check_fields();
        if spell_fields.is_empty() {
            warn!(
                "schema '{}' declares no spell-checkable fields; bigram table will be empty",
                self.schema.name
            );
        }
        self.storage.execute(&ddl::vocab_table(self.schema), &[])?;
        self.storage.execute(&ddl::spell_table(self.schema), &[])?;

        let placeholders = vec!["?"; spell_fields.len()].join(", ");
        let vocab_sql = format!(
            "SELECT term, sum(doc) AS doc, sum(cnt) AS cnt FROM {}_vocab WHERE col IN ({}) GROUP BY term",
            self.schema.name, placeholders
        );
        let col_params: Vec<FieldValue> = spell_fields
            .iter()
            .map(|f| FieldValue::Text(f.name.clone()))
            .collect();

        self.storage.begin()?;
        let result = self.rebuild_rows(&vocab_sql, &col_params);
        match result {
            Ok(count) => {
                self.storage.commit()?;
                info!("spell index for '{}' rebuilt with {} tokens", self.schema.name, count);
                Ok(())
            }
            Err(err) => {
                if let Err(rb) = self.storage.rollback() {
                    warn!("rollback after failed spell rebuild also failed: {}", rb);
                }
                Err(Error::new(
                    ErrorKind::TransactionFailure,
                    format!("Spell index rebuild failed and was rolled back: {}", err),
                ))
            }
        }
    }

    fn rebuild_rows(&self, vocab_sql: &str, col_params: &[FieldValue]) -> Result<usize> {
        let spell = format!("{}_spell", self.schema.name);
        self.storage.execute(&format!("DELETE FROM {}", spell), &[])?;
        let insert_sql = format!(
            "INSERT INTO {} (bigrams, token, doc_frequency, total_count) VALUES (?, ?, ?, ?)",
            spell
        );
        let rows = if col_params.is_empty() {
            Vec::new()
        } else {
            self.storage.query(vocab_sql, col_params)?
        };
        let mut count = 0;
        for row in &rows {
            let token = match row.get("term").and_then(|v| v.as_text()) {
                Some(t) => t.to_string(),
                None => continue,
            };
            let doc = row.get("doc").and_then(|v| v.as_int()).unwrap_or(0);
            let cnt = row.get("cnt").and_then(|v| v.as_int()).unwrap_or(0);
            self.storage.execute(
                &insert_sql,
                &[
                    FieldValue::Text(bigram::bigram_text(&token)),
                    FieldValue::Text(token),
                    FieldValue::Int(doc),
                    FieldValue::Int(cnt),
                ],
            )?;
            count += 1;
        }
        Ok(count)
    }

    /// Approximate-match suggestions for every word of `text`: candidates
    /// sharing at least one bigram, pre-ranked by the engine's relevance
    /// over the bigram match, then re-sorted by true edit distance. A word
    /// with no candidates maps to an empty list, not an error.
    pub fn suggest(&self, text: &str) -> Result<HashMap<String, Vec<(String, usize)>>> {
        self.assure_built()?;
        let spell = format!("{}_spell", self.schema.name);
        let match_sql = format!(
            "SELECT token FROM {0} WHERE {0} MATCH ? ORDER BY rank LIMIT ?",
            spell
        );
        let mut out = HashMap::new();
        for word in text.unicode_words() {
            let normalized = word.to_lowercase();
            let unique: BTreeSet<String> = bigram::bigrams(&normalized).into_iter().collect();
            if unique.is_empty() {
                out.insert(word.to_string(), Vec::new());
                continue;
            }
            let match_expr = unique
                .iter()
                .map(|b| format!("\"{}\"", b.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(" OR ");
            let rows = self.storage.query(
                &match_sql,
                &[
                    FieldValue::Text(match_expr),
                    FieldValue::Int(self.candidates as i64),
                ],
            )?;
            let mut ranked: Vec<(String, usize)> = rows
                .iter()
                .filter_map(|r| r.get("token").and_then(|v| v.as_text()))
                .map(|candidate| {
                    (
                        candidate.to_string(),
                        strsim::levenshtein(&normalized, candidate),
                    )
                })
                .collect();
            // Stable sort keeps the relevance pre-ranking among ties.
            ranked.sort_by_key(|(_, distance)| *distance);
            out.insert(word.to_string(), ranked);
        }
        Ok(out)
    }

    fn assure_built(&self) -> Result<()> {
        let rows = self.storage.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[FieldValue::Text(format!("{}_spell", self.schema.name))],
        )?;
        if rows.is_empty() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!(
                    "Spell index for '{}' has not been built yet.",
                    self.schema.name
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::{Field, Schema};
    use crate::storage::backend::SqliteStorage;
    use std::time::Duration;

    fn setup() -> (SqliteStorage, Schema) {
        let schema = Schema::builder("documents")
            .field(Field::text("text").indexed().spell_checked())
            .build()
            .unwrap();
        let storage = SqliteStorage::in_memory(Duration::from_millis(100)).unwrap();
        storage.execute(&ddl::content_table(&schema), &[]).unwrap();
        storage.execute(&ddl::fts_table(&schema), &[]).unwrap();
        for trigger in ddl::sync_triggers(&schema) {
            storage.execute(&trigger, &[]).unwrap();
        }
        storage
            .execute(
                "INSERT INTO documents (text) VALUES (?)",
                &[FieldValue::Text("hello world".to_string())],
            )
            .unwrap();
        (storage, schema)
    }

    #[test]
    fn suggests_close_token_with_edit_distance() {
        let (storage, schema) = setup();
        let corrector = SpellCorrector::new(&storage, &schema, 15);
        corrector.build().unwrap();
        let suggestions = corrector.suggest("hllo").unwrap();
        assert_eq!(
            suggestions.get("hllo").unwrap(),
            &vec![("hello".to_string(), 1)]
        );
    }

    #[test]
    fn token_without_candidates_yields_empty_list() {
        let (storage, schema) = setup();
        let corrector = SpellCorrector::new(&storage, &schema, 15);
        corrector.build().unwrap();
        let suggestions = corrector.suggest("zzqq").unwrap();
        assert_eq!(suggestions.get("zzqq").unwrap(), &Vec::new());
    }

    #[test]
    fn rebuild_is_idempotent_without_intervening_writes() {
        let (storage, schema) = setup();
        let corrector = SpellCorrector::new(&storage, &schema, 15);
        corrector.build().unwrap();
        let first = storage
            .query(
                "SELECT bigrams, token, doc_frequency, total_count FROM documents_spell ORDER BY token",
                &[],
            )
            .unwrap();
        corrector.build().unwrap();
        let second = storage
            .query(
                "SELECT bigrams, token, doc_frequency, total_count FROM documents_spell ORDER BY token",
                &[],
            )
            .unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.columns, b.columns);
        }
    }

    #[test]
    fn suggest_before_build_is_not_found() {
        let (storage, schema) = setup();
        let corrector = SpellCorrector::new(&storage, &schema, 15);
        let err = corrector.suggest("hllo").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
