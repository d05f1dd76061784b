use crate::schema::schema::{FieldType, Schema, Tokenizer};

fn sql_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "TEXT",
        FieldType::Int => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::Blob => "BLOB",
        // Dates are stored as ISO-8601 text so strftime() applies directly.
        FieldType::Date | FieldType::Datetime => "TEXT",
    }
}

fn tokenize_clause(tokenizer: Tokenizer) -> String {
    match tokenizer {
        Tokenizer::Unicode61 { remove_diacritics } => format!(
            "unicode61 remove_diacritics {}",
            if remove_diacritics { 1 } else { 0 }
        ),
        Tokenizer::Porter => "porter unicode61".to_string(),
        Tokenizer::Trigram => "trigram".to_string(),
    }
}

/// Content table holding every declared column plus the rowid identity.
pub fn content_table(schema: &Schema) -> String {
    let mut columns = vec!["id INTEGER PRIMARY KEY".to_string()];
    for field in &schema.fields {
        let mut column = format!("{} {}", field.name, sql_type(field.field_type));
        if field.is_id {
            column.push_str(" UNIQUE");
        }
        columns.push(column);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        schema.name,
        columns.join(", ")
    )
}

/// External-content FTS5 shadow table over the indexed text columns.
pub fn fts_table(schema: &Schema) -> String {
    let mut parts: Vec<String> = schema
        .fts_fields()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    parts.push(format!("content='{}'", schema.name));
    parts.push("content_rowid='id'".to_string());
    parts.push(format!("tokenize='{}'", tokenize_clause(schema.tokenizer)));
    if !schema.prefix_widths.is_empty() {
        let widths: Vec<String> = schema.prefix_widths.iter().map(|w| w.to_string()).collect();
        parts.push(format!("prefix='{}'", widths.join(" ")));
    }
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {}_fts USING fts5({})",
        schema.name,
        parts.join(", ")
    )
}

/// Triggers keeping the shadow table in sync with the content table.
pub fn sync_triggers(schema: &Schema) -> Vec<String> {
    let table = &schema.name;
    let fts = format!("{}_fts", table);
    let cols: Vec<String> = schema.fts_fields().iter().map(|f| f.name.clone()).collect();
    let col_list = cols.join(", ");
    let new_list: Vec<String> = cols.iter().map(|c| format!("new.{}", c)).collect();
    let old_list: Vec<String> = cols.iter().map(|c| format!("old.{}", c)).collect();
    let insert_row = format!(
        "INSERT INTO {fts}(rowid, {col_list}) VALUES (new.id, {});",
        new_list.join(", ")
    );
    let delete_row = format!(
        "INSERT INTO {fts}({fts}, rowid, {col_list}) VALUES ('delete', old.id, {});",
        old_list.join(", ")
    );
    vec![
        format!("CREATE TRIGGER IF NOT EXISTS {table}_ai AFTER INSERT ON {table} BEGIN {insert_row} END"),
        format!("CREATE TRIGGER IF NOT EXISTS {table}_ad AFTER DELETE ON {table} BEGIN {delete_row} END"),
        format!("CREATE TRIGGER IF NOT EXISTS {table}_au AFTER UPDATE ON {table} BEGIN {delete_row} {insert_row} END"),
    ]
}

/// Ordinary indexes for non-text fields flagged as indexed.
pub fn ordinary_indexes(schema: &Schema) -> Vec<String> {
    schema
        .fields
        .iter()
        .filter(|f| f.indexed && !f.is_fts())
        .map(|f| {
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_{1}_idx ON {0}({1})",
                schema.name, f.name
            )
        })
        .collect()
}

/// Vocabulary table enumerating tokens per FTS column, used to rebuild the
/// spell-correction index.
pub fn vocab_table(schema: &Schema) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {0}_vocab USING fts5vocab('{0}_fts', 'col')",
        schema.name
    )
}

/// Bigram store: one row per distinct token, match-indexed on its bigram
/// decomposition.
pub fn spell_table(schema: &Schema) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {0}_spell USING fts5(bigrams, token UNINDEXED, doc_frequency UNINDEXED, total_count UNINDEXED)",
        schema.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::schema::{Field, Schema};

    fn schema() -> Schema {
        Schema::builder("documents")
            .field(Field::text("text").indexed())
            .field(Field::int("num").indexed())
            .prefix_widths(&[2, 3])
            .build()
            .unwrap()
    }

    #[test]
    fn content_table_declares_typed_columns() {
        let sql = content_table(&schema());
        assert!(sql.contains("id INTEGER PRIMARY KEY"));
        assert!(sql.contains("text TEXT"));
        assert!(sql.contains("num INTEGER"));
    }

    #[test]
    fn fts_table_covers_only_indexed_text() {
        let sql = fts_table(&schema());
        assert!(sql.contains("fts5(text,"));
        assert!(!sql.contains("num"));
        assert!(sql.contains("content='documents'"));
        assert!(sql.contains("tokenize='unicode61 remove_diacritics 0'"));
        assert!(sql.contains("prefix='2 3'"));
    }

    #[test]
    fn triggers_cover_all_three_mutations() {
        let triggers = sync_triggers(&schema());
        assert_eq!(triggers.len(), 3);
        assert!(triggers[2].contains("'delete'"));
    }

    #[test]
    fn non_text_indexed_field_gets_ordinary_index() {
        let indexes = ordinary_indexes(&schema());
        assert_eq!(indexes, vec![
            "CREATE INDEX IF NOT EXISTS documents_num_idx ON documents(num)".to_string()
        ]);
    }
}
