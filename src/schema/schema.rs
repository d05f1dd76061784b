use serde::{Serialize, Deserialize};
use std::sync::OnceLock;
use regex::Regex;

use crate::core::error::{Error, ErrorKind, Result};

/// SQLite keywords that must not be used as field or index names.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ANALYZE", "AND", "AS", "ASC", "ATTACH",
    "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST", "CHECK",
    "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE",
    "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT", "DEFERRABLE", "DEFERRED",
    "DELETE", "DESC", "DETACH", "DISTINCT", "DROP", "EACH", "ELSE", "END", "ESCAPE", "EXCEPT",
    "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL", "FOR", "FOREIGN", "FROM", "FULL", "GLOB", "GROUP",
    "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED", "INITIALLY", "INNER",
    "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN", "KEY", "LEFT", "LIKE",
    "LIMIT", "MATCH", "NATURAL", "NO", "NOT", "NOTNULL", "NULL", "OF", "OFFSET", "ON", "OR",
    "ORDER", "OUTER", "PLAN", "PRAGMA", "PRIMARY", "QUERY", "RAISE", "RECURSIVE", "REFERENCES",
    "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE", "RESTRICT", "RIGHT", "ROLLBACK", "ROW",
    "SAVEPOINT", "SELECT", "SET", "TABLE", "TEMP", "TEMPORARY", "THEN", "TO", "TRANSACTION",
    "TRIGGER", "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL",
    "WHEN", "WHERE", "WITH", "WITHOUT", "RANK",
];

static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap())
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.starts_with('_') {
        return Err(Error::new(
            ErrorKind::SchemaViolation,
            format!("'{}' must not start with an underscore.", name),
        ));
    }
    if name.contains("__") {
        return Err(Error::new(
            ErrorKind::SchemaViolation,
            format!("'{}' must not contain a double underscore.", name),
        ));
    }
    if !name_pattern().is_match(name) {
        return Err(Error::new(
            ErrorKind::SchemaViolation,
            format!("'{}' is not a valid name.", name),
        ));
    }
    if RESERVED_KEYWORDS.contains(&name.to_uppercase().as_str()) {
        return Err(Error::new(
            ErrorKind::SchemaViolation,
            format!("'{}' is a reserved name - Please choose another name.", name),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Int,
    Real,
    Blob,
    Date,
    Datetime,
}

/// Value generated for a field left out of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// Random v4 UUID, rendered as text.
    Uuid,
    /// Current UTC timestamp.
    Now,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    /// Text fields join the full-text index; other types get an ordinary index.
    pub indexed: bool,
    /// At most one per schema; carries external identity for upserts.
    pub is_id: bool,
    /// Field feeds the bigram spell-correction index. Indexed text only.
    pub spell_check: bool,
    pub default: Option<DefaultValue>,
}

impl Field {
    fn new(name: &str, field_type: FieldType) -> Self {
        Field {
            name: name.to_string(),
            field_type,
            indexed: false,
            is_id: false,
            spell_check: false,
            default: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Field::new(name, FieldType::Text)
    }

    pub fn int(name: &str) -> Self {
        Field::new(name, FieldType::Int)
    }

    pub fn real(name: &str) -> Self {
        Field::new(name, FieldType::Real)
    }

    pub fn blob(name: &str) -> Self {
        Field::new(name, FieldType::Blob)
    }

    pub fn date(name: &str) -> Self {
        Field::new(name, FieldType::Date)
    }

    pub fn datetime(name: &str) -> Self {
        Field::new(name, FieldType::Datetime)
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn id(mut self) -> Self {
        self.is_id = true;
        self
    }

    pub fn spell_checked(mut self) -> Self {
        self.spell_check = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// True for fields living in the FTS5 shadow table.
    pub fn is_fts(&self) -> bool {
        self.indexed && self.field_type == FieldType::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tokenizer {
    Unicode61 { remove_diacritics: bool },
    Porter,
    Trigram,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::Unicode61 { remove_diacritics: false }
    }
}

/// Ordered field declaration plus index meta-configuration. Built once,
/// validated at build time, and cloned into every connection so handles
/// never share mutable schema state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
    pub tokenizer: Tokenizer,
    /// FTS5 prefix-index widths, e.g. [2, 3].
    pub prefix_widths: Vec<u32>,
}

impl Schema {
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder {
            name: name.to_string(),
            fields: Vec::new(),
            tokenizer: Tokenizer::default(),
            prefix_widths: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn id_field(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.is_id)
    }

    /// Fields of the FTS5 shadow table, in declaration order.
    pub fn fts_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.is_fts()).collect()
    }

    /// Column position of `name` inside the FTS5 shadow table.
    pub fn fts_column_index(&self, name: &str) -> Option<usize> {
        self.fts_fields().iter().position(|f| f.name == name)
    }

    pub fn spell_check_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.spell_check).collect()
    }
}

pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    tokenizer: Tokenizer,
    prefix_widths: Vec<u32>,
}

impl SchemaBuilder {
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn prefix_widths(mut self, widths: &[u32]) -> Self {
        self.prefix_widths = widths.to_vec();
        self
    }

    pub fn build(self) -> Result<Schema> {
        validate_name(&self.name)?;
        let mut id_seen = false;
        for field in &self.fields {
            validate_name(&field.name)?;
            if field.name == "id" || field.name == "score" {
                return Err(Error::new(
                    ErrorKind::SchemaViolation,
                    format!("'{}' is implicit on every document - Please choose another name.", field.name),
                ));
            }
            if self.fields.iter().filter(|f| f.name == field.name).count() > 1 {
                return Err(Error::new(
                    ErrorKind::SchemaViolation,
                    format!("Field '{}' is declared more than once.", field.name),
                ));
            }
            if field.is_id {
                if id_seen {
                    return Err(Error::new(
                        ErrorKind::SchemaViolation,
                        "At most one field may be declared as id.".to_string(),
                    ));
                }
                id_seen = true;
            }
            if field.spell_check && !field.is_fts() {
                return Err(Error::new(
                    ErrorKind::SchemaViolation,
                    format!("Field '{}' is not indexed text and cannot be spell-checked.", field.name),
                ));
            }
        }
        Ok(Schema {
            name: self.name,
            fields: self.fields,
            tokenizer: self.tokenizer,
            prefix_widths: self.prefix_widths,
        })
    }
}
