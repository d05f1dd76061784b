use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::FieldValue;
use crate::query::ast::{Expr, QueryArgs, Term};
use crate::query::lookup::{self, Lookup, TermFlags};
use crate::schema::schema::Schema;

/// Match-syntax operators that force quoting when they appear as a bare
/// token outside an `allow_boolean` lookup.
const OPERATOR_KEYWORDS: &[&str] = &["AND", "OR", "NOT", "NEAR"];

/// Ordering spec parsed from `field`, `+field` or `-field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub field: String,
    pub descending: bool,
}

impl OrderSpec {
    pub fn parse(spec: &str) -> OrderSpec {
        if let Some(rest) = spec.strip_prefix('-') {
            OrderSpec { field: rest.to_string(), descending: true }
        } else if let Some(rest) = spec.strip_prefix('+') {
            OrderSpec { field: rest.to_string(), descending: false }
        } else {
            OrderSpec { field: spec.to_string(), descending: false }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HighlightSpec {
    pub fields: Vec<String>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone)]
pub struct SnippetSpec {
    pub field: String,
    pub length: u32,
    pub before: String,
    pub after: String,
}

/// Everything the lazy cursor fixes before its first execution.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub args: QueryArgs,
    /// Rewrites the single keyword term into a prefix-or-exact disjunction.
    pub autocomplete: bool,
    pub order_by: Vec<OrderSpec>,
    pub limit: usize,
    pub offset: usize,
    pub highlight: Option<HighlightSpec>,
    pub snippet: Option<SnippetSpec>,
}

impl QueryPlan {
    pub fn new(args: QueryArgs, default_limit: usize) -> Self {
        QueryPlan {
            args,
            autocomplete: false,
            order_by: Vec::new(),
            limit: default_limit,
            offset: 0,
            highlight: None,
            snippet: None,
        }
    }
}

/// A rendered statement plus its bind values, in appearance order.
/// Immutable once built; owned by the cursor that compiles it.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

struct WhereClause {
    match_expr: Option<String>,
    predicates: Vec<(String, FieldValue)>,
}

pub struct QueryCompiler<'a> {
    schema: &'a Schema,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        QueryCompiler { schema }
    }

    /// Pre-execution validation used by `search()`: resolves every lookup
    /// chain and rejects unknown fields/suffixes before a cursor exists.
    pub fn validate(&self, args: &QueryArgs) -> Result<()> {
        args.validate_mode()?;
        self.build_where(args, false).map(|_| ())
    }

    pub fn compile(&self, plan: &QueryPlan) -> Result<CompiledQuery> {
        plan.args.validate_mode()?;
        let clause = self.build_where(&plan.args, plan.autocomplete)?;
        let has_match = clause.match_expr.is_some();
        self.assure_decorated_match(plan, has_match)?;
        let table = &self.schema.name;
        let fts = format!("{}_fts", table);

        let mut params: Vec<FieldValue> = Vec::new();
        let select = self.select_list(plan, has_match, &mut params)?;

        let mut sql = format!("SELECT {} FROM {}", select.join(", "), table);
        if has_match {
            sql.push_str(&format!(" JOIN {fts} ON {fts}.rowid = {table}.id"));
        }
        self.push_where(&mut sql, &mut params, clause, &fts);
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_clause(plan, has_match)?);
        sql.push_str(" LIMIT ? OFFSET ?");
        params.push(FieldValue::Int(plan.limit as i64));
        params.push(FieldValue::Int(plan.offset as i64));

        Ok(CompiledQuery { sql, params })
    }

    /// `count(*)` variant of the same predicate, without window or ordering.
    pub fn compile_count(&self, plan: &QueryPlan) -> Result<CompiledQuery> {
        plan.args.validate_mode()?;
        let clause = self.build_where(&plan.args, plan.autocomplete)?;
        let has_match = clause.match_expr.is_some();
        self.assure_decorated_match(plan, has_match)?;
        let table = &self.schema.name;
        let fts = format!("{}_fts", table);

        let mut sql = format!("SELECT count(*) FROM {}", table);
        if has_match {
            sql.push_str(&format!(" JOIN {fts} ON {fts}.rowid = {table}.id"));
        }
        let mut params = Vec::new();
        self.push_where(&mut sql, &mut params, clause, &fts);
        Ok(CompiledQuery { sql, params })
    }

    fn push_where(
        &self,
        sql: &mut String,
        params: &mut Vec<FieldValue>,
        clause: WhereClause,
        fts: &str,
    ) {
        let mut parts: Vec<String> = Vec::new();
        if let Some(expr) = clause.match_expr {
            parts.push(format!("{} MATCH ?", fts));
            params.push(FieldValue::Text(expr));
        }
        for (pred, value) in clause.predicates {
            parts.push(pred);
            params.push(value);
        }
        if !parts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
        }
    }

    fn build_where(&self, args: &QueryArgs, autocomplete: bool) -> Result<WhereClause> {
        let mut fragments: Vec<String> = Vec::new();
        let mut predicates: Vec<(String, FieldValue)> = Vec::new();

        for term in &args.keywords {
            self.compile_keyword_term(term, autocomplete, &mut fragments, &mut predicates)?;
        }
        if let Some(expr) = args.exprs.first() {
            fragments.push(self.render_expr(expr)?);
        }

        let match_expr = if fragments.is_empty() {
            None
        } else {
            Some(fragments.join(" AND "))
        };
        Ok(WhereClause { match_expr, predicates })
    }

    fn compile_keyword_term(
        &self,
        term: &Term,
        autocomplete: bool,
        fragments: &mut Vec<String>,
        predicates: &mut Vec<(String, FieldValue)>,
    ) -> Result<()> {
        let (name, chain) = lookup::parse_field_spec(&term.field)?;
        let field = self.schema.field(name).ok_or_else(|| {
            Error::new(
                ErrorKind::SchemaViolation,
                format!("'{}' is not defined in the schema.", name),
            )
        })?;
        lookup::validate_chain(field, &chain)?;

        if field.is_fts() {
            let value = term.value.as_text().ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidArgument,
                    format!("Field '{}' expects a text value in match queries.", name),
                )
            })?;
            let fragment = if autocomplete {
                autocomplete_pattern(value)
            } else {
                escape_match_value(value, text_flags_of(&chain))
            };
            // An empty pattern matches everything, it is not a syntax error.
            if !fragment.is_empty() {
                fragments.push(format!("{} : ({})", name, fragment));
            }
            return Ok(());
        }

        let table = &self.schema.name;
        match chain.first() {
            None => predicates.push((format!("{}.{} = ?", table, name), term.value.clone())),
            Some(l) if l.is_comparison() => predicates.push((
                format!("{}.{} {} ?", table, name, l.sql_operator()),
                term.value.clone(),
            )),
            Some(l) if l.is_date_part() => {
                if term.value.as_int().is_none() {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("Lookup '{}' on field '{}' expects an integer.", l.name(), name),
                    ));
                }
                predicates.push((
                    format!(
                        "CAST(strftime('{}', {}.{}) AS INTEGER) = ?",
                        l.strftime_code(),
                        table,
                        name
                    ),
                    term.value.clone(),
                ));
            }
            // validate_chain already rejected text lookups on this field
            Some(l) => {
                return Err(Error::new(
                    ErrorKind::InvalidLookup,
                    format!("Lookup '{}' is not valid for field '{}'.", l.name(), name),
                ));
            }
        }
        Ok(())
    }

    /// Renders a combinator tree into one match expression. Leaves must be
    /// indexed text fields; comparisons stay in keyword mode.
    fn render_expr(&self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Term(term) => {
                let (name, chain) = lookup::parse_field_spec(&term.field)?;
                let field = self.schema.field(name).ok_or_else(|| {
                    Error::new(
                        ErrorKind::SchemaViolation,
                        format!("'{}' is not defined in the schema.", name),
                    )
                })?;
                lookup::validate_chain(field, &chain)?;
                if !field.is_fts() {
                    return Err(Error::new(
                        ErrorKind::InvalidLookup,
                        format!(
                            "Field '{}' is not part of the full-text index; expression queries accept indexed text fields only.",
                            name
                        ),
                    ));
                }
                let value = term.value.as_text().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidArgument,
                        format!("Field '{}' expects a text value in match queries.", name),
                    )
                })?;
                let fragment = escape_match_value(value, text_flags_of(&chain));
                if fragment.is_empty() {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("Empty value in expression term for field '{}'.", name),
                    ));
                }
                Ok(format!("{} : ({})", name, fragment))
            }
            Expr::And(l, r) => Ok(format!("({} AND {})", self.render_expr(l)?, self.render_expr(r)?)),
            Expr::Or(l, r) => Ok(format!("({} OR {})", self.render_expr(l)?, self.render_expr(r)?)),
        }
    }

    fn select_list(
        &self,
        plan: &QueryPlan,
        has_match: bool,
        params: &mut Vec<FieldValue>,
    ) -> Result<Vec<String>> {
        let table = &self.schema.name;
        let fts = format!("{}_fts", table);
        let mut cols = vec![format!("{}.id AS id", table)];
        for field in &self.schema.fields {
            let highlighted = plan
                .highlight
                .as_ref()
                .is_some_and(|h| h.fields.iter().any(|f| f == &field.name));
            let snipped = plan
                .snippet
                .as_ref()
                .is_some_and(|s| s.field == field.name);
            if let (true, Some(spec)) = (highlighted, plan.highlight.as_ref()) {
                let idx = self.fts_index_of(&field.name)?;
                cols.push(format!("highlight({}, {}, ?, ?) AS {}", fts, idx, field.name));
                params.push(FieldValue::Text(spec.start.clone()));
                params.push(FieldValue::Text(spec.end.clone()));
            } else if let (true, Some(spec)) = (snipped, plan.snippet.as_ref()) {
                let idx = self.fts_index_of(&field.name)?;
                cols.push(format!(
                    "snippet({}, {}, ?, ?, ?, ?) AS {}",
                    fts, idx, field.name
                ));
                params.push(FieldValue::Text(spec.before.clone()));
                params.push(FieldValue::Text(spec.after.clone()));
                params.push(FieldValue::Text("...".to_string()));
                params.push(FieldValue::Int(spec.length as i64));
            } else {
                cols.push(format!("{}.{}", table, field.name));
            }
        }
        if has_match {
            cols.push(format!("{}.rank AS score", fts));
        } else {
            cols.push("NULL AS score".to_string());
        }
        Ok(cols)
    }

    /// Highlight/snippet decorations only make sense over a match half;
    /// checked for both the row and the count statement so a cursor fails
    /// the same way whichever accessor runs first.
    fn assure_decorated_match(&self, plan: &QueryPlan, has_match: bool) -> Result<()> {
        if (plan.highlight.is_some() || plan.snippet.is_some()) && !has_match {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Highlighting requires a full-text match query.".to_string(),
            ));
        }
        Ok(())
    }

    fn fts_index_of(&self, name: &str) -> Result<usize> {
        self.schema.fts_column_index(name).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("Field '{}' is not part of the full-text index.", name),
            )
        })
    }

    fn order_clause(&self, plan: &QueryPlan, has_match: bool) -> Result<String> {
        let table = &self.schema.name;
        let fts = format!("{}_fts", table);
        if plan.order_by.is_empty() {
            // Relevance for matches, insertion order otherwise.
            return Ok(if has_match {
                format!("{}.rank", fts)
            } else {
                format!("{}.id", table)
            });
        }
        let mut parts = Vec::new();
        for spec in &plan.order_by {
            let direction = if spec.descending { "DESC" } else { "ASC" };
            if spec.field == "rank" {
                if !has_match {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "Ordering by rank requires a full-text match query.".to_string(),
                    ));
                }
                parts.push(format!("{}.rank {}", fts, direction));
            } else if spec.field == "id" {
                parts.push(format!("{}.id {}", table, direction));
            } else {
                if self.schema.field(&spec.field).is_none() {
                    return Err(Error::new(
                        ErrorKind::SchemaViolation,
                        format!("'{}' is not defined in the schema.", spec.field),
                    ));
                }
                parts.push(format!("{}.{} {}", table, spec.field, direction));
            }
        }
        Ok(parts.join(", "))
    }
}

fn text_flags_of(chain: &[Lookup]) -> TermFlags {
    lookup::text_flags(chain)
}

fn is_plain_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn needs_quoting(token: &str) -> bool {
    token.chars().any(|c| !is_plain_char(c))
}

fn quote(token: &str) -> String {
    format!("\"{}\"", token.replace('"', "\"\""))
}

fn quote_if_needed(token: &str) -> String {
    if needs_quoting(token) {
        quote(token)
    } else {
        token.to_string()
    }
}

/// Escapes a raw value for embedding in FTS5 match syntax.
///
/// Without relaxing lookups, any operator keyword or punctuation turns the
/// whole value into one quoted phrase, forcing literal interpretation.
/// With lookups, tokens are handled individually so that `*`, `^` and
/// boolean operators survive outside the quotes.
pub fn escape_match_value(value: &str, flags: TermFlags) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if !flags.boolean && !flags.prefix && !flags.initial_token {
        let has_operator = trimmed
            .split_whitespace()
            .any(|t| OPERATOR_KEYWORDS.contains(&t));
        if has_operator || trimmed.chars().any(|c| !is_plain_char(c) && !c.is_whitespace()) {
            return quote(trimmed);
        }
        return trimmed.to_string();
    }

    let mut out: Vec<String> = Vec::new();
    for token in trimmed.split_whitespace() {
        if flags.boolean && (OPERATOR_KEYWORDS.contains(&token) || token == "(" || token == ")") {
            out.push(token.to_string());
            continue;
        }
        let mut rest = token;
        let mut lead = String::new();
        let mut tail = String::new();
        if flags.boolean {
            while let Some(stripped) = rest.strip_prefix('(') {
                lead.push('(');
                rest = stripped;
            }
            while let Some(stripped) = rest.strip_suffix(')') {
                tail.insert(0, ')');
                rest = stripped;
            }
        }
        let initial = flags.initial_token && rest.starts_with('^');
        if initial {
            rest = &rest[1..];
        }
        let prefix = flags.prefix && rest.ends_with('*');
        if prefix {
            rest = &rest[..rest.len() - 1];
        }
        let mut piece = lead;
        if initial {
            piece.push('^');
        }
        piece.push_str(&quote_if_needed(rest));
        if prefix {
            piece.push('*');
        }
        piece.push_str(&tail);
        out.push(piece);
    }
    out.join(" ")
}

/// Rewrites raw autocomplete input into a prefix-or-exact disjunction:
/// `t` becomes `(^t* OR t)`, `a b` becomes `((^a OR a) AND b*)` - only the
/// final token is prefix-expanded.
pub fn autocomplete_pattern(value: &str) -> String {
    let tokens: Vec<String> = value.split_whitespace().map(quote_if_needed).collect();
    match tokens.as_slice() {
        [] => String::new(),
        [t] => format!("(^{t}* OR {t})"),
        [first, rest @ ..] => {
            let mut parts = vec![format!("(^{first} OR {first})")];
            for mid in &rest[..rest.len() - 1] {
                parts.push(mid.clone());
            }
            let last = &rest[rest.len() - 1];
            parts.push(format!("{last}*"));
            format!("({})", parts.join(" AND "))
        }
    }
}
