use crate::core::error::{Error, ErrorKind, Result};
use crate::schema::schema::{Field, FieldType};

/// Registered lookup suffixes. A field spec like `price__gte` resolves to
/// the base field plus a chain of these, applied left-to-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    AllowBoolean,
    AllowPrefix,
    AllowInitialToken,
    Gt,
    Gte,
    Lt,
    Lte,
    Year,
    Month,
    Day,
}

impl Lookup {
    /// Dispatch table from suffix name to lookup. Unknown names are a
    /// compile-time (pre-execution) error for the caller.
    pub fn parse(suffix: &str) -> Option<Lookup> {
        match suffix {
            "allow_boolean" => Some(Lookup::AllowBoolean),
            "allow_prefix" => Some(Lookup::AllowPrefix),
            "allow_initial_token" => Some(Lookup::AllowInitialToken),
            "gt" => Some(Lookup::Gt),
            "gte" => Some(Lookup::Gte),
            "lt" => Some(Lookup::Lt),
            "lte" => Some(Lookup::Lte),
            "year" => Some(Lookup::Year),
            "month" => Some(Lookup::Month),
            "day" => Some(Lookup::Day),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lookup::AllowBoolean => "allow_boolean",
            Lookup::AllowPrefix => "allow_prefix",
            Lookup::AllowInitialToken => "allow_initial_token",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::Year => "year",
            Lookup::Month => "month",
            Lookup::Day => "day",
        }
    }

    /// Lookups that relax match-syntax escaping. Indexed text only.
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Lookup::AllowBoolean | Lookup::AllowPrefix | Lookup::AllowInitialToken
        )
    }

    /// Lookups rendered as parameterized comparisons, never match syntax.
    pub fn is_comparison(&self) -> bool {
        matches!(self, Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte)
    }

    pub fn is_date_part(&self) -> bool {
        matches!(self, Lookup::Year | Lookup::Month | Lookup::Day)
    }

    pub fn sql_operator(&self) -> &'static str {
        match self {
            Lookup::Gt => ">",
            Lookup::Gte => ">=",
            Lookup::Lt => "<",
            Lookup::Lte => "<=",
            _ => "=",
        }
    }

    pub fn strftime_code(&self) -> &'static str {
        match self {
            Lookup::Year => "%Y",
            Lookup::Month => "%m",
            Lookup::Day => "%d",
            _ => unreachable!("not a date-part lookup"),
        }
    }
}

/// Splits `name__suffix__suffix` into the base field name and its chain.
pub fn parse_field_spec(spec: &str) -> Result<(&str, Vec<Lookup>)> {
    let mut parts = spec.split("__");
    let name = parts.next().unwrap_or("");
    let mut chain = Vec::new();
    for part in parts {
        match Lookup::parse(part) {
            Some(lookup) => chain.push(lookup),
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidLookup,
                    format!("'{}' is not a registered lookup (in '{}').", part, spec),
                ));
            }
        }
    }
    Ok((name, chain))
}

/// Escaping relaxations accumulated over a chain, left-to-right.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermFlags {
    pub boolean: bool,
    pub prefix: bool,
    pub initial_token: bool,
}

pub fn text_flags(chain: &[Lookup]) -> TermFlags {
    let mut flags = TermFlags::default();
    for lookup in chain {
        match lookup {
            Lookup::AllowBoolean => flags.boolean = true,
            Lookup::AllowPrefix => flags.prefix = true,
            Lookup::AllowInitialToken => flags.initial_token = true,
            _ => {}
        }
    }
    flags
}

fn invalid(field: &Field, lookup: Lookup) -> Error {
    Error::new(
        ErrorKind::InvalidLookup,
        format!(
            "Lookup '{}' is not valid for field '{}'.",
            lookup.name(),
            field.name
        ),
    )
}

/// Type-checks a chain against the field it is applied to.
pub fn validate_chain(field: &Field, chain: &[Lookup]) -> Result<()> {
    let mut non_text = 0;
    for lookup in chain {
        if lookup.is_text() && !field.is_fts() {
            return Err(invalid(field, *lookup));
        }
        if lookup.is_comparison() {
            non_text += 1;
            // Comparisons apply to columns outside the full-text index.
            let comparable = !field.is_fts()
                && matches!(
                    field.field_type,
                    FieldType::Int
                        | FieldType::Real
                        | FieldType::Date
                        | FieldType::Datetime
                        | FieldType::Text
                );
            if !comparable {
                return Err(invalid(field, *lookup));
            }
        }
        if lookup.is_date_part() {
            non_text += 1;
            if !matches!(field.field_type, FieldType::Date | FieldType::Datetime) {
                return Err(invalid(field, *lookup));
            }
        }
    }
    if non_text > 1 {
        return Err(Error::new(
            ErrorKind::InvalidLookup,
            format!(
                "Field '{}' combines more than one comparison lookup; use one term per comparison.",
                field.name
            ),
        ));
    }
    if non_text > 0 && chain.iter().any(|l| l.is_text()) {
        return Err(Error::new(
            ErrorKind::InvalidLookup,
            format!(
                "Field '{}' mixes match-syntax and comparison lookups in one chain.",
                field.name
            ),
        ));
    }
    Ok(())
}
