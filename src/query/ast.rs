use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::FieldValue;

/// One field/lookup-chain/value triple. The spec string keeps its suffixes
/// (`body__allow_prefix`); resolution happens at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub field: String,
    pub value: FieldValue,
}

/// Boolean tree over single-field terms. Built programmatically, so the
/// structure is the parenthesization; there is no infix parsing step.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Term(Term),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn terms(&self) -> Vec<&Term> {
        match self {
            Expr::Term(t) => vec![t],
            Expr::And(l, r) | Expr::Or(l, r) => {
                let mut out = l.terms();
                out.extend(r.terms());
                out
            }
        }
    }
}

/// Leaf constructor: one field, one value.
pub fn q<V: Into<FieldValue>>(field: &str, value: V) -> Expr {
    Expr::Term(Term {
        field: field.to_string(),
        value: value.into(),
    })
}

pub fn and_(left: Expr, right: Expr) -> Expr {
    left.and(right)
}

pub fn or_(left: Expr, right: Expr) -> Expr {
    left.or(right)
}

/// Arguments for one search call. Keyword terms (implicit AND) and
/// expression trees are mutually exclusive construction modes.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub keywords: Vec<Term>,
    pub exprs: Vec<Expr>,
}

/// Starts a keyword-mode argument list.
pub fn terms() -> QueryArgs {
    QueryArgs::default()
}

impl QueryArgs {
    pub fn set<V: Into<FieldValue>>(mut self, field: &str, value: V) -> Self {
        self.keywords.push(Term {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn expr(mut self, expr: Expr) -> Self {
        self.exprs.push(expr);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.exprs.is_empty()
    }

    /// Enforces the one-mode-per-call invariant.
    pub fn validate_mode(&self) -> Result<()> {
        if !self.keywords.is_empty() && !self.exprs.is_empty() {
            return Err(Error::new(
                ErrorKind::MixedQueryMode,
                "Keyword terms and combinator expressions cannot be mixed in one call.".to_string(),
            ));
        }
        if self.exprs.len() > 1 {
            return Err(Error::new(
                ErrorKind::MixedQueryMode,
                "Pass a single expression; combine terms with and_/or_ instead.".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<Expr> for QueryArgs {
    fn from(expr: Expr) -> Self {
        QueryArgs {
            keywords: Vec::new(),
            exprs: vec![expr],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn combinators_preserve_structure() {
        let expr = or_(q("body", "world").and(q("body", "hello")), q("filename", "a.txt"));
        match &expr {
            Expr::Or(left, _) => assert!(matches!(**left, Expr::And(_, _))),
            _ => panic!("expected Or at the root"),
        }
        assert_eq!(expr.terms().len(), 3);
    }

    #[test]
    fn mixed_modes_are_rejected() {
        let args = terms().set("body", "hello").expr(q("body", "world"));
        let err = args.validate_mode().unwrap_err();
        assert_eq!(err.kind, ErrorKind::MixedQueryMode);
    }

    #[test]
    fn two_loose_expressions_are_rejected() {
        let args = terms().expr(q("a", "x")).expr(q("b", "y"));
        assert_eq!(args.validate_mode().unwrap_err().kind, ErrorKind::MixedQueryMode);
    }

    #[test]
    fn keyword_mode_alone_is_fine() {
        assert!(terms().set("body", "hello").set("num__gt", 2).validate_mode().is_ok());
    }
}
