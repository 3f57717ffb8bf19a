//! Search Query Parser
//!
//! Grammar: whitespace-separated terms, double quotes group a value.
//!   `field:value`  exact match on a schema field, typed by the schema
//!   `word`         substring match on path or hostname
//! All terms must match. Dates accept `YYYY-MM-DD` (whole day) or RFC 3339.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::logic::dataset::schema::{field_type, FieldType};
use crate::logic::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Half-open `[from, to)`
    Date { from: DateTime<Utc>, to: DateTime<Utc> },
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Field { name: String, value: FieldValue },
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub terms: Vec<Term>,
}

impl ParsedQuery {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Evaluate against a flat record document (see `StoredRecord::to_document`)
    pub fn matches(&self, doc: &serde_json::Value) -> bool {
        self.terms.iter().all(|term| term_matches(term, doc))
    }
}

pub fn parse(text: &str) -> Result<ParsedQuery> {
    let tokens = tokenize(text).map_err(|m| PipelineError::query_syntax(m, text))?;

    let mut terms = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.split_once(':') {
            // drive letters ("c:\...") are text, not fields
            Some((name, raw)) if name.len() > 1 => {
                let ty = field_type(name)
                    .ok_or_else(|| PipelineError::query_syntax(format!("unknown field '{}'", name), text))?;
                let value = parse_value(name, ty, raw).map_err(|m| PipelineError::query_syntax(m, text))?;
                terms.push(Term::Field { name: name.to_string(), value });
            }
            _ => terms.push(Term::Text(token.to_lowercase())),
        }
    }

    Ok(ParsedQuery { terms })
}

fn tokenize(text: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut touched = false;

    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                touched = true;
            }
            c if c.is_whitespace() && !quoted => {
                if touched {
                    tokens.push(std::mem::take(&mut current));
                    touched = false;
                }
            }
            c => {
                current.push(c);
                touched = true;
            }
        }
    }

    if quoted {
        return Err("unterminated quote".to_string());
    }
    if touched {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_value(name: &str, ty: FieldType, raw: &str) -> std::result::Result<FieldValue, String> {
    let bad = |what: &str| format!("field '{}' expects {}, got '{}'", name, what, raw);

    match ty {
        FieldType::Boolean => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(FieldValue::Boolean(true)),
            "false" | "0" | "no" => Ok(FieldValue::Boolean(false)),
            _ => Err(bad("a boolean")),
        },
        FieldType::Integer => raw.parse().map(FieldValue::Integer).map_err(|_| bad("an integer")),
        FieldType::Float => raw.parse().map(FieldValue::Float).map_err(|_| bad("a number")),
        FieldType::Date => parse_date(raw).ok_or_else(|| bad("a date")),
        FieldType::String if name == "class_label" => match raw {
            "unlabeled" | "none" => Ok(FieldValue::String(String::new())),
            "evil" | "not_evil" | "suspicious" => Ok(FieldValue::String(raw.to_string())),
            _ => Err(bad("a class label")),
        },
        FieldType::String => Ok(FieldValue::String(raw.to_lowercase())),
    }
}

fn parse_date(raw: &str) -> Option<FieldValue> {
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let from = day.and_hms_opt(0, 0, 0)?.and_utc();
        return Some(FieldValue::Date { from, to: from + Duration::days(1) });
    }
    let at = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
    Some(FieldValue::Date { from: at, to: at + Duration::seconds(1) })
}

fn term_matches(term: &Term, doc: &serde_json::Value) -> bool {
    match term {
        Term::Text(word) => ["path", "hostname"].iter().any(|f| {
            doc.get(f)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.to_lowercase().contains(word.as_str()))
        }),
        Term::Field { name, value } => {
            let Some(actual) = doc.get(name) else {
                return false;
            };
            match value {
                FieldValue::Boolean(b) => actual.as_bool() == Some(*b),
                FieldValue::Integer(i) => actual.as_i64() == Some(*i),
                FieldValue::Float(f) => actual.as_f64().is_some_and(|a| (a - f).abs() < 1e-6),
                FieldValue::String(s) => actual.as_str().is_some_and(|a| a.eq_ignore_ascii_case(s)),
                FieldValue::Date { from, to } => actual
                    .as_str()
                    .and_then(|a| DateTime::parse_from_rfc3339(a).ok())
                    .map(|a| a.with_timezone(&Utc))
                    .is_some_and(|a| a >= *from && a < *to),
            }
        }
    }
}
