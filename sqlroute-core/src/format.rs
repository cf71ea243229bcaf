//! Literal escaping and placeholder substitution.
//!
//! Statements are fully rendered before they reach the driver. Positional
//! parameters fill `?` (value) and `??` (identifier) placeholders in order;
//! named parameters fill `:name` tokens. A named token with no matching key
//! is rendered as `NULL`, never left in the text.
//!
//! The placeholder scan walks the text once and does not look inside quoted
//! regions (`'...'`, `"..."` and `` `...` ``), so `'07:07:07'` or `'?'` in a
//! literal are left alone.

use crate::value::{Params, SqlValue};
use std::collections::BTreeMap;

const NULL_LITERAL: &str = "NULL";

/// Escaping capability injected into the query executor.
pub trait QueryFormatter: Send + Sync {
    /// Render a value as a SQL literal.
    fn escape(&self, value: &SqlValue) -> String;

    /// Render an identifier, quoting each dotted part.
    fn escape_id(&self, identifier: &str) -> String;

    /// Render `query` with `params` substituted into its placeholders.
    fn format(&self, query: &str, params: &Params) -> String {
        match params {
            Params::None => query.to_string(),
            Params::Positional(values) => substitute_positional(self, query, values),
            Params::Named(values) => substitute_named(self, query, values),
        }
    }
}

/// MySQL literal rules (backslash escapes, backtick identifiers).
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlFormatter;

impl MySqlFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl QueryFormatter for MySqlFormatter {
    fn escape(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => NULL_LITERAL.to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::UInt(v) => v.to_string(),
            SqlValue::Float(v) if v.is_finite() => v.to_string(),
            SqlValue::Float(_) => NULL_LITERAL.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Text(v) => escape_string(v),
            SqlValue::Bytes(v) => format!("X'{}'", hex::encode(v)),
            SqlValue::DateTime(v) => format!("'{}'", v.format("%Y-%m-%d %H:%M:%S%.3f")),
            SqlValue::List(items) => items
                .iter()
                .map(|item| match item {
                    SqlValue::List(_) => format!("({})", self.escape(item)),
                    _ => self.escape(item),
                })
                .collect::<Vec<_>>()
                .join(", "),
            SqlValue::Raw(sql) => sql.clone(),
        }
    }

    fn escape_id(&self, identifier: &str) -> String {
        identifier
            .split('.')
            .map(|part| format!("`{}`", part.replace('`', "``")))
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn escape_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\x08' => out.push_str("\\b"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Index just past the quoted region that opens at `start`.
fn quoted_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn is_quote(b: u8) -> bool {
    matches!(b, b'\'' | b'"' | b'`')
}

fn substitute_positional<F>(formatter: &F, query: &str, values: &[SqlValue]) -> String
where
    F: QueryFormatter + ?Sized,
{
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut values = values.iter();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if is_quote(bytes[i]) {
            i = quoted_end(bytes, i);
            continue;
        }
        if bytes[i] != b'?' {
            i += 1;
            continue;
        }

        let identifier = bytes.get(i + 1) == Some(&b'?');
        let width = if identifier { 2 } else { 1 };
        // Placeholders past the last value stay verbatim.
        if let Some(value) = values.next() {
            out.push_str(&query[copied..i]);
            if identifier {
                out.push_str(&escape_identifier_value(formatter, value));
            } else {
                out.push_str(&formatter.escape(value));
            }
            copied = i + width;
        }
        i += width;
    }

    out.push_str(&query[copied..]);
    out
}

fn escape_identifier_value<F>(formatter: &F, value: &SqlValue) -> String
where
    F: QueryFormatter + ?Sized,
{
    match value {
        SqlValue::Text(name) => formatter.escape_id(name),
        SqlValue::List(items) => items
            .iter()
            .map(|item| escape_identifier_value(formatter, item))
            .collect::<Vec<_>>()
            .join(", "),
        other => formatter.escape(other),
    }
}

fn substitute_named<F>(
    formatter: &F,
    query: &str,
    values: &BTreeMap<String, SqlValue>,
) -> String
where
    F: QueryFormatter + ?Sized,
{
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if is_quote(bytes[i]) {
            i = quoted_end(bytes, i);
            continue;
        }
        if bytes[i] != b':' {
            i += 1;
            continue;
        }

        let name_len = bytes[i + 1..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        if name_len == 0 {
            i += 1;
            continue;
        }

        let name = &query[i + 1..i + 1 + name_len];
        out.push_str(&query[copied..i]);
        match values.get(name) {
            Some(value) => out.push_str(&formatter.escape(value)),
            None => out.push_str(NULL_LITERAL),
        }
        i += 1 + name_len;
        copied = i;
    }

    out.push_str(&query[copied..]);
    out
}
