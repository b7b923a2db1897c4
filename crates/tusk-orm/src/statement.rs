//! Compiled statements.
//!
//! A [`CompiledStatement`] is the only thing handed to a backend: SQL text
//! with `?` placeholders plus the values bound to them, in order.

use std::fmt;

use crate::value::SqlValue;

/// Quotes an identifier with double quotes, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL text and its ordered parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledStatement {
    /// The SQL text.
    pub sql: String,
    /// Parameters bound to the placeholders, in order.
    pub params: Vec<SqlValue>,
}

impl CompiledStatement {
    /// Creates a statement with no parameters.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Counts `?` placeholders outside quoted strings and identifiers.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        let mut count = 0;
        let mut quote: Option<char> = None;
        for c in self.sql.chars() {
            match (quote, c) {
                (None, '\'' | '"') => quote = Some(c),
                (Some(open), c) if c == open => quote = None,
                (None, '?') => count += 1,
                _ => {}
            }
        }
        count
    }

    /// Returns true when placeholder and parameter counts agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.placeholder_count() == self.params.len()
    }
}

impl fmt::Display for CompiledStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Accumulates SQL text and parameters while a statement is rendered.
#[derive(Debug, Default)]
pub(crate) struct StatementBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl StatementBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub(crate) fn push_identifier(&mut self, name: &str) -> &mut Self {
        self.sql.push_str(&quote_identifier(name));
        self
    }

    /// Appends a `?` placeholder bound to `value`.
    pub(crate) fn push_param(&mut self, value: SqlValue) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }

    /// Appends `?, ?, ...` for each value.
    pub(crate) fn push_params(&mut self, values: impl IntoIterator<Item = SqlValue>) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_param(value);
        }
        self
    }

    pub(crate) fn finish(self) -> CompiledStatement {
        debug_assert_eq!(
            self.sql.matches('?').count(),
            self.params.len(),
            "placeholder count must match parameter count"
        );
        CompiledStatement {
            sql: self.sql,
            params: self.params,
        }
    }
}
