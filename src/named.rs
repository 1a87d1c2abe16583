//! Named parameters for connections that only understand positional markers.
//!
//! `:identifier` markers outside quoted spans are replaced by `?` and every
//! occurrence gets its own 1-based position, so a name used twice maps to
//! two positions. Quote handling is simple: a span ends at the
//! next occurrence of the same quote character, and backslash escapes are
//! not recognised. A `::` cast operator is copied through untouched.

use std::collections::HashMap;

use crate::connection::{Connection, Row};
use crate::datatype::SqlValue;
use crate::error::{EavaultError, Result};
use crate::registry::IdHasher;

pub const PLACEHOLDER: char = '?';

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[derive(Debug, Clone)]
pub struct NamedStatement {
    sql: String,
    positions: HashMap<String, Vec<usize>, IdHasher>,
    count: usize,
}

impl NamedStatement {
    pub fn parse(text: &str) -> Self {
        let mut sql = String::with_capacity(text.len());
        let mut positions: HashMap<String, Vec<usize>, IdHasher> = HashMap::default();
        let mut count = 0;
        let mut quote: Option<char> = None;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match quote {
                Some(q) => {
                    if c == q {
                        quote = None;
                    }
                    sql.push(c);
                }
                None => match c {
                    '\'' | '"' => {
                        quote = Some(c);
                        sql.push(c);
                    }
                    ':' if chars.peek() == Some(&':') => {
                        sql.push(c);
                        if let Some(second) = chars.next() {
                            sql.push(second);
                        }
                    }
                    ':' if chars.peek().copied().is_some_and(is_identifier_start) => {
                        let mut name = String::new();
                        while let Some(&n) = chars.peek() {
                            if !is_identifier_part(n) {
                                break;
                            }
                            name.push(n);
                            chars.next();
                        }
                        count += 1;
                        positions.entry(name).or_default().push(count);
                        sql.push(PLACEHOLDER);
                    }
                    _ => sql.push(c),
                },
            }
        }
        Self {
            sql,
            positions,
            count,
        }
    }

    /// The rewritten text with positional markers.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameter_count(&self) -> usize {
        self.count
    }

    /// The 1-based positions recorded for a name, in order of appearance.
    pub fn positions(&self, name: &str) -> Option<&[usize]> {
        self.positions.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }

    pub fn binder(&self) -> Binder<'_> {
        Binder {
            statement: self,
            values: vec![None; self.count],
        }
    }

    /// Binds every pair and returns the positional parameter list.
    pub fn bind_all(&self, pairs: &[(&str, SqlValue)]) -> Result<Vec<SqlValue>> {
        let mut binder = self.binder();
        for (name, value) in pairs {
            binder.bind_by_name(name, value.clone())?;
        }
        binder.finish()
    }

    /// Like [`bind_all`](Self::bind_all) but skips names this statement does
    /// not use, so one set of pairs can feed an update and its insert.
    pub fn bind_matching(&self, pairs: &[(&str, SqlValue)]) -> Result<Vec<SqlValue>> {
        let mut binder = self.binder();
        for (name, value) in pairs {
            if self.positions.contains_key(*name) {
                binder.bind_by_name(name, value.clone())?;
            }
        }
        binder.finish()
    }

    pub fn execute(&self, conn: &mut dyn Connection, pairs: &[(&str, SqlValue)]) -> Result<usize> {
        let params = self.bind_matching(pairs)?;
        conn.execute(&self.sql, &params)
    }

    pub fn query(&self, conn: &mut dyn Connection, pairs: &[(&str, SqlValue)]) -> Result<Vec<Row>> {
        let params = self.bind_matching(pairs)?;
        conn.query(&self.sql, &params)
    }
}

/// Collects values for one execution of a [`NamedStatement`].
#[derive(Debug)]
pub struct Binder<'s> {
    statement: &'s NamedStatement,
    values: Vec<Option<SqlValue>>,
}

impl Binder<'_> {
    /// Sets the value at every position recorded for `name`.
    pub fn bind_by_name(&mut self, name: &str, value: impl Into<SqlValue>) -> Result<&mut Self> {
        let statement = self.statement;
        let positions = statement
            .positions(name)
            .ok_or_else(|| EavaultError::UnknownParameter(name.to_owned()))?;
        let value = value.into();
        for position in positions {
            self.values[position - 1] = Some(value.clone());
        }
        Ok(self)
    }

    pub fn value_at(&self, position: usize) -> Option<&SqlValue> {
        self.values.get(position.checked_sub(1)?)?.as_ref()
    }

    pub fn finish(self) -> Result<Vec<SqlValue>> {
        self.values
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or(EavaultError::UnboundParameter(i + 1)))
            .collect()
    }
}
