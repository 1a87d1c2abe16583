//! Parameterized predicates over registered fields.
//!
//! Column names always come from the registry; caller values are only ever
//! bound. Predicates are joined left to right by the pending connective,
//! which is `AND` unless `or()` was called just before.
//!
//! Builder steps never fail on their own. The first lookup or kind error is
//! kept and returned by [`Filter::render`] or [`Filter::find_guids`].

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::connection::Connection;
use crate::datatype::{ScalarKind, SqlValue, Value};
use crate::error::{EavaultError, Phase, Result, StorageContext};
use crate::registry::{EntityTypeId, Field, FieldId, FieldKind, Registry};
use crate::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Connective::And => write!(f, "AND"),
            Connective::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone)]
enum Comparison {
    Equals(Value),
    Like(String),
    Between(Value, Value),
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Equals(_) => "= ?",
            Comparison::Like(_) => "LIKE ?",
            Comparison::Between(..) => "BETWEEN ? AND ?",
        }
    }

    fn values(&self) -> Vec<SqlValue> {
        match self {
            Comparison::Equals(v) => vec![v.to_sql_value()],
            Comparison::Like(pattern) => vec![SqlValue::from(pattern.as_str())],
            Comparison::Between(low, high) => vec![low.to_sql_value(), high.to_sql_value()],
        }
    }
}

#[derive(Debug, Clone)]
struct Predicate {
    connective: Connective,
    field: Arc<Field>,
    kind: ScalarKind,
    comparison: Comparison,
}

#[derive(Debug)]
pub struct Filter<'r> {
    registry: &'r Registry,
    predicates: Vec<Predicate>,
    pending: Connective,
    error: Option<EavaultError>,
}

impl<'r> Filter<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            predicates: Vec::new(),
            pending: Connective::And,
            error: None,
        }
    }

    pub fn equals(self, field: FieldId, value: impl Into<Value>) -> Self {
        let value = value.into();
        let kind = value.kind();
        self.push(field, kind, Comparison::Equals(value))
    }

    pub fn like(self, field: FieldId, pattern: &str) -> Self {
        self.push(field, ScalarKind::Text, Comparison::Like(pattern.to_owned()))
    }

    pub fn between(self, field: FieldId, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        let (low, high) = (low.into(), high.into());
        if low.kind() != high.kind() {
            let found = high.kind().name().to_string();
            return self.fail(EavaultError::KindMismatch {
                field,
                expected: low.kind().name().to_string(),
                found,
            });
        }
        let kind = low.kind();
        self.push(field, kind, Comparison::Between(low, high))
    }

    pub fn and(mut self) -> Self {
        self.pending = Connective::And;
        self
    }

    /// Joins only the next predicate with `OR`.
    pub fn or(mut self) -> Self {
        self.pending = Connective::Or;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    fn fail(mut self, error: EavaultError) -> Self {
        self.error.get_or_insert(error);
        self
    }

    fn push(mut self, id: FieldId, kind: ScalarKind, comparison: Comparison) -> Self {
        let field = match self.registry.lookup_field(id) {
            Ok(field) => field,
            Err(e) => return self.fail(e),
        };
        if field.kind() != FieldKind::Scalar(kind) {
            return self.fail(EavaultError::KindMismatch {
                field: id,
                expected: field.kind().code(),
                found: kind.name().to_string(),
            });
        }
        self.predicates.push(Predicate {
            connective: self.pending,
            field,
            kind,
            comparison,
        });
        self.pending = Connective::And;
        self
    }

    fn checked(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// The predicate as a WHERE fragment over columns named after the
    /// fields, with the values in binding order.
    pub fn render(&self) -> Result<(String, Vec<SqlValue>)> {
        self.checked()?;
        let mut sql = String::new();
        let mut values = Vec::new();
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                sql.push_str(&format!(" {} ", predicate.connective));
            }
            sql.push_str(&format!("{} {}", predicate.field.name(), predicate.comparison.operator()));
            values.extend(predicate.comparison.values());
        }
        Ok((sql, values))
    }

    /// The same predicate against EAV storage, each field test becoming a
    /// sub-select on the table of its kind.
    pub fn render_eav(&self, type_id: EntityTypeId) -> Result<(String, Vec<SqlValue>)> {
        self.checked()?;
        let mut sql = format!(
            "select o.guid from {} o where o.type_id = ?",
            schema::OVERVIEW
        );
        let mut values = vec![SqlValue::from(type_id)];
        if !self.predicates.is_empty() {
            sql.push_str(" and (");
            for (i, predicate) in self.predicates.iter().enumerate() {
                if i > 0 {
                    sql.push_str(&format!(" {} ", predicate.connective));
                }
                sql.push_str(&format!(
                    "o.guid in (select guid from {} where field_id = ? and value {})",
                    schema::scalar_table(predicate.kind),
                    predicate.comparison.operator()
                ));
                values.push(SqlValue::from(predicate.field.id()));
                values.extend(predicate.comparison.values());
            }
            sql.push(')');
        }
        sql.push_str(" order by o.created, o.guid");
        Ok((sql, values))
    }

    /// Guids of the given entity type matching the predicate, oldest first.
    /// An empty filter matches every instance of the type.
    pub fn find_guids(&self, conn: &mut dyn Connection, type_id: EntityTypeId) -> Result<Vec<String>> {
        let (sql, values) = self.render_eav(type_id)?;
        let rows = conn.query(&sql, &values).context(Phase::Query, type_id)?;
        debug!(type_id, predicates = self.predicates.len(), rows = rows.len(), "filter run");
        rows.iter().map(|row| row.text(0).map(str::to_owned)).collect()
    }
}
