//! `QuerySet` implementation for lazy, chainable database queries.
//!
//! A `QuerySet` is an immutable chain of nodes. Every chain method returns a
//! new `QuerySet` whose head wraps the previous one, so a base query can be
//! shared and extended in several directions:
//!
//! ```ignore
//! let adults = user.query().filter(Q::gte("age", 18));
//! let newest = adults.order_by("-id").limit(10);
//! let named_a = adults.filter(Q::startswith("name", "A"));
//! ```
//!
//! Nothing touches the database until one of the async methods is awaited.

use std::sync::Arc;

use tracing::debug;

use crate::backend::Backend;
use crate::error::{OrmError, Result};
use crate::model::Model;
use crate::query::{Aggregate, Connective, FilterExpr, Q};
use crate::record::{AggregateRow, Record};
use crate::statement::{CompiledStatement, StatementBuilder};
use crate::value::{SqlValue, Values, ValueKind};

/// Order direction for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

/// An ordering directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Field to order by
    pub field: String,
    /// Order direction
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Parses `"field"` (ascending) or `"-field"` (descending).
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        spec.strip_prefix('-').map_or_else(
            || Self {
                field: spec.to_string(),
                direction: OrderDirection::Asc,
            },
            |field| Self {
                field: field.to_string(),
                direction: OrderDirection::Desc,
            },
        )
    }
}

#[derive(Debug)]
enum Step {
    Filter(FilterExpr),
    Exclude(FilterExpr),
    OrderBy(OrderBy),
    Limit(u64),
    Offset(u64),
    GroupBy(Vec<String>),
    Only(Vec<String>),
    Distinct,
}

#[derive(Debug)]
struct Node {
    step: Step,
    parent: Option<Arc<Node>>,
}

/// The chain flattened into clause order.
#[derive(Default)]
struct Parts<'a> {
    conditions: Vec<(bool, &'a FilterExpr)>,
    order: Vec<&'a OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    group_by: Vec<&'a str>,
    only: Option<&'a [String]>,
    distinct: bool,
}

fn bound_int(n: u64) -> SqlValue {
    SqlValue::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// A lazy, chainable query over one model.
#[derive(Debug, Clone)]
pub struct QuerySet {
    model: Model,
    head: Option<Arc<Node>>,
}

impl QuerySet {
    /// Creates an unfiltered `QuerySet`.
    #[must_use]
    pub const fn new(model: Model) -> Self {
        Self { model, head: None }
    }

    /// Returns the model being queried.
    #[must_use]
    pub const fn model(&self) -> &Model {
        &self.model
    }

    fn push(&self, step: Step) -> Self {
        Self {
            model: self.model.clone(),
            head: Some(Arc::new(Node {
                step,
                parent: self.head.clone(),
            })),
        }
    }

    /// Adds a filter. Filters are combined with AND.
    #[must_use]
    pub fn filter(&self, q: Q) -> Self {
        self.push(Step::Filter(q.into_expr()))
    }

    /// Adds an exclusion, rendered as `NOT (...)`.
    #[must_use]
    pub fn exclude(&self, q: Q) -> Self {
        self.push(Step::Exclude(q.into_expr()))
    }

    /// Adds an ordering directive: `"field"` or `"-field"`.
    ///
    /// Directives apply in call order.
    #[must_use]
    pub fn order_by(&self, spec: &str) -> Self {
        self.push(Step::OrderBy(OrderBy::parse(spec)))
    }

    /// Limits the number of rows. The last call wins.
    #[must_use]
    pub fn limit(&self, n: u64) -> Self {
        self.push(Step::Limit(n))
    }

    /// Skips rows. The last call wins.
    #[must_use]
    pub fn offset(&self, n: u64) -> Self {
        self.push(Step::Offset(n))
    }

    /// Groups aggregate results by the given fields.
    #[must_use]
    pub fn group_by(&self, fields: &[&str]) -> Self {
        self.push(Step::GroupBy(fields.iter().copied().map(String::from).collect()))
    }

    /// Selects only the given fields. The last call wins.
    #[must_use]
    pub fn only(&self, fields: &[&str]) -> Self {
        self.push(Step::Only(fields.iter().copied().map(String::from).collect()))
    }

    /// Selects distinct rows.
    #[must_use]
    pub fn distinct(&self) -> Self {
        self.push(Step::Distinct)
    }

    fn parts(&self) -> Parts<'_> {
        let mut steps = Vec::new();
        let mut node = self.head.as_deref();
        while let Some(n) = node {
            steps.push(&n.step);
            node = n.parent.as_deref();
        }

        let mut parts = Parts::default();
        for step in steps.into_iter().rev() {
            match step {
                Step::Filter(expr) => parts.conditions.push((false, expr)),
                Step::Exclude(expr) => parts.conditions.push((true, expr)),
                Step::OrderBy(order) => parts.order.push(order),
                Step::Limit(n) => parts.limit = Some(*n),
                Step::Offset(n) => parts.offset = Some(*n),
                Step::GroupBy(fields) => parts.group_by.extend(fields.iter().map(String::as_str)),
                Step::Only(fields) => parts.only = Some(fields.as_slice()),
                Step::Distinct => parts.distinct = true,
            }
        }
        parts
    }

    fn write_where(&self, parts: &Parts<'_>, out: &mut StatementBuilder) -> Result<()> {
        if parts.conditions.is_empty() {
            return Ok(());
        }
        out.push(" WHERE ");
        let single = parts.conditions.len() == 1;
        for (i, (negated, expr)) in parts.conditions.iter().enumerate() {
            if i > 0 {
                out.push(" AND ");
            }
            if *negated {
                out.push("NOT (");
                expr.render(&self.model, out)?;
                out.push(")");
            } else if single {
                expr.render(&self.model, out)?;
            } else {
                expr.render_within(Connective::And, &self.model, out)?;
            }
        }
        Ok(())
    }

    fn write_order(&self, parts: &Parts<'_>, out: &mut StatementBuilder) -> Result<()> {
        for (i, order) in parts.order.iter().enumerate() {
            self.model.require_field(&order.field)?;
            out.push(if i == 0 { " ORDER BY " } else { ", " })
                .push_identifier(&order.field);
            if order.direction == OrderDirection::Desc {
                out.push(" DESC");
            }
        }
        Ok(())
    }

    fn write_pagination(parts: &Parts<'_>, out: &mut StatementBuilder) {
        match (parts.limit, parts.offset) {
            (Some(limit), offset) => {
                out.push(" LIMIT ").push_param(bound_int(limit));
                if let Some(offset) = offset {
                    out.push(" OFFSET ").push_param(bound_int(offset));
                }
            }
            // SQLite only accepts OFFSET after a LIMIT; -1 means no limit.
            (None, Some(offset)) => {
                out.push(" LIMIT -1 OFFSET ").push_param(bound_int(offset));
            }
            (None, None) => {}
        }
    }

    /// Returns the selected field positions.
    fn columns(&self, parts: &Parts<'_>) -> Result<Arc<[usize]>> {
        parts.only.map_or_else(
            || Ok((0..self.model.fields().len()).collect::<Vec<_>>().into()),
            |names| {
                names
                    .iter()
                    .map(|name| {
                        self.model
                            .position(name)
                            .ok_or_else(|| OrmError::UnknownField {
                                model: self.model.name().to_string(),
                                field: name.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Arc::from)
            },
        )
    }

    fn select(&self, parts: &Parts<'_>) -> Result<(CompiledStatement, Arc<[usize]>)> {
        let columns = self.columns(parts)?;
        let fields = self.model.fields();

        let mut out = StatementBuilder::new();
        out.push(if parts.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        for (i, &c) in columns.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push_identifier(&fields[c].name);
        }
        out.push(" FROM ").push_identifier(self.model.table());
        self.write_where(parts, &mut out)?;
        self.write_order(parts, &mut out)?;
        Self::write_pagination(parts, &mut out);
        Ok((out.finish(), columns))
    }

    // `"pk" IN (SELECT "pk" ...)` restricts UPDATE and DELETE to a window.
    fn write_target(&self, parts: &Parts<'_>, out: &mut StatementBuilder) -> Result<()> {
        if parts.limit.is_none() && parts.offset.is_none() {
            return self.write_where(parts, out);
        }
        let pk = &self.model.primary_key().name;
        out.push(" WHERE ")
            .push_identifier(pk)
            .push(" IN (SELECT ")
            .push_identifier(pk)
            .push(" FROM ")
            .push_identifier(self.model.table());
        self.write_where(parts, out)?;
        self.write_order(parts, out)?;
        Self::write_pagination(parts, out);
        out.push(")");
        Ok(())
    }

    /// Compiles the SELECT statement for this query.
    ///
    /// # Errors
    ///
    /// Fails when a filter, ordering or projection does not fit the model.
    pub fn compile_select(&self) -> Result<CompiledStatement> {
        self.select(&self.parts()).map(|(stmt, _)| stmt)
    }

    /// Compiles `SELECT COUNT(*)` over the matching rows.
    ///
    /// Pagination and DISTINCT are honoured by counting a subquery.
    ///
    /// # Errors
    ///
    /// Fails when a filter does not fit the model.
    pub fn compile_count(&self) -> Result<CompiledStatement> {
        let parts = self.parts();
        if parts.limit.is_some() || parts.offset.is_some() || parts.distinct {
            let (inner, _) = self.select(&parts)?;
            return Ok(CompiledStatement {
                sql: format!("SELECT COUNT(*) FROM ({})", inner.sql),
                params: inner.params,
            });
        }
        let mut out = StatementBuilder::new();
        out.push("SELECT COUNT(*) FROM ")
            .push_identifier(self.model.table());
        self.write_where(&parts, &mut out)?;
        Ok(out.finish())
    }

    /// Compiles `SELECT EXISTS(...)` over the matching rows.
    ///
    /// # Errors
    ///
    /// Fails when a filter does not fit the model.
    pub fn compile_exists(&self) -> Result<CompiledStatement> {
        let (inner, _) = self.select(&self.parts())?;
        Ok(CompiledStatement {
            sql: format!("SELECT EXISTS({})", inner.sql),
            params: inner.params,
        })
    }

    fn aggregate_statement(
        &self,
        aggregates: &[Aggregate],
    ) -> Result<(CompiledStatement, Arc<[String]>, Vec<ValueKind>)> {
        if aggregates.is_empty() {
            return Err(OrmError::QueryError(
                "aggregate requires at least one aggregate function".to_string(),
            ));
        }
        let parts = self.parts();
        let mut names = Vec::new();
        let mut kinds = Vec::new();

        let mut out = StatementBuilder::new();
        out.push("SELECT ");
        for (i, name) in parts.group_by.iter().enumerate() {
            let field = self.model.require_field(name)?;
            if i > 0 {
                out.push(", ");
            }
            out.push_identifier(name);
            names.push((*name).to_string());
            kinds.push(field.field_type.value_kind());
        }
        for (i, aggregate) in aggregates.iter().enumerate() {
            if i > 0 || !parts.group_by.is_empty() {
                out.push(", ");
            }
            kinds.push(aggregate.render(&self.model, &mut out)?);
            names.push(aggregate.output_name());
        }
        out.push(" FROM ").push_identifier(self.model.table());
        self.write_where(&parts, &mut out)?;
        for (i, name) in parts.group_by.iter().enumerate() {
            out.push(if i == 0 { " GROUP BY " } else { ", " })
                .push_identifier(name);
        }
        self.write_order(&parts, &mut out)?;
        Self::write_pagination(&parts, &mut out);
        Ok((out.finish(), names.into(), kinds))
    }

    /// Compiles an aggregate query, grouped by the `group_by` fields.
    ///
    /// # Errors
    ///
    /// Fails without aggregates, or when an aggregate or grouping field
    /// does not fit the model.
    pub fn compile_aggregate(&self, aggregates: &[Aggregate]) -> Result<CompiledStatement> {
        self.aggregate_statement(aggregates).map(|(stmt, _, _)| stmt)
    }

    /// Compiles an UPDATE of the matching rows.
    ///
    /// # Errors
    ///
    /// Fails without values, or when a value does not fit its field.
    pub fn compile_update(&self, values: &Values) -> Result<CompiledStatement> {
        if values.is_empty() {
            return Err(OrmError::QueryError(
                "update requires at least one value".to_string(),
            ));
        }
        let parts = self.parts();
        let mut out = StatementBuilder::new();
        out.push("UPDATE ")
            .push_identifier(self.model.table())
            .push(" SET ");
        for (i, (name, value)) in values.iter().enumerate() {
            let field = self.model.require_field(name)?;
            if !field.accepts(value) {
                return Err(OrmError::TypeMismatch {
                    field: name.to_string(),
                    expected: field.field_type.to_string(),
                    found: value.kind(),
                });
            }
            if i > 0 {
                out.push(", ");
            }
            out.push_identifier(name).push(" = ").push_param(value.clone());
        }
        self.write_target(&parts, &mut out)?;
        Ok(out.finish())
    }

    /// Compiles a DELETE of the matching rows.
    ///
    /// # Errors
    ///
    /// Fails when a filter does not fit the model.
    pub fn compile_delete(&self) -> Result<CompiledStatement> {
        let parts = self.parts();
        let mut out = StatementBuilder::new();
        out.push("DELETE FROM ").push_identifier(self.model.table());
        self.write_target(&parts, &mut out)?;
        Ok(out.finish())
    }

    async fn fetch_records<B: Backend>(&self, db: &B, qs: &Self) -> Result<Vec<Record>> {
        let (stmt, columns) = qs.select(&qs.parts())?;
        let fields = self.model.fields();
        let shape: Vec<ValueKind> = columns
            .iter()
            .map(|&c| fields[c].field_type.value_kind())
            .collect();
        debug!(model = self.model.name(), sql = %stmt.sql, "select");
        let rows = db.fetch(&stmt, &shape).await?;
        Ok(rows
            .into_iter()
            .map(|values| Record::new(self.model.clone(), columns.clone(), values))
            .collect())
    }

    /// Returns all matching records.
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn all<B: Backend>(&self, db: &B) -> Result<Vec<Record>> {
        self.fetch_records(db, self).await
    }

    // Limits to at most `n` rows without raising a smaller existing limit.
    fn capped(&self, n: u64) -> Self {
        let n = self.parts().limit.map_or(n, |limit| limit.min(n));
        self.limit(n)
    }

    /// Returns the first matching record, fetched with `LIMIT 1`.
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn first<B: Backend>(&self, db: &B) -> Result<Option<Record>> {
        let records = self.fetch_records(db, &self.capped(1)).await?;
        Ok(records.into_iter().next())
    }

    /// Returns exactly one matching record.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` or `MultipleObjectsReturned` otherwise.
    pub async fn get<B: Backend>(&self, db: &B) -> Result<Record> {
        let mut records = self.fetch_records(db, &self.capped(2)).await?;
        match records.len() {
            0 => Err(OrmError::NotFound),
            1 => records.pop().ok_or(OrmError::NotFound),
            _ => Err(OrmError::MultipleObjectsReturned),
        }
    }

    async fn scalar<B: Backend>(
        &self,
        db: &B,
        stmt: &CompiledStatement,
        kind: ValueKind,
    ) -> Result<SqlValue> {
        debug!(model = self.model.name(), sql = %stmt.sql, "scalar");
        let rows = db.fetch(stmt, &[kind]).await?;
        rows.into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .ok_or_else(|| OrmError::QueryError("scalar query returned no row".to_string()))
    }

    /// Returns the number of matching rows.
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn count<B: Backend>(&self, db: &B) -> Result<i64> {
        let stmt = self.compile_count()?;
        let value = self.scalar(db, &stmt, ValueKind::Integer).await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Returns whether any row matches.
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn exists<B: Backend>(&self, db: &B) -> Result<bool> {
        let stmt = self.compile_exists()?;
        let value = self.scalar(db, &stmt, ValueKind::Boolean).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Runs aggregates and returns one row per group (one row when
    /// ungrouped).
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn aggregate<B: Backend>(
        &self,
        db: &B,
        aggregates: &[Aggregate],
    ) -> Result<Vec<AggregateRow>> {
        let (stmt, names, kinds) = self.aggregate_statement(aggregates)?;
        debug!(model = self.model.name(), sql = %stmt.sql, "aggregate");
        let rows = db.fetch(&stmt, &kinds).await?;
        Ok(rows
            .into_iter()
            .map(|values| AggregateRow::new(names.clone(), values))
            .collect())
    }

    /// Updates the matching rows and returns the number affected.
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn update<B: Backend>(&self, db: &B, values: &Values) -> Result<u64> {
        let stmt = self.compile_update(values)?;
        debug!(model = self.model.name(), sql = %stmt.sql, "update");
        db.execute(&stmt).await
    }

    /// Deletes the matching rows and returns the number affected.
    ///
    /// # Errors
    ///
    /// Returns build errors before any I/O, then the backend's errors.
    pub async fn delete<B: Backend>(&self, db: &B) -> Result<u64> {
        let stmt = self.compile_delete()?;
        debug!(model = self.model.name(), sql = %stmt.sql, "delete");
        db.execute(&stmt).await
    }
}
