//! Q objects for building filter expressions.
//!
//! ```ignore
//! use tusk_orm::Q;
//!
//! // Simple equality
//! let q = Q::eq("status", "active");
//!
//! // AND binds tighter than OR; mixed operators are parenthesised
//! let q = Q::eq("status", "active").and(Q::gt("age", 18).or(Q::eq("verified", true)));
//! // "status" = ? AND ("age" > ? OR "verified" = ?)
//! ```

use std::fmt;

use crate::error::{OrmError, Result};
use crate::fields::{Field, FieldType};
use crate::model::ModelDef;
use crate::statement::StatementBuilder;
use crate::value::{SqlValue, ToSqlValue};

/// Comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=).
    Eq,
    /// Not equal (<>).
    Ne,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    Gte,
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    Lte,
}

impl CompareOp {
    /// Returns the SQL operator string.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Field comparison with a bound literal.
    Comparison {
        /// Field name.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Literal.
        value: SqlValue,
    },
    /// IS NULL.
    IsNull {
        /// Field name.
        field: String,
    },
    /// IS NOT NULL.
    IsNotNull {
        /// Field name.
        field: String,
    },
    /// IN (...).
    InList {
        /// Field name.
        field: String,
        /// Literals.
        values: Vec<SqlValue>,
    },
    /// NOT IN (...).
    NotInList {
        /// Field name.
        field: String,
        /// Literals.
        values: Vec<SqlValue>,
    },
    /// LIKE pattern.
    Like {
        /// Field name.
        field: String,
        /// Pattern, bound as a parameter.
        pattern: String,
    },
    /// BETWEEN low AND high.
    Between {
        /// Field name.
        field: String,
        /// Lower bound.
        low: SqlValue,
        /// Upper bound.
        high: SqlValue,
    },
    /// Conjunction.
    And(Box<FilterExpr>, Box<FilterExpr>),
    /// Disjunction.
    Or(Box<FilterExpr>, Box<FilterExpr>),
    /// Negation.
    Not(Box<FilterExpr>),
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Connective {
    And,
    Or,
    None,
}

impl FilterExpr {
    const fn connective(&self) -> Connective {
        match self {
            Self::And(..) => Connective::And,
            Self::Or(..) => Connective::Or,
            _ => Connective::None,
        }
    }

    /// Renders this expression as a child of `parent`.
    ///
    /// A binary child is wrapped in parentheses unless it uses the same
    /// connective as its parent.
    pub(crate) fn render_within(
        &self,
        parent: Connective,
        model: &ModelDef,
        out: &mut StatementBuilder,
    ) -> Result<()> {
        let own = self.connective();
        let wrap = own != Connective::None && own != parent;
        if wrap {
            out.push("(");
        }
        self.render(model, out)?;
        if wrap {
            out.push(")");
        }
        Ok(())
    }

    /// Validates this expression against `model` and renders it.
    pub(crate) fn render(&self, model: &ModelDef, out: &mut StatementBuilder) -> Result<()> {
        match self {
            Self::Comparison { field, op, value } => {
                let f = model.require_field(field)?;
                if value.is_null() {
                    let keyword = match op {
                        CompareOp::Eq if f.nullable => " IS NULL",
                        CompareOp::Ne if f.nullable => " IS NOT NULL",
                        _ => return Err(mismatch(f, value)),
                    };
                    out.push_identifier(field).push(keyword);
                } else {
                    check_literal(f, value)?;
                    out.push_identifier(field)
                        .push(" ")
                        .push(op.as_sql())
                        .push(" ")
                        .push_param(value.clone());
                }
            }
            Self::IsNull { field } => {
                model.require_field(field)?;
                out.push_identifier(field).push(" IS NULL");
            }
            Self::IsNotNull { field } => {
                model.require_field(field)?;
                out.push_identifier(field).push(" IS NOT NULL");
            }
            Self::InList { field, values } | Self::NotInList { field, values } => {
                let f = model.require_field(field)?;
                for value in values {
                    check_literal(f, value)?;
                }
                let negated = matches!(self, Self::NotInList { .. });
                if values.is_empty() {
                    // IN () is not valid SQL.
                    out.push(if negated { "1 = 1" } else { "1 = 0" });
                } else {
                    out.push_identifier(field)
                        .push(if negated { " NOT IN (" } else { " IN (" })
                        .push_params(values.iter().cloned())
                        .push(")");
                }
            }
            Self::Like { field, pattern } => {
                let f = model.require_field(field)?;
                if !matches!(
                    f.field_type,
                    FieldType::Text | FieldType::Varchar(_) | FieldType::Uuid
                ) {
                    return Err(OrmError::TypeMismatch {
                        field: field.clone(),
                        expected: f.field_type.to_string(),
                        found: "text",
                    });
                }
                out.push_identifier(field)
                    .push(" LIKE ")
                    .push_param(SqlValue::Text(pattern.clone()));
            }
            Self::Between { field, low, high } => {
                let f = model.require_field(field)?;
                check_literal(f, low)?;
                check_literal(f, high)?;
                out.push_identifier(field)
                    .push(" BETWEEN ")
                    .push_param(low.clone())
                    .push(" AND ")
                    .push_param(high.clone());
            }
            Self::And(left, right) => {
                left.render_within(Connective::And, model, out)?;
                out.push(" AND ");
                right.render_within(Connective::And, model, out)?;
            }
            Self::Or(left, right) => {
                left.render_within(Connective::Or, model, out)?;
                out.push(" OR ");
                right.render_within(Connective::Or, model, out)?;
            }
            Self::Not(inner) => {
                out.push("NOT (");
                inner.render(model, out)?;
                out.push(")");
            }
        }
        Ok(())
    }
}

fn mismatch(field: &Field, value: &SqlValue) -> OrmError {
    OrmError::TypeMismatch {
        field: field.name.clone(),
        expected: field.field_type.to_string(),
        found: value.kind(),
    }
}

// Null is only meaningful through IS NULL, so range and list literals must be
// non-null and compatible with the declared type.
fn check_literal(field: &Field, value: &SqlValue) -> Result<()> {
    if !value.is_null() && field.field_type.accepts(value) {
        Ok(())
    } else {
        Err(mismatch(field, value))
    }
}

/// A Q object for building complex filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Q {
    expr: FilterExpr,
}

impl Q {
    fn compare<V: ToSqlValue>(field: &str, op: CompareOp, value: V) -> Self {
        Self {
            expr: FilterExpr::Comparison {
                field: field.to_string(),
                op,
                value: value.to_sql_value(),
            },
        }
    }

    /// Creates an equality filter. A `None`/`Null` literal compiles to
    /// `IS NULL` on nullable fields.
    #[must_use]
    pub fn eq<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// Creates a not-equal filter.
    #[must_use]
    pub fn ne<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// Creates a greater-than filter.
    #[must_use]
    pub fn gt<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// Creates a greater-than-or-equal filter.
    #[must_use]
    pub fn gte<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    /// Creates a less-than filter.
    #[must_use]
    pub fn lt<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// Creates a less-than-or-equal filter.
    #[must_use]
    pub fn lte<V: ToSqlValue>(field: &str, value: V) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    /// Creates an IS NULL filter.
    #[must_use]
    pub fn is_null(field: &str) -> Self {
        Self {
            expr: FilterExpr::IsNull {
                field: field.to_string(),
            },
        }
    }

    /// Creates an IS NOT NULL filter.
    #[must_use]
    pub fn is_not_null(field: &str) -> Self {
        Self {
            expr: FilterExpr::IsNotNull {
                field: field.to_string(),
            },
        }
    }

    /// Creates an IN filter.
    #[must_use]
    pub fn in_list<V: ToSqlValue>(field: &str, values: Vec<V>) -> Self {
        Self {
            expr: FilterExpr::InList {
                field: field.to_string(),
                values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            },
        }
    }

    /// Creates a NOT IN filter.
    #[must_use]
    pub fn not_in_list<V: ToSqlValue>(field: &str, values: Vec<V>) -> Self {
        Self {
            expr: FilterExpr::NotInList {
                field: field.to_string(),
                values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            },
        }
    }

    /// Creates a LIKE filter. Use `%` and `_` as wildcards.
    #[must_use]
    pub fn like(field: &str, pattern: &str) -> Self {
        Self {
            expr: FilterExpr::Like {
                field: field.to_string(),
                pattern: pattern.to_string(),
            },
        }
    }

    /// Creates a contains filter (LIKE %value%).
    #[must_use]
    pub fn contains(field: &str, value: &str) -> Self {
        Self::like(field, &format!("%{value}%"))
    }

    /// Creates a starts-with filter (LIKE value%).
    #[must_use]
    pub fn startswith(field: &str, value: &str) -> Self {
        Self::like(field, &format!("{value}%"))
    }

    /// Creates a BETWEEN filter (low <= field <= high).
    #[must_use]
    pub fn between<V: ToSqlValue>(field: &str, low: V, high: V) -> Self {
        Self {
            expr: FilterExpr::Between {
                field: field.to_string(),
                low: low.to_sql_value(),
                high: high.to_sql_value(),
            },
        }
    }

    /// Combines this filter with another using AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self {
            expr: FilterExpr::And(Box::new(self.expr), Box::new(other.expr)),
        }
    }

    /// Combines this filter with another using OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            expr: FilterExpr::Or(Box::new(self.expr), Box::new(other.expr)),
        }
    }

    /// Negates this filter with NOT.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self {
            expr: FilterExpr::Not(Box::new(self.expr)),
        }
    }

    /// Returns the expression tree.
    #[must_use]
    pub const fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    /// Returns the internal filter expression.
    #[must_use]
    pub fn into_expr(self) -> FilterExpr {
        self.expr
    }
}

impl From<Q> for FilterExpr {
    fn from(q: Q) -> Self {
        q.expr
    }
}
