//! Aggregate functions for `QuerySet` operations.

use crate::error::{OrmError, Result};
use crate::model::ModelDef;
use crate::statement::StatementBuilder;
use crate::value::ValueKind;

/// Aggregate function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// COUNT(*), COUNT(field) or COUNT(DISTINCT field).
    Count {
        /// Whether to count only distinct values.
        distinct: bool,
    },
    /// SUM(field).
    Sum,
    /// AVG(field).
    Avg,
    /// MAX(field).
    Max,
    /// MIN(field).
    Min,
}

impl AggregateFunc {
    const fn sql_name(self) -> &'static str {
        match self {
            Self::Count { .. } => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Count { distinct: true } => "count_distinct",
            Self::Count { distinct: false } => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

/// An aggregate applied to a `QuerySet`, with an optional alias.
///
/// Without an alias the result column is named `<func>_<field>`, or
/// `count` for `COUNT(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    func: AggregateFunc,
    field: Option<String>,
    alias: Option<String>,
}

impl Aggregate {
    fn on(func: AggregateFunc, field: &str) -> Self {
        Self {
            func,
            field: Some(field.to_string()),
            alias: None,
        }
    }

    /// Creates a COUNT(*) aggregate.
    #[must_use]
    pub const fn count_all() -> Self {
        Self {
            func: AggregateFunc::Count { distinct: false },
            field: None,
            alias: None,
        }
    }

    /// Creates a COUNT(field) aggregate.
    #[must_use]
    pub fn count(field: &str) -> Self {
        Self::on(AggregateFunc::Count { distinct: false }, field)
    }

    /// Creates a COUNT(DISTINCT field) aggregate.
    #[must_use]
    pub fn count_distinct(field: &str) -> Self {
        Self::on(AggregateFunc::Count { distinct: true }, field)
    }

    /// Creates a SUM(field) aggregate.
    #[must_use]
    pub fn sum(field: &str) -> Self {
        Self::on(AggregateFunc::Sum, field)
    }

    /// Creates an AVG(field) aggregate.
    #[must_use]
    pub fn avg(field: &str) -> Self {
        Self::on(AggregateFunc::Avg, field)
    }

    /// Creates a MAX(field) aggregate.
    #[must_use]
    pub fn max(field: &str) -> Self {
        Self::on(AggregateFunc::Max, field)
    }

    /// Creates a MIN(field) aggregate.
    #[must_use]
    pub fn min(field: &str) -> Self {
        Self::on(AggregateFunc::Min, field)
    }

    /// Names the result column.
    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Returns the function.
    #[must_use]
    pub const fn func(&self) -> AggregateFunc {
        self.func
    }

    /// Returns the result column name.
    #[must_use]
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.field) {
            (Some(alias), _) => alias.clone(),
            (None, Some(field)) => format!("{}_{field}", self.func.label()),
            (None, None) => self.func.label().to_string(),
        }
    }

    /// Validates the aggregate against `model`, renders it and returns the
    /// kind its result decodes as.
    pub(crate) fn render(&self, model: &ModelDef, out: &mut StatementBuilder) -> Result<ValueKind> {
        crate::model::validate_identifier(&self.output_name())?;

        let Some(name) = &self.field else {
            out.push("COUNT(*) AS ").push_identifier(&self.output_name());
            return Ok(ValueKind::Integer);
        };

        let field = model.require_field(name)?;
        let kind = match self.func {
            AggregateFunc::Count { .. } => ValueKind::Integer,
            AggregateFunc::Sum | AggregateFunc::Avg if !field.field_type.is_numeric() => {
                return Err(OrmError::TypeMismatch {
                    field: name.clone(),
                    expected: "numeric".to_string(),
                    found: field.field_type.type_name(),
                });
            }
            AggregateFunc::Avg => ValueKind::Real,
            AggregateFunc::Sum | AggregateFunc::Max | AggregateFunc::Min => {
                field.field_type.value_kind()
            }
        };

        out.push(self.func.sql_name()).push("(");
        if matches!(self.func, AggregateFunc::Count { distinct: true }) {
            out.push("DISTINCT ");
        }
        out.push_identifier(name)
            .push(") AS ")
            .push_identifier(&self.output_name());
        Ok(kind)
    }
}

/// Convenience function to create a COUNT(*) aggregate.
#[must_use]
pub const fn count_all() -> Aggregate {
    Aggregate::count_all()
}

/// Convenience function to create a COUNT(field) aggregate.
#[must_use]
pub fn count(field: &str) -> Aggregate {
    Aggregate::count(field)
}

/// Convenience function to create a COUNT(DISTINCT field) aggregate.
#[must_use]
pub fn count_distinct(field: &str) -> Aggregate {
    Aggregate::count_distinct(field)
}

/// Convenience function to create a SUM(field) aggregate.
#[must_use]
pub fn sum(field: &str) -> Aggregate {
    Aggregate::sum(field)
}

/// Convenience function to create an AVG(field) aggregate.
#[must_use]
pub fn avg(field: &str) -> Aggregate {
    Aggregate::avg(field)
}

/// Convenience function to create a MAX(field) aggregate.
#[must_use]
pub fn max(field: &str) -> Aggregate {
    Aggregate::max(field)
}

/// Convenience function to create a MIN(field) aggregate.
#[must_use]
pub fn min(field: &str) -> Aggregate {
    Aggregate::min(field)
}
