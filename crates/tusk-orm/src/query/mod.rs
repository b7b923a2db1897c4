//! Query building types for the ORM.
//!
//! This module provides Q objects for filtering and aggregate functions.

mod aggregates;
mod filter;

pub use aggregates::{
    avg, count, count_all, count_distinct, max, min, sum, Aggregate, AggregateFunc,
};
pub use filter::{CompareOp, FilterExpr, Q};

pub(crate) use filter::Connective;
