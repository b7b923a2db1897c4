//! The executor contract.
//!
//! Query builders and the migration differ are pure; everything that waits
//! on the database goes through one of the two round-trip methods below.

use std::future::Future;

use crate::error::Result;
use crate::statement::CompiledStatement;
use crate::value::{SqlValue, ValueKind};

/// One database round trip.
///
/// Implementors must return the connection they used to its pool on every
/// exit path, including when the returned future is dropped.
pub trait Backend: Sync {
    /// Runs a row-returning statement and decodes each column by `shape`.
    fn fetch(
        &self,
        statement: &CompiledStatement,
        shape: &[ValueKind],
    ) -> impl Future<Output = Result<Vec<Vec<SqlValue>>>> + Send;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&self, statement: &CompiledStatement) -> impl Future<Output = Result<u64>> + Send;
}

impl<B: Backend> Backend for &B {
    async fn fetch(
        &self,
        statement: &CompiledStatement,
        shape: &[ValueKind],
    ) -> Result<Vec<Vec<SqlValue>>> {
        (**self).fetch(statement, shape).await
    }

    async fn execute(&self, statement: &CompiledStatement) -> Result<u64> {
        (**self).execute(statement).await
    }
}
