//! Ordered, rendered migration plans.

use std::fmt;

use crate::autodetector::Diff;
use crate::dialect::MigrationDialect;
use crate::error::Result;
use crate::operations::{DiffOperation, Risk};
use crate::schema::CatalogSnapshot;

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// History id recorded when the step is applied.
    pub id: i64,
    /// The schema change.
    pub operation: DiffOperation,
    /// Human-readable description.
    pub description: String,
    /// Risk level of the change.
    pub risk: Risk,
    /// Statements executed for this step, in order.
    pub statements: Vec<String>,
}

/// The ordered steps that bring a catalog in line with the models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Steps in execution order.
    pub steps: Vec<PlannedStep>,
    /// Drift the differ reported but does not migrate.
    pub warnings: Vec<String>,
    /// Checksum of the catalog the plan was built from.
    pub base_checksum: String,
}

impl Plan {
    /// Orders a diff by phase and renders every step.
    ///
    /// Steps are numbered from the snapshot's history head. Each step is
    /// rendered against the catalog as left by the steps before it.
    ///
    /// # Errors
    ///
    /// Fails when an operation does not apply to the simulated catalog or
    /// the dialect cannot render it.
    pub fn build(
        diff: Diff,
        snapshot: &CatalogSnapshot,
        dialect: &dyn MigrationDialect,
    ) -> Result<Self> {
        let mut operations = diff.operations;
        operations.sort_by_key(DiffOperation::phase);

        let mut working = snapshot.clone();
        let mut next_id = snapshot.history_head.unwrap_or(0) + 1;
        let mut steps = Vec::with_capacity(operations.len());
        for operation in operations {
            let mut next = working.clone();
            next.apply(&operation)?;
            let statements = dialect.generate_sql(&operation, &working, &next)?;
            working = next;

            steps.push(PlannedStep {
                id: next_id,
                description: operation.description(),
                risk: operation.risk(),
                statements,
                operation,
            });
            next_id += 1;
        }

        Ok(Self {
            steps,
            warnings: diff.warnings,
            base_checksum: snapshot.checksum(),
        })
    }

    /// Returns true if there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns the highest risk of any step.
    #[must_use]
    pub fn max_risk(&self) -> Option<Risk> {
        self.steps.iter().map(|s| s.risk).max()
    }

    /// Renders the plan as an SQL script.
    #[must_use]
    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "-- {}: {} [{}]", step.id, step.description, step.risk)?;
            for statement in &step.statements {
                writeln!(f, "{statement};")?;
            }
        }
        Ok(())
    }
}
