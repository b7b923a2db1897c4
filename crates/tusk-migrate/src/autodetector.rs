//! Differ between registered models and the live catalog.
//!
//! The differ walks the registered models in order and emits the operations
//! that bring the inspected catalog in line with them. Drift it does not
//! migrate (nullability, defaults) is reported as warnings.

use std::collections::HashSet;

use tracing::{debug, warn};
use tusk_orm::{Field, Model};

use crate::operations::DiffOperation;
use crate::schema::{unique_index_name, CatalogSnapshot, ColumnSchema, IndexOrigin, TableSchema};

/// Options for the differ.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Drop live tables that no registered model maps to.
    pub drop_unknown_tables: bool,
}

impl DiffOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables dropping of unknown tables.
    #[must_use]
    pub const fn with_drop_unknown_tables(mut self) -> Self {
        self.drop_unknown_tables = true;
        self
    }
}

/// Operations and warnings produced by a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Operations in detection order.
    pub operations: Vec<DiffOperation>,
    /// Drift that is reported but not migrated.
    pub warnings: Vec<String>,
}

impl Diff {
    /// Returns true if no operation is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Computes schema diffs.
#[derive(Debug, Default)]
pub struct Differ {
    options: DiffOptions,
}

impl Differ {
    /// Creates a differ with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a differ with custom options.
    #[must_use]
    pub const fn with_options(options: DiffOptions) -> Self {
        Self { options }
    }

    /// Compares `models` against `catalog`.
    #[must_use]
    pub fn diff(&self, models: &[Model], catalog: &CatalogSnapshot) -> Diff {
        let mut diff = Diff::default();

        for model in models {
            match catalog.get_table(model.table()) {
                None => diff_missing_table(model, &mut diff),
                Some(live) => diff_table(model, live, &mut diff),
            }
        }

        let known: HashSet<&str> = models.iter().map(|m| m.table()).collect();
        for name in catalog.table_names().filter(|n| !known.contains(n)) {
            if self.options.drop_unknown_tables {
                diff.operations.push(DiffOperation::DropTable {
                    name: name.to_string(),
                });
            } else {
                debug!(table = name, "ignoring table without a registered model");
            }
        }

        diff
    }
}

fn diff_table(model: &Model, live: &TableSchema, diff: &mut Diff) {
    let table = model.table();
    // Live columns accounted for by a model field.
    let mut matched: HashSet<&str> = HashSet::new();

    for field in model.fields() {
        let desired = ColumnSchema::from_field(field);

        let live_name = if live.get_column(&field.name).is_some() {
            Some(field.name.as_str())
        } else {
            field
                .renamed_from
                .as_deref()
                .filter(|old| live.get_column(old).is_some() && model.field(old).is_none())
        };

        let Some(live_name) = live_name else {
            if field.primary_key {
                diff.warn(format!(
                    "Cannot add primary key column '{}' to existing table '{table}'",
                    field.name
                ));
            } else {
                diff.operations.push(DiffOperation::AddColumn {
                    table: table.to_string(),
                    column: desired,
                });
                if wants_unique_index(field) {
                    diff.operations.push(DiffOperation::AddConstraint {
                        table: table.to_string(),
                        name: unique_index_name(table, &field.name),
                        column: field.name.clone(),
                    });
                }
            }
            continue;
        };
        matched.insert(live_name);

        if live_name != field.name {
            diff.operations.push(DiffOperation::RenameColumn {
                table: table.to_string(),
                from: live_name.to_string(),
                to: field.name.clone(),
            });
        }

        if let Some(current) = live.get_column(live_name) {
            diff_column(table, current, &desired, diff);
        }

        if wants_unique_index(field) && !live.has_unique_index_on(live_name) {
            diff.operations.push(DiffOperation::AddConstraint {
                table: table.to_string(),
                name: unique_index_name(table, &field.name),
                column: field.name.clone(),
            });
        }
    }

    for index in &live.indexes {
        let Some(column) = index.columns.first().filter(|_| index.columns.len() == 1) else {
            continue;
        };
        if !matched.contains(column.as_str()) {
            // Dropped together with its column below.
            continue;
        }
        let unique = model_field_for(model, column).is_some_and(|f| f.unique || f.primary_key);
        if unique || !index.unique {
            continue;
        }
        if index.is_managed() {
            diff.operations.push(DiffOperation::DropConstraint {
                table: table.to_string(),
                name: index.name.clone(),
            });
        } else if index.origin == IndexOrigin::Unique {
            diff.warn(format!(
                "Column '{column}' in table '{table}' has an inline UNIQUE constraint the model does not declare"
            ));
        }
    }

    for column in live.columns.iter().filter(|c| !matched.contains(c.name.as_str())) {
        for index in live.indexes.iter().filter(|i| i.is_managed() && i.covers(&column.name)) {
            diff.operations.push(DiffOperation::DropConstraint {
                table: table.to_string(),
                name: index.name.clone(),
            });
        }
        diff.operations.push(DiffOperation::DropColumn {
            table: table.to_string(),
            column: column.name.clone(),
        });
    }
}

fn diff_missing_table(model: &Model, diff: &mut Diff) {
    diff.operations.push(DiffOperation::CreateTable {
        table: TableSchema::from_model(model),
    });
    for field in model.fields().iter().filter(|f| wants_unique_index(f)) {
        diff.operations.push(DiffOperation::AddConstraint {
            table: model.table().to_string(),
            name: unique_index_name(model.table(), &field.name),
            column: field.name.clone(),
        });
    }
}

fn diff_column(table: &str, live: &ColumnSchema, desired: &ColumnSchema, diff: &mut Diff) {
    if !live.same_type(&desired.declared_type) {
        diff.operations.push(DiffOperation::AlterColumnType {
            table: table.to_string(),
            column: desired.name.clone(),
            from_type: live.declared_type.clone(),
            to_type: desired.declared_type.clone(),
        });
    }
    if live.not_null != desired.not_null && !live.primary_key {
        diff.warn(format!(
            "Column '{}' in table '{}' is {} but the model declares it {}",
            desired.name,
            table,
            nullability(live.not_null),
            nullability(desired.not_null)
        ));
    }
    let live_default = live.default_sql.as_deref().map(str::trim);
    let desired_default = desired.default_sql.as_deref().map(str::trim);
    if live_default != desired_default {
        diff.warn(format!(
            "Column '{}' in table '{}' has default {} but the model declares {}",
            desired.name,
            table,
            live_default.unwrap_or("none"),
            desired_default.unwrap_or("none")
        ));
    }
}

const fn wants_unique_index(field: &Field) -> bool {
    field.unique && !field.primary_key
}

// The model field a live column belongs to, following renames.
fn model_field_for<'a>(model: &'a Model, column: &str) -> Option<&'a Field> {
    model.field(column).or_else(|| {
        model
            .fields()
            .iter()
            .find(|f| f.renamed_from.as_deref() == Some(column) && model.field(column).is_none())
    })
}

const fn nullability(not_null: bool) -> &'static str {
    if not_null {
        "NOT NULL"
    } else {
        "nullable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSchema;
    use tusk_orm::{DefaultValue, FieldType, ModelDef};

    fn model(fields: Vec<Field>) -> Model {
        Model::new(ModelDef::new("User", "users", fields).unwrap())
    }

    fn id() -> Field {
        Field::new("id", FieldType::Integer).primary_key().auto()
    }

    fn live(model: &Model) -> CatalogSnapshot {
        CatalogSnapshot {
            tables: vec![TableSchema::from_model(model)],
            history_head: None,
        }
    }

    #[test]
    fn test_create_table_with_unique() {
        let user = model(vec![
            id(),
            Field::new("email", FieldType::Text).unique(),
        ]);
        let diff = Differ::new().diff(&[user], &CatalogSnapshot::default());
        assert_eq!(diff.operations.len(), 2);
        assert!(matches!(diff.operations[0], DiffOperation::CreateTable { .. }));
        assert_eq!(
            diff.operations[1],
            DiffOperation::AddConstraint {
                table: "users".into(),
                name: "uq_users_email".into(),
                column: "email".into(),
            }
        );
    }

    #[test]
    fn test_no_changes() {
        let user = model(vec![id(), Field::new("name", FieldType::Text)]);
        let diff = Differ::new().diff(&[user.clone()], &live(&user));
        assert!(diff.is_empty());
        assert!(diff.warnings.is_empty());
    }

    #[test]
    fn test_add_and_drop_columns() {
        let old = model(vec![id(), Field::new("legacy", FieldType::Text)]);
        let new = model(vec![id(), Field::new("bio", FieldType::Text).nullable()]);
        let diff = Differ::new().diff(&[new], &live(&old));
        assert_eq!(
            diff.operations,
            vec![
                DiffOperation::AddColumn {
                    table: "users".into(),
                    column: ColumnSchema::new("bio", "TEXT"),
                },
                DiffOperation::DropColumn {
                    table: "users".into(),
                    column: "legacy".into(),
                },
            ]
        );
    }

    #[test]
    fn test_renamed_from() {
        let old = model(vec![id(), Field::new("name", FieldType::Text)]);
        let new = model(vec![
            id(),
            Field::new("full_name", FieldType::Text).renamed_from("name"),
        ]);
        let diff = Differ::new().diff(&[new.clone()], &live(&old));
        assert_eq!(
            diff.operations,
            vec![DiffOperation::RenameColumn {
                table: "users".into(),
                from: "name".into(),
                to: "full_name".into(),
            }]
        );

        // Once applied the hint is inert.
        assert!(Differ::new().diff(&[new.clone()], &live(&new)).is_empty());
    }

    #[test]
    fn test_type_change() {
        let old = model(vec![id(), Field::new("age", FieldType::Text)]);
        let new = model(vec![id(), Field::new("age", FieldType::Integer)]);
        let diff = Differ::new().diff(&[new], &live(&old));
        assert_eq!(
            diff.operations,
            vec![DiffOperation::AlterColumnType {
                table: "users".into(),
                column: "age".into(),
                from_type: "TEXT".into(),
                to_type: "INTEGER".into(),
            }]
        );
    }

    #[test]
    fn test_type_comparison_ignores_case() {
        let user = model(vec![id(), Field::new("name", FieldType::Varchar(20))]);
        let mut catalog = live(&user);
        catalog.tables[0].columns[1].declared_type = "varchar(20)".into();
        assert!(Differ::new().diff(&[user], &catalog).is_empty());
    }

    #[test]
    fn test_drift_is_warned_not_migrated() {
        let old = model(vec![id(), Field::new("age", FieldType::Integer)]);
        let new = model(vec![
            id(),
            Field::new("age", FieldType::Integer)
                .nullable()
                .default(DefaultValue::Integer(30)),
        ]);
        let diff = Differ::new().diff(&[new], &live(&old));
        assert!(diff.is_empty());
        assert_eq!(diff.warnings.len(), 2);
    }

    #[test]
    fn test_unique_toggle() {
        let plain = model(vec![id(), Field::new("email", FieldType::Text)]);
        let unique = model(vec![id(), Field::new("email", FieldType::Text).unique()]);

        let diff = Differ::new().diff(&[unique], &live(&plain));
        assert_eq!(
            diff.operations,
            vec![DiffOperation::AddConstraint {
                table: "users".into(),
                name: "uq_users_email".into(),
                column: "email".into(),
            }]
        );

        let mut indexed = live(&plain);
        indexed.tables[0].indexes.push(IndexSchema {
            name: "uq_users_email".into(),
            columns: vec!["email".into()],
            unique: true,
            origin: IndexOrigin::Created,
        });
        let diff = Differ::new().diff(&[plain], &indexed);
        assert_eq!(
            diff.operations,
            vec![DiffOperation::DropConstraint {
                table: "users".into(),
                name: "uq_users_email".into(),
            }]
        );
    }

    #[test]
    fn test_drop_column_drops_its_constraint_first() {
        let old = model(vec![id(), Field::new("email", FieldType::Text).unique()]);
        let mut catalog = live(&old);
        catalog.tables[0].indexes.push(IndexSchema {
            name: "uq_users_email".into(),
            columns: vec!["email".into()],
            unique: true,
            origin: IndexOrigin::Created,
        });
        let new = model(vec![id()]);
        let diff = Differ::new().diff(&[new], &catalog);
        assert_eq!(
            diff.operations,
            vec![
                DiffOperation::DropConstraint {
                    table: "users".into(),
                    name: "uq_users_email".into(),
                },
                DiffOperation::DropColumn {
                    table: "users".into(),
                    column: "email".into(),
                },
            ]
        );
    }

    #[test]
    fn test_primary_key_column_is_not_added() {
        let old = model(vec![id()]);
        let mut catalog = live(&old);
        catalog.tables[0].columns[0].name = "pk".into();
        let diff = Differ::new().diff(&[old], &catalog);
        assert!(diff
            .operations
            .iter()
            .all(|op| !matches!(op, DiffOperation::AddColumn { .. })));
        assert_eq!(diff.warnings.len(), 1);
    }

    #[test]
    fn test_unknown_tables() {
        let user = model(vec![id()]);
        let mut catalog = live(&user);
        catalog.tables.push(TableSchema::new("audit_log"));

        assert!(Differ::new().diff(&[user.clone()], &catalog).is_empty());

        let diff = Differ::with_options(DiffOptions::new().with_drop_unknown_tables())
            .diff(&[user], &catalog);
        assert_eq!(
            diff.operations,
            vec![DiffOperation::DropTable {
                name: "audit_log".into()
            }]
        );
    }
}
