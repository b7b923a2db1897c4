//! # tusk-orm
//!
//! An async ORM over SQLite with runtime-registered models.
//!
//! This crate provides:
//! - a model registry with validated field declarations
//! - `QuerySet`, an immutable chainable query builder that compiles to
//!   parameterised SQL without touching the database
//! - `Manager` and the `Backend` executor contract for running queries
//! - `Database`, a bounded sqlx connection pool implementing `Backend`
//!
//! ## Quick Start
//!
//! ```ignore
//! use tusk_orm::{register, Database, DatabaseConfig, Field, FieldType, Q, Values};
//!
//! async fn example() -> tusk_orm::Result<()> {
//!     let user = register(
//!         "User",
//!         vec![
//!             Field::new("id", FieldType::Integer).primary_key().auto(),
//!             Field::new("name", FieldType::Text),
//!             Field::new("age", FieldType::Integer),
//!         ],
//!     )?;
//!
//!     let db = Database::connect(&DatabaseConfig::new("sqlite://app.db")).await?;
//!
//!     user.objects()
//!         .create(&db, &Values::new().set("name", "Alice").set("age", 31))
//!         .await?;
//!
//!     let adults = user
//!         .query()
//!         .filter(Q::gte("age", 18))
//!         .order_by("-age")
//!         .limit(10)
//!         .all(&db)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Compiling without executing
//!
//! ```ignore
//! let stmt = user.query().filter(Q::eq("name", "Alice")).compile_select()?;
//! assert_eq!(stmt.sql, r#"SELECT "id", "name", "age" FROM "users" WHERE "name" = ?"#);
//! ```

pub mod backend;
pub mod database;
pub mod error;
pub mod fields;
pub mod manager;
pub mod model;
pub mod query;
pub mod queryset;
pub mod record;
pub mod statement;
pub mod value;

pub use backend::Backend;
pub use database::{Database, DatabaseConfig};
pub use error::{OrmError, Result};
pub use fields::{DefaultValue, Field, FieldType};
pub use manager::Manager;
pub use model::{fields_of, infer_table_name, lookup, register, Model, ModelDef, Registry};
pub use query::{Aggregate, CompareOp, FilterExpr, Q};
pub use queryset::{OrderBy, OrderDirection, QuerySet};
pub use record::{AggregateRow, FromRecord, FromSqlValue, Record};
pub use statement::{quote_identifier, CompiledStatement};
pub use value::{SqlValue, ToSqlValue, Values, ValueKind};
