//! End-to-end tests of the query executor against in-memory SQLite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tusk_orm::query::{avg, count_all, sum};
use tusk_orm::{
    Backend, CompiledStatement, Database, DatabaseConfig, DefaultValue, Field, FieldType,
    FromRecord, Model, OrmError, Q, Record, Registry, Result, SqlValue, ValueKind, Values,
};

fn user_model(registry: &Registry) -> Model {
    registry
        .register(
            "User",
            vec![
                Field::new("id", FieldType::Integer).primary_key().auto(),
                Field::new("name", FieldType::Text),
                Field::new("email", FieldType::Varchar(120)).unique(),
                Field::new("age", FieldType::Integer).default(DefaultValue::Integer(30)),
                Field::new("role", FieldType::Text).default(DefaultValue::String("member".into())),
                Field::new("bio", FieldType::Text).nullable(),
            ],
        )
        .unwrap()
}

async fn setup() -> (Database, Model) {
    let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
    db.execute(&CompiledStatement::new(
        "CREATE TABLE users (\
            id INTEGER PRIMARY KEY, \
            name TEXT NOT NULL, \
            email VARCHAR(120) NOT NULL UNIQUE, \
            age INTEGER NOT NULL DEFAULT 30, \
            role TEXT NOT NULL DEFAULT 'member', \
            bio TEXT)",
    ))
    .await
    .unwrap();
    let user = user_model(&Registry::new());
    (db, user)
}

async fn seed(db: &Database, user: &Model) {
    for (name, age, role) in [
        ("alice", 31, "admin"),
        ("bob", 17, "member"),
        ("carol", 45, "admin"),
        ("dave", 22, "member"),
    ] {
        user.objects()
            .create(
                db,
                &Values::new()
                    .set("name", name)
                    .set("email", format!("{name}@example.com"))
                    .set("age", age)
                    .set("role", role),
            )
            .await
            .unwrap();
    }
}

#[derive(Debug, PartialEq)]
struct User {
    id: i64,
    name: String,
    age: i64,
    bio: Option<String>,
}

impl FromRecord for User {
    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.try_get("id")?,
            name: record.try_get("name")?,
            age: record.try_get("age")?,
            bio: record.try_get("bio")?,
        })
    }
}

#[tokio::test]
async fn test_create_returns_server_assigned_key() {
    let (db, user) = setup().await;

    let first = user
        .objects()
        .create(
            &db,
            &Values::new().set("name", "Alice").set("email", "a@example.com"),
        )
        .await
        .unwrap();
    let second = user
        .objects()
        .create(
            &db,
            &Values::new().set("name", "Bob").set("email", "b@example.com"),
        )
        .await
        .unwrap();

    assert_eq!(first.pk(), Some(&SqlValue::Int(1)));
    assert_eq!(second.pk(), Some(&SqlValue::Int(2)));
    assert_eq!(first.get("age"), Some(&SqlValue::Int(30)));
    assert_eq!(first.get("role"), Some(&SqlValue::Text("member".into())));

    let fetched: User = user.objects().get(&db, 1).await.unwrap().into_entity().unwrap();
    assert_eq!(
        fetched,
        User {
            id: 1,
            name: "Alice".into(),
            age: 30,
            bio: None
        }
    );
}

#[tokio::test]
async fn test_filter_order_and_pagination() {
    let (db, user) = setup().await;
    seed(&db, &user).await;

    let adults = user
        .query()
        .filter(Q::gte("age", 18))
        .order_by("-age")
        .all(&db)
        .await
        .unwrap();
    let names: Vec<String> = adults.iter().map(|r| r.try_get("name").unwrap()).collect();
    assert_eq!(names, vec!["carol", "alice", "dave"]);

    let page = user
        .query()
        .order_by("id")
        .limit(2)
        .offset(1)
        .all(&db)
        .await
        .unwrap();
    let ids: Vec<i64> = page.iter().map(|r| r.try_get("id").unwrap()).collect();
    assert_eq!(ids, vec![2, 3]);

    let tail = user.query().order_by("id").offset(3).all(&db).await.unwrap();
    assert_eq!(tail.len(), 1);

    let admins_or_minors = user
        .query()
        .filter(Q::eq("role", "admin").or(Q::lt("age", 18)))
        .exclude(Q::eq("name", "carol"))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(admins_or_minors, 2);
}

#[tokio::test]
async fn test_first_get_and_exists() {
    let (db, user) = setup().await;
    seed(&db, &user).await;

    let youngest = user.query().order_by("age").first(&db).await.unwrap().unwrap();
    assert_eq!(youngest.get("name"), Some(&SqlValue::Text("bob".into())));

    assert!(matches!(
        user.query().filter(Q::eq("role", "admin")).get(&db).await,
        Err(OrmError::MultipleObjectsReturned)
    ));
    assert!(matches!(
        user.objects().get(&db, 99).await,
        Err(OrmError::NotFound)
    ));
    assert!(user.objects().get_or_none(&db, 99).await.unwrap().is_none());

    assert!(user.query().filter(Q::eq("name", "dave")).exists(&db).await.unwrap());
    assert!(!user.query().filter(Q::eq("name", "erin")).exists(&db).await.unwrap());
    assert!(user.query().filter(Q::is_null("bio")).exists(&db).await.unwrap());
    assert!(user
        .query()
        .filter(Q::eq("bio", None::<String>))
        .exists(&db)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_aggregate_group_by() {
    let (db, user) = setup().await;
    seed(&db, &user).await;

    let rows = user
        .query()
        .group_by(&["role"])
        .order_by("role")
        .aggregate(&db, &[count_all(), sum("age"), avg("age").alias("mean_age")])
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("role"), Some(&SqlValue::Text("admin".into())));
    assert_eq!(rows[0].get("count"), Some(&SqlValue::Int(2)));
    assert_eq!(rows[0].get("sum_age"), Some(&SqlValue::Int(76)));
    let mean_age: f64 = rows[0].try_get("mean_age").unwrap();
    assert!((mean_age - 38.0).abs() < f64::EPSILON);
    assert_eq!(rows[1].get("count"), Some(&SqlValue::Int(2)));

    let empty = user
        .query()
        .filter(Q::gt("age", 100))
        .aggregate(&db, &[sum("age")])
        .await
        .unwrap();
    assert_eq!(empty[0].get("sum_age"), Some(&SqlValue::Null));
}

#[tokio::test]
async fn test_update_and_delete() {
    let (db, user) = setup().await;
    seed(&db, &user).await;

    let updated = user
        .query()
        .filter(Q::eq("role", "member"))
        .update(&db, &Values::new().set("bio", "regular"))
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let deleted = user
        .query()
        .filter(Q::lt("age", 30))
        .order_by("age")
        .limit(1)
        .delete(&db)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(user.objects().count(&db).await.unwrap(), 3);
    assert!(user.query().filter(Q::eq("name", "bob")).first(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_record_update_and_delete() {
    let (db, user) = setup().await;
    seed(&db, &user).await;

    let mut bob = user.query().filter(Q::eq("name", "bob")).get(&db).await.unwrap();
    bob.update(&db, &Values::new().set("age", 18).set("bio", "birthday"))
        .await
        .unwrap();
    assert_eq!(bob.get("age"), Some(&SqlValue::Int(18)));

    let stored = user.objects().get(&db, bob.pk().cloned().unwrap()).await.unwrap();
    assert_eq!(stored, bob);
    assert_eq!(user.query().filter(Q::eq("age", 18)).count(&db).await.unwrap(), 1);

    let stale = bob.clone();
    bob.delete(&db).await.unwrap();
    assert_eq!(user.objects().count(&db).await.unwrap(), 3);
    assert!(matches!(stale.delete(&db).await, Err(OrmError::NotFound)));

    let mut partial = user
        .query()
        .only(&["name"])
        .filter(Q::eq("name", "carol"))
        .get(&db)
        .await
        .unwrap();
    assert!(matches!(
        partial.update(&db, &Values::new().set("age", 46)).await,
        Err(OrmError::QueryError(_))
    ));
}

#[tokio::test]
async fn test_first_and_get_respect_smaller_limit() {
    let (db, user) = setup().await;
    seed(&db, &user).await;

    assert!(user.query().limit(0).first(&db).await.unwrap().is_none());
    assert!(matches!(
        user.query().limit(0).get(&db).await,
        Err(OrmError::NotFound)
    ));
    let only = user.query().order_by("age").limit(1).get(&db).await.unwrap();
    assert_eq!(only.get("name"), Some(&SqlValue::Text("bob".into())));
}

#[tokio::test]
async fn test_create_generates_uuid_primary_key() {
    let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
    db.execute(&CompiledStatement::new(
        "CREATE TABLE documents (id CHAR(36) NOT NULL PRIMARY KEY, title TEXT NOT NULL)",
    ))
    .await
    .unwrap();
    let doc = Registry::new()
        .register(
            "Document",
            vec![
                Field::new("id", FieldType::Uuid).primary_key().auto(),
                Field::new("title", FieldType::Text),
            ],
        )
        .unwrap();

    let first = doc
        .objects()
        .create(&db, &Values::new().set("title", "Draft"))
        .await
        .unwrap();
    let second = doc
        .objects()
        .create(&db, &Values::new().set("title", "Final"))
        .await
        .unwrap();

    let id: uuid::Uuid = first.try_get("id").unwrap();
    assert_eq!(id.get_version_num(), 4);
    assert_ne!(first.pk(), second.pk());

    let fetched = doc.objects().get(&db, id).await.unwrap();
    assert_eq!(fetched.get("title"), Some(&SqlValue::Text("Draft".into())));
}

#[tokio::test]
async fn test_unique_violation_is_constraint_violation() {
    let (db, user) = setup().await;
    let values = Values::new().set("name", "x").set("email", "dup@example.com");
    user.objects().create(&db, &values).await.unwrap();
    let err = user.objects().create(&db, &values).await.unwrap_err();
    assert!(matches!(err, OrmError::ConstraintViolation(_)));
}

#[tokio::test]
async fn test_statement_injection_is_inert() {
    let (db, user) = setup().await;
    seed(&db, &user).await;
    let hostile = "x'; DROP TABLE users; --";
    let found = user.query().filter(Q::eq("name", hostile)).all(&db).await.unwrap();
    assert!(found.is_empty());
    assert_eq!(user.objects().count(&db).await.unwrap(), 4);
}

/// Counts round trips without touching a database.
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

impl Backend for CountingBackend {
    async fn fetch(
        &self,
        _statement: &CompiledStatement,
        _shape: &[ValueKind],
    ) -> Result<Vec<Vec<SqlValue>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(Vec::new())
    }

    async fn execute(&self, _statement: &CompiledStatement) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(0)
    }
}

#[tokio::test]
async fn test_build_errors_precede_io() {
    let user = user_model(&Registry::new());
    let backend = CountingBackend::default();

    let err = user
        .query()
        .filter(Q::eq("nickname", "x"))
        .all(&backend)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::UnknownField { .. }));

    let err = user
        .objects()
        .create(&backend, &Values::new().set("age", 3))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MissingField { .. }));

    let err = user
        .query()
        .update(&backend, &Values::new().set("age", "old"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::TypeMismatch { .. }));

    assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_cancelled_query_releases_connection() {
    let db = Database::connect(
        &DatabaseConfig::default().with_acquire_timeout(Duration::from_secs(1)),
    )
    .await
    .unwrap();
    let user = user_model(&Registry::new());
    db.execute(&CompiledStatement::new(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
         email VARCHAR(120) NOT NULL, age INTEGER NOT NULL DEFAULT 30, \
         role TEXT NOT NULL DEFAULT 'member', bio TEXT)",
    ))
    .await
    .unwrap();

    let qs = user.query();
    let _ = tokio::time::timeout(Duration::from_nanos(1), qs.all(&db)).await;

    // The single pooled connection must be available again.
    assert_eq!(user.objects().count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_statement_timeout() {
    let db = Database::connect(&DatabaseConfig::default())
        .await
        .unwrap()
        .with_statement_timeout(Some(Duration::from_millis(10)));
    let slow = CompiledStatement::new(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000000) \
         SELECT COUNT(*) FROM c",
    );
    let err = db.fetch(&slow, &[ValueKind::Integer]).await.unwrap_err();
    assert!(matches!(err, OrmError::Timeout(_)));
}

#[tokio::test]
async fn test_concurrent_creates_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("shared.db").display());
    let db = Database::connect(&DatabaseConfig::new(url).with_max_connections(4))
        .await
        .unwrap();
    let user = user_model(&Registry::new());
    db.execute(&CompiledStatement::new(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, \
         email VARCHAR(120) NOT NULL UNIQUE, age INTEGER NOT NULL DEFAULT 30, \
         role TEXT NOT NULL DEFAULT 'member', bio TEXT)",
    ))
    .await
    .unwrap();

    let objects_a = user.objects();
    let objects_b = user.objects();
    let values_a = Values::new().set("name", "a").set("email", "a@example.com");
    let values_b = Values::new().set("name", "b").set("email", "b@example.com");
    let (a, b) = tokio::join!(
        objects_a.create(&db, &values_a),
        objects_b.create(&db, &values_b),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(user.objects().count(&db).await.unwrap(), 2);
}
