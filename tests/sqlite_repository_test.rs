//! Integration tests for the repository against real SQLite databases.
//!
//! Tests verify that:
//! - Inserted entities read back field-equal, with the generated key
//! - Update, delete and select paths agree on one table name
//! - Every supported field type survives a round trip
//! - Transactions apply dependent writes in order and roll back on error

mod common;

use chrono::{NaiveDate, NaiveDateTime};
use common::TestDb;
use db_mapper::{DatabaseFlavor, DbError, Repository, TableNaming, Value, entity};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::ops::ControlFlow;

entity! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Person {
        pub id: Option<i64>,
        pub name: String,
        pub age: i64,
    }
}

entity! {
    table = "event_log";
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Event {
        pub id: Option<i64>,
        pub title: String,
        pub weight: f64,
        pub done: bool,
        pub payload: Vec<u8>,
        pub happened_at: NaiveDateTime,
        pub due: Option<NaiveDate>,
        pub note: Option<String>,
    }
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn setup() -> (TestDb, Repository) {
    let db = TestDb::new();
    let repo = Repository::open(&db.url).unwrap();
    repo.create_table::<Person>().unwrap();
    (db, repo)
}

fn person(name: &str, age: i64) -> Person {
    Person {
        id: None,
        name: name.to_string(),
        age,
    }
}

#[test]
fn test_detects_sqlite() {
    let (_db, repo) = setup();
    assert_eq!(repo.flavor(), DatabaseFlavor::Sqlite);
    assert_eq!(repo.detect_database_flavor().unwrap(), DatabaseFlavor::Sqlite);
}

#[test]
fn test_insert_then_select_by_generated_key() {
    let (_db, repo) = setup();
    for i in 0..6 {
        repo.insert(&person(&format!("filler{}", i), i)).unwrap();
    }

    let key = repo.insert(&person("Ada", 30)).unwrap();
    assert_eq!(key, Some(Value::Int(7)));

    let ada: Person = repo.select_by_id(7).unwrap().unwrap();
    assert_eq!(
        ada,
        Person {
            id: Some(7),
            name: "Ada".to_string(),
            age: 30
        }
    );
}

#[test]
fn test_insert_returns_generated_key_on_fresh_table() {
    let (_db, repo) = setup();

    let first = repo.insert(&person("Ada", 30)).unwrap();
    let second = repo.insert(&person("Grace", 85)).unwrap();
    assert_eq!(first, Some(Value::Int(1)));
    assert_eq!(second, Some(Value::Int(2)));

    let grace: Person = repo.select_by_id(2).unwrap().unwrap();
    assert_eq!(grace.name, "Grace");
    assert_eq!(
        repo.scalar("SELECT COUNT(*) FROM persons", vec![]).unwrap(),
        Some(Value::Int(2))
    );
}

#[test]
fn test_insert_key_inside_transaction() {
    let (_db, repo) = setup();
    repo.insert(&person("Ada", 30)).unwrap();

    let key = repo
        .in_transaction(|tx| tx.insert(&person("Grace", 85)))
        .unwrap();
    assert_eq!(key, Some(Value::Int(2)));
}

#[test]
fn test_insert_with_explicit_id() {
    let (_db, repo) = setup();
    let person = Person {
        id: Some(100),
        name: "Grace".into(),
        age: 85,
    };
    assert_eq!(repo.insert(&person).unwrap(), Some(Value::Int(100)));
    assert_eq!(repo.select_by_id::<Person>(100).unwrap(), Some(person));
}

#[test]
fn test_update_and_delete_by_id() {
    let (_db, repo) = setup();
    let key = repo.insert(&person("Ada", 30)).unwrap().unwrap();

    let mut ada: Person = repo.select_by_id(key.clone()).unwrap().unwrap();
    ada.age = 31;
    assert_eq!(repo.update_by_id(&ada).unwrap(), 1);
    assert_eq!(
        repo.select_by_id::<Person>(key.clone()).unwrap().map(|p| p.age),
        Some(31)
    );

    assert_eq!(repo.delete_by_id::<Person>(key.clone()).unwrap(), 1);
    assert_eq!(repo.select_by_id::<Person>(key).unwrap(), None);
    assert_eq!(repo.delete_by_id::<Person>(12345).unwrap(), 0);
}

#[test]
fn test_update_with_null_id_is_rejected() {
    let (_db, repo) = setup();
    let err = repo.update_by_id(&person("Ada", 30)).unwrap_err();
    assert!(err.is_mapping());
}

#[test]
fn test_select_all_returns_fully_populated_entities() {
    let (_db, repo) = setup();
    let names = ["Ada", "Grace", "Edsger"];
    for (i, name) in names.iter().enumerate() {
        repo.insert(&person(name, 30 + i as i64)).unwrap();
    }

    let people: Vec<Person> = repo.select_all().unwrap();
    assert_eq!(people.len(), names.len());
    for (p, name) in people.iter().zip(names) {
        assert!(p.id.is_some());
        assert_eq!(p.name, name);
        assert!(p.age >= 30);
    }
}

#[test]
fn test_raw_query_and_scalar() {
    let (_db, repo) = setup();
    repo.insert(&person("Ada", 30)).unwrap();
    repo.insert(&person("Grace", 85)).unwrap();

    let rows = repo
        .query(
            "SELECT name, age FROM persons WHERE age > ? ORDER BY age",
            vec![Value::Int(40)],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), &["name".to_string(), "age".to_string()]);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Grace".into())));

    let count = repo.scalar("SELECT COUNT(*) FROM persons", vec![]).unwrap();
    assert_eq!(count, Some(Value::Int(2)));

    let none = repo
        .scalar("SELECT name FROM persons WHERE age < ?", vec![Value::Int(0)])
        .unwrap();
    assert_eq!(none, None);
}

#[test]
fn test_query_as_rejects_unmatched_columns() {
    let (_db, repo) = setup();
    repo.insert(&person("Ada", 30)).unwrap();

    let err = repo
        .query_as::<Person>("SELECT id, name, age, 1 AS extra FROM persons", vec![])
        .unwrap_err();
    assert!(err.is_mapping());

    let err = repo
        .query_as::<Person>("SELECT id, name FROM persons", vec![])
        .unwrap_err();
    assert!(err.to_string().contains("field 'age'"));

    let people = repo
        .query_as::<Person>("SELECT age, name, id FROM persons", vec![])
        .unwrap();
    assert_eq!(people[0].name, "Ada");
}

#[test]
fn test_text_is_coerced_into_integer_fields() {
    let (_db, repo) = setup();
    let people = repo
        .query_as::<Person>("SELECT 1 AS id, 'Ada' AS name, '30' AS age", vec![])
        .unwrap();
    assert_eq!(people[0].age, 30);

    let err = repo
        .query_as::<Person>("SELECT 1 AS id, 'Ada' AS name, 'thirty' AS age", vec![])
        .unwrap_err();
    assert!(err.is_mapping());
}

#[test]
fn test_all_field_types_round_trip() {
    let db = TestDb::new();
    let repo = Repository::open(&db.url).unwrap();
    repo.create_table::<Event>().unwrap();

    let happened_at =
        NaiveDateTime::parse_from_str("2024-03-01 12:30:45.250", "%Y-%m-%d %H:%M:%S%.f").unwrap();
    let event = Event {
        id: None,
        title: "launch".into(),
        weight: 2.5,
        done: true,
        payload: vec![0, 1, 2, 255],
        happened_at,
        due: NaiveDate::from_ymd_opt(2024, 4, 1),
        note: None,
    };

    let key = repo.insert(&event).unwrap().unwrap();
    let loaded: Event = repo.select_by_id(key.clone()).unwrap().unwrap();
    assert_eq!(
        loaded,
        Event {
            id: Some(1),
            ..event
        }
    );
    assert_eq!(key, Value::Int(1));

    let count = repo
        .scalar("SELECT COUNT(*) FROM event_log", vec![])
        .unwrap();
    assert_eq!(count, Some(Value::Int(1)));
}

#[test]
fn test_random_round_trips() {
    let (_db, repo) = setup();
    let mut rng = rand::thread_rng();

    for _ in 0..25 {
        let original = person(&random_string(rng.gen_range(1..40)), rng.gen_range(-1000..1000));
        let key = repo.insert(&original).unwrap().unwrap();
        let loaded: Person = repo.select_by_id(key.clone()).unwrap().unwrap();

        assert_eq!(loaded.name, original.name);
        assert_eq!(loaded.age, original.age);
        assert_eq!(Value::from(loaded.id), key);
    }
}

#[test]
fn test_utf8_names_survive() {
    let (_db, repo) = setup();
    let names = ["张三", "Zoë", "🦀 crab", "O'Brien", "with \"quotes\""];
    for name in names {
        let key = repo.insert(&person(name, 1)).unwrap().unwrap();
        let loaded: Person = repo.select_by_id(key).unwrap().unwrap();
        assert_eq!(loaded.name, name);
    }
}

#[test]
fn test_singular_table_naming_from_url() {
    let db = TestDb::with_options("&table_naming=singular");
    let repo = Repository::open(&db.url).unwrap();
    assert_eq!(repo.config().table_naming, TableNaming::Singular);

    repo.create_table::<Person>().unwrap();
    repo.insert(&person("Ada", 30)).unwrap();
    let rows = repo.query("SELECT name FROM person", vec![]).unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_for_each_can_stop_early() {
    let (_db, repo) = setup();
    for i in 0..10 {
        repo.insert(&person(&format!("p{}", i), i)).unwrap();
    }

    let mut names = Vec::new();
    repo.for_each::<Person, _>(|p| {
        names.push(p.name);
        Ok(if names.len() == 3 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    })
    .unwrap();
    assert_eq!(names, vec!["p0", "p1", "p2"]);

    // The connection used above was released; the database is still writable.
    repo.insert(&person("after", 1)).unwrap();
}

#[test]
fn test_in_transaction_applies_dependent_writes() {
    let (_db, repo) = setup();

    let key = repo
        .in_transaction(|tx| {
            let key = tx.insert(&person("Ada", 30))?.unwrap_or(Value::Null);
            let mut ada: Person = tx
                .select_by_id(key.clone())?
                .ok_or_else(|| DbError::invalid_input("row vanished"))?;
            ada.age += 1;
            tx.update_by_id(&ada)?;
            Ok(key)
        })
        .unwrap();

    let ada: Person = repo.select_by_id(key).unwrap().unwrap();
    assert_eq!(ada.age, 31);
}

#[test]
fn test_in_transaction_rolls_back_on_error() {
    let (_db, repo) = setup();
    repo.insert(&person("Ada", 30)).unwrap();

    let err = repo
        .in_transaction(|tx| -> db_mapper::DbResult<()> {
            tx.insert(&person("Grace", 85))?;
            tx.execute("INSERT INTO persons (nmae) VALUES (?)", vec!["B".into()])?;
            Ok(())
        })
        .unwrap_err();
    assert!(err.is_execution());

    let people: Vec<Person> = repo.select_all().unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "Ada");
}

#[test]
fn test_missing_table_is_an_execution_error() {
    let db = TestDb::new();
    let repo = Repository::open(&db.url).unwrap();
    let err = repo.select_all::<Person>().unwrap_err();
    assert!(err.is_execution());
}

#[test]
fn test_ddl_export_matches_created_table() {
    let (_db, repo) = setup();
    let ddl = repo.create_table_statement::<Person>().unwrap();
    assert!(ddl.contains("\"persons\""));
    // Idempotent thanks to IF NOT EXISTS
    repo.create_table::<Person>().unwrap();
}
