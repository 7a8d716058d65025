mod common;

use std::sync::Arc;

use common::{id_set, Fixture};
use ormset_core::{Condition, Connection, Error, Model, OrmConfig, SqliteConnection, Value};
use pretty_assertions::assert_eq;

/// First column of the first row of a raw query.
fn scalar(connection: &SqliteConnection, sql: &str, params: &[Value]) -> Value {
    connection
        .query(sql, params)
        .unwrap()
        .first()
        .and_then(|row| row.get_index(0).cloned())
        .unwrap_or(Value::Null)
}

fn count(connection: &SqliteConnection, table: &str) -> i64 {
    scalar(connection, &format!("SELECT COUNT(*) FROM {}", table), &[])
        .as_i64()
        .unwrap()
}

#[test]
fn test_insert_generates_id() {
    let fixture = Fixture::library();
    let authors = fixture.authors();
    let dana = authors.create();
    dana.set("name", "Dana").unwrap();
    dana.set("address.city", "Olomouc").unwrap();
    assert!(!dana.is_persisted());

    fixture.model.persist(&dana).unwrap();
    assert!(dana.is_persisted());
    assert!(!dana.is_modified());
    assert_eq!(dana.id(), Value::Int(4));
    assert!(Arc::ptr_eq(&authors.get_by_id(4).unwrap().unwrap(), &dana));

    assert!(fixture.model.flush().unwrap());
    assert!(!fixture.model.flush().unwrap());
    assert_eq!(
        scalar(&fixture.connection, "SELECT address_city FROM authors WHERE id = ?", &[4.into()]),
        Value::from("Olomouc")
    );
}

#[test]
fn test_update_writes_modified_columns() {
    let fixture = Fixture::library();
    let alice = fixture.authors().get_by_id(1).unwrap().unwrap();
    alice.set("name", "Alicia").unwrap();
    assert_eq!(alice.modified_keys(), vec!["name".to_string()]);

    fixture.take_statement_count();
    fixture.model.persist(&alice).unwrap();
    let statements = fixture.connection.executed_statements();
    let update = statements
        .iter()
        .find(|s| s.sql.starts_with("UPDATE"))
        .expect("an UPDATE statement");
    assert!(!update.sql.contains("born"), "{}", update.sql);
    assert_eq!(update.params, vec![Value::from("Alicia"), Value::Int(1)]);

    fixture.model.flush().unwrap();
    assert_eq!(
        scalar(&fixture.connection, "SELECT name FROM authors WHERE id = ?", &[1.into()]),
        Value::from("Alicia")
    );

    // Persisting an unmodified entity writes nothing.
    fixture.take_statement_count();
    fixture.model.persist(&alice).unwrap();
    assert!(fixture
        .connection
        .executed_statements()
        .iter()
        .all(|s| !s.sql.starts_with("UPDATE")));
}

#[test]
fn test_rollback_discards_writes() {
    let fixture = Fixture::library();
    let alice = fixture.authors().get_by_id(1).unwrap().unwrap();
    alice.set("name", "Alicia").unwrap();
    fixture.model.persist(&alice).unwrap();

    assert!(fixture.model.rollback().unwrap());
    assert!(!fixture.model.rollback().unwrap());
    assert_eq!(
        scalar(&fixture.connection, "SELECT name FROM authors WHERE id = ?", &[1.into()]),
        Value::from("Alice")
    );

    // The next read refreshes the tracked entity.
    let reread = fixture
        .authors()
        .find_by(Condition::property("id", 1))
        .unwrap()
        .fetch()
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&reread, &alice));
    assert_eq!(alice.get("name").unwrap(), Value::from("Alice"));
}

#[test]
fn test_cascade_persist_children() {
    let fixture = Fixture::library();
    let dana = fixture.authors().create();
    dana.set("name", "Dana").unwrap();
    let books = dana.has_many("books").unwrap();
    for title in ["P", "Q"] {
        let book = fixture.books().create();
        book.set("title", title).unwrap();
        books.add(book).unwrap();
    }

    fixture.model.persist(&dana).unwrap();
    fixture.model.flush().unwrap();

    assert!(books.pending_added().is_empty());
    assert_eq!(
        scalar(
            &fixture.connection,
            "SELECT COUNT(*) FROM books WHERE author_id = ?",
            &[dana.id()]
        ),
        Value::Int(2)
    );
    let stored = fixture
        .books()
        .find_by(Condition::property("author->name", "Dana"))
        .unwrap();
    assert_eq!(stored.count().unwrap(), 2);
    assert_eq!(books.count().unwrap(), 2);
}

#[test]
fn test_persist_requires_persisted_reference() {
    let fixture = Fixture::library();
    let book = fixture.books().create();
    book.set("title", "Orphan").unwrap();
    let publisher = fixture.repository("Publisher").create();
    publisher.set("name", "New").unwrap();
    book.has_one("author")
        .unwrap()
        .set(fixture.authors().get_by_id(1).unwrap())
        .unwrap();
    book.has_one("publisher").unwrap().set(Some(publisher.clone())).unwrap();

    // The publisher relationship does not cascade.
    assert!(matches!(
        fixture.model.persist(&book),
        Err(Error::InvalidState(_))
    ));

    fixture.model.persist(&publisher).unwrap();
    fixture.model.persist(&book).unwrap();
    fixture.model.flush().unwrap();
    assert_eq!(
        scalar(
            &fixture.connection,
            "SELECT publisher_id FROM books WHERE id = ?",
            &[book.id()]
        ),
        publisher.id()
    );
}

#[test]
fn test_reassign_child_to_other_parent() {
    let fixture = Fixture::library();
    let bob = fixture.authors().get_by_id(2).unwrap().unwrap();
    let carol = fixture.authors().get_by_id(3).unwrap().unwrap();
    let z = fixture.books().get_by_id(12).unwrap().unwrap();

    z.has_one("author").unwrap().set(Some(carol.clone())).unwrap();
    assert_eq!(z.get("author").unwrap(), Value::Int(3));
    assert_eq!(bob.has_many("books").unwrap().count().unwrap(), 1);
    assert_eq!(carol.has_many("books").unwrap().count().unwrap(), 1);

    fixture.model.persist(&z).unwrap();
    fixture.model.flush().unwrap();
    assert_eq!(
        scalar(&fixture.connection, "SELECT author_id FROM books WHERE id = 12", &[]),
        Value::Int(3)
    );
}

#[test]
fn test_many_has_many_links() {
    let fixture = Fixture::library();
    let x = fixture.books().get_by_id(10).unwrap().unwrap();
    let w = fixture.books().get_by_id(14).unwrap().unwrap();
    let fiction = fixture.tags().get_by_id(1).unwrap().unwrap();

    w.has_many("tags").unwrap().add(fiction.clone()).unwrap();
    x.has_many("tags").unwrap().remove(fiction.clone()).unwrap();
    // The reverse side follows both edits.
    let fiction_books = fiction.has_many("books").unwrap();
    assert_eq!(id_set(&fiction_books.collection().unwrap()), vec![11, 14]);

    fixture.model.persist(&w).unwrap();
    fixture.model.persist(&x).unwrap();
    fixture.model.flush().unwrap();

    let linked = |book: i64| {
        scalar(
            &fixture.connection,
            "SELECT COUNT(*) FROM books_x_tags WHERE book_id = ? AND tag_id = 1",
            &[book.into()],
        )
    };
    assert_eq!(linked(14), Value::Int(1));
    assert_eq!(linked(10), Value::Int(0));
    assert_eq!(count(&fixture.connection, "books_x_tags"), 5);
}

#[test]
fn test_many_has_many_from_reverse_side() {
    let fixture = Fixture::library();
    let y = fixture.books().get_by_id(11).unwrap().unwrap();
    let classic = fixture.tags().get_by_id(2).unwrap().unwrap();

    classic.has_many("books").unwrap().add(y.clone()).unwrap();
    assert_eq!(y.has_many("tags").unwrap().pending_added().len(), 1);

    // The join table is written by the owning side.
    fixture.model.persist(&y).unwrap();
    fixture.model.flush().unwrap();
    assert_eq!(
        scalar(
            &fixture.connection,
            "SELECT COUNT(*) FROM books_x_tags WHERE book_id = 11 AND tag_id = 2",
            &[]
        ),
        Value::Int(1)
    );
}

#[test]
fn test_remove_cascades() {
    let fixture = Fixture::library();
    let bob = fixture.authors().get_by_id(2).unwrap().unwrap();
    let z = fixture.books().get_by_id(12).unwrap().unwrap();

    fixture.model.remove(&bob).unwrap();
    assert!(bob.is_removed());
    assert!(z.is_removed());
    fixture.model.flush().unwrap();

    assert_eq!(count(&fixture.connection, "authors"), 2);
    assert_eq!(count(&fixture.connection, "books"), 3);
    // Book Z's tag link went with it.
    assert_eq!(count(&fixture.connection, "books_x_tags"), 4);
    assert!(fixture.authors().get_by_id(2).unwrap().is_none());
    assert!(fixture.books().get_by_id(12).unwrap().is_none());

    let draft = fixture.authors().create();
    assert!(matches!(
        fixture.model.remove(&draft),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_entity_belongs_to_repository() {
    let fixture = Fixture::library();
    let tag = fixture.tags().create();
    assert!(fixture.authors().persist(&tag).is_err());
    assert!(fixture.authors().remove(&tag).is_err());
}

#[test]
fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");
    let config = OrmConfig::default();

    {
        let connection = Arc::new(SqliteConnection::open(&path, &config).unwrap());
        connection.execute_batch(common::SCHEMA).unwrap();
        let model = Model::builder(common::registry(), connection).build().unwrap();
        let author = model.repository("Author").unwrap().create();
        author.set("name", "Eve").unwrap();
        let book = model.repository("Book").unwrap().create();
        book.set("title", "Kept").unwrap();
        author.has_many("books").unwrap().add(book).unwrap();
        model.persist(&author).unwrap();
        model.flush().unwrap();
    }

    let connection = Arc::new(SqliteConnection::open(&path, &config).unwrap());
    let model = Model::builder(common::registry(), connection).build().unwrap();
    let books = model
        .repository("Book")
        .unwrap()
        .find_by(Condition::property("author->name", "Eve"))
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].get("title").unwrap(), Value::from("Kept"));
}
