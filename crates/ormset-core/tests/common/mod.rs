//! Shared fixture: an in-memory library schema.

#![allow(dead_code)]

use std::sync::Arc;

use ormset_core::{
    Cascade, Collection, EmbeddableMetadata, EntityMetadata, EntityRef, MetadataRegistry, Model,
    OrmConfig, PropertyMetadata, Repository, ScalarType, SqliteConnection, Value,
};

pub const SCHEMA: &str = "
CREATE TABLE authors (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    born INTEGER,
    address_city TEXT
);
CREATE TABLE publishers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE eans (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL
);
CREATE TABLE books (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    year INTEGER,
    price REAL,
    author_id INTEGER NOT NULL REFERENCES authors (id),
    publisher_id INTEGER REFERENCES publishers (id),
    ean_id INTEGER REFERENCES eans (id)
);
CREATE TABLE tags (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE books_x_tags (
    book_id INTEGER NOT NULL REFERENCES books (id),
    tag_id INTEGER NOT NULL REFERENCES tags (id),
    PRIMARY KEY (book_id, tag_id)
);
CREATE TABLE tag_followers (
    tag_id INTEGER NOT NULL,
    author_id INTEGER NOT NULL,
    followed_at INTEGER NOT NULL,
    PRIMARY KEY (tag_id, author_id)
);
";

/// Authors (1, Alice), (2, Bob) and books X, Y, Z.
pub const SCENARIO_DATA: &str = "
INSERT INTO authors (id, name) VALUES (1, 'Alice'), (2, 'Bob');
INSERT INTO books (id, title, year, author_id) VALUES
    (10, 'X', 2001, 1),
    (11, 'Y', 2005, 1),
    (12, 'Z', 1999, 2);
";

/// Alice has books X, Y, V; Bob has Z, W; Carol has none.
pub const LIBRARY_DATA: &str = "
INSERT INTO authors (id, name, born, address_city) VALUES
    (1, 'Alice', 1960, 'Prague'),
    (2, 'Bob', NULL, 'Brno'),
    (3, 'Carol', 1980, NULL);
INSERT INTO publishers (id, name) VALUES (1, 'Acme'), (2, 'Zeta');
INSERT INTO eans (id, code) VALUES (1, '111'), (2, '222');
INSERT INTO books (id, title, year, price, author_id, publisher_id, ean_id) VALUES
    (10, 'X', 2001, 10.0, 1, 1, 1),
    (11, 'Y', 2005, NULL, 1, 2, NULL),
    (12, 'Z', 1999, 30.0, 2, 1, 2),
    (13, 'V', 2003, 20.0, 1, NULL, NULL),
    (14, 'W', 1990, 5.0, 2, 2, NULL);
INSERT INTO tags (id, name) VALUES (1, 'fiction'), (2, 'classic'), (3, 'new');
INSERT INTO books_x_tags (book_id, tag_id) VALUES (10, 1), (10, 3), (11, 1), (12, 2), (13, 3);
INSERT INTO tag_followers (tag_id, author_id, followed_at) VALUES (1, 1, 100), (1, 2, 200), (2, 1, 300);
";

pub fn registry() -> MetadataRegistry {
    MetadataRegistry::builder()
        .entity(
            EntityMetadata::new("Author")
                .with_table("authors")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::new("name", ScalarType::String))
                .property(PropertyMetadata::new("born", ScalarType::Int).nullable())
                .property(PropertyMetadata::embeddable(
                    "address",
                    EmbeddableMetadata::new("Address")
                        .property(PropertyMetadata::new("city", ScalarType::String).nullable()),
                ))
                .property(
                    PropertyMetadata::one_has_many("books", "Book", "author").with_cascade(
                        Cascade {
                            persist: true,
                            remove: true,
                        },
                    ),
                ),
        )
        .entity(
            EntityMetadata::new("Publisher")
                .with_table("publishers")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::new("name", ScalarType::String))
                .property(PropertyMetadata::one_has_many("books", "Book", "publisher")),
        )
        .entity(
            EntityMetadata::new("Book")
                .with_table("books")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::new("title", ScalarType::String))
                .property(PropertyMetadata::new("year", ScalarType::Int).nullable())
                .property(PropertyMetadata::new("price", ScalarType::Float).nullable())
                .property(PropertyMetadata::many_has_one("author", "Author", Some("books")))
                .property(
                    PropertyMetadata::many_has_one("publisher", "Publisher", Some("books"))
                        .nullable(),
                )
                .property(PropertyMetadata::one_has_one("ean", "Ean", Some("book"), true))
                .property(PropertyMetadata::many_has_many("tags", "Tag", Some("books"), true)),
        )
        .entity(
            EntityMetadata::new("Tag")
                .with_table("tags")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::new("name", ScalarType::String))
                .property(PropertyMetadata::many_has_many("books", "Book", Some("tags"), false)),
        )
        .entity(
            EntityMetadata::new("Ean")
                .with_table("eans")
                .property(PropertyMetadata::primary_key("id", ScalarType::Int))
                .property(PropertyMetadata::new("code", ScalarType::String))
                .property(PropertyMetadata::one_has_one("book", "Book", Some("ean"), false)),
        )
        .entity(
            EntityMetadata::new("TagFollower")
                .with_table("tag_followers")
                .property(PropertyMetadata::primary_key("tag_id", ScalarType::Int))
                .property(PropertyMetadata::primary_key("author_id", ScalarType::Int))
                .property(PropertyMetadata::new("followed_at", ScalarType::Int)),
        )
        .build()
        .expect("fixture metadata is valid")
}

pub struct Fixture {
    pub model: Arc<Model>,
    pub connection: Arc<SqliteConnection>,
}

impl Fixture {
    pub fn with_config(config: OrmConfig, data: &str) -> Self {
        init_tracing();
        let connection = Arc::new(SqliteConnection::open_in_memory(&config).unwrap());
        connection.execute_batch(SCHEMA).unwrap();
        connection.execute_batch(data).unwrap();
        let model = Model::builder(registry(), connection.clone())
            .config(config)
            .build()
            .unwrap();
        Self { model, connection }
    }

    /// The data set of the Alice/Bob scenario.
    pub fn scenario() -> Self {
        Self::with_config(OrmConfig::default(), SCENARIO_DATA)
    }

    /// The full library data set.
    pub fn library() -> Self {
        Self::with_config(OrmConfig::default(), LIBRARY_DATA)
    }

    pub fn repository(&self, entity: &str) -> Arc<Repository> {
        self.model.repository(entity).unwrap()
    }

    pub fn authors(&self) -> Arc<Repository> {
        self.repository("Author")
    }

    pub fn books(&self) -> Arc<Repository> {
        self.repository("Book")
    }

    pub fn tags(&self) -> Arc<Repository> {
        self.repository("Tag")
    }

    /// Number of statements run since the last call.
    pub fn take_statement_count(&self) -> usize {
        let count = self.connection.statement_count();
        self.connection.reset_statement_log();
        count
    }

    /// Same entities, evaluated in memory.
    pub fn in_memory(&self, collection: &Collection) -> Collection {
        let repository = self.repository(&collection.metadata().name);
        repository
            .to_collection(collection.fetch_all().unwrap())
            .unwrap()
    }
}

/// Primary keys of the entities, in order.
pub fn ids(entities: &[EntityRef]) -> Vec<i64> {
    entities
        .iter()
        .map(|e| e.id().as_i64().expect("integer id"))
        .collect()
}

/// Sorted primary keys of a collection.
pub fn id_set(collection: &Collection) -> Vec<i64> {
    let mut ids = ids(&collection.fetch_all().unwrap());
    ids.sort_unstable();
    ids
}

pub fn titles(entities: &[EntityRef]) -> Vec<String> {
    entities
        .iter()
        .map(|e| match e.get("title").unwrap() {
            Value::String(title) => title,
            other => panic!("unexpected title {:?}", other),
        })
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
