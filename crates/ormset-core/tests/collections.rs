mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{id_set, ids, titles, Fixture};
use ormset_core::{
    Collection, Condition, Direction, EntityRef, Error, Model, OrderExpr, OrmConfig, Pairs, Platform,
    SqliteConnection, Value,
};

#[test]
fn test_scenario_filters_authors_by_book_year() {
    let fixture = Fixture::scenario();
    let authors = fixture
        .authors()
        .find_all()
        .unwrap()
        .find_by(Condition::property("books->year>", 2000))
        .unwrap();
    assert_eq!(ids(&authors.fetch_all().unwrap()), vec![1]);
    assert_eq!(authors.count().unwrap(), 1);
    assert_eq!(authors.count_stored().unwrap(), 1);
}

#[test]
fn test_scenario_orders_books_of_author() {
    let fixture = Fixture::scenario();
    let books = fixture
        .books()
        .find_by(Condition::property("author->name", "Alice"))
        .unwrap()
        .order_by("year", Direction::Asc)
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(titles(&books), vec!["X", "Y"]);
}

#[test]
fn test_materializes_once() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();
    fixture.take_statement_count();

    let first = books.fetch_all().unwrap();
    let second = books.fetch_all().unwrap();
    assert_eq!(first.len(), 5);
    assert!(first.iter().zip(&second).all(|(a, b)| Arc::ptr_eq(a, b)));
    assert_eq!(books.count().unwrap(), 5);
    assert_eq!(fixture.take_statement_count(), 1);

    // Clones share the materialized result.
    let clone = books.clone();
    assert_eq!(clone.count().unwrap(), 5);
    assert_eq!(fixture.take_statement_count(), 0);
}

#[test]
fn test_mutators_leave_receiver_untouched() {
    let fixture = Fixture::library();
    let all = fixture.books().find_all().unwrap();
    let sql_before = all.query_builder().unwrap().build(Platform::Sqlite).unwrap();

    let recent = all.find_by(Condition::property("year>", 2000)).unwrap();
    let ordered = recent.order_by("title", Direction::Desc).unwrap().limit_by(1, None);

    assert_eq!(titles(&ordered.fetch_all().unwrap()), vec!["Y"]);
    assert_eq!(id_set(&recent), vec![10, 11, 13]);
    assert_eq!(id_set(&all), vec![10, 11, 12, 13, 14]);
    let sql_after = all.query_builder().unwrap().build(Platform::Sqlite).unwrap();
    assert_eq!(sql_before, sql_after);

    // The same holds for in-memory collections.
    let array = fixture.in_memory(&all);
    let filtered = array.find_by(Condition::property("year<", 2000)).unwrap();
    assert_eq!(id_set(&filtered), vec![12, 14]);
    assert_eq!(array.count().unwrap(), 5);
}

#[test]
fn test_count_stored_ignores_order_and_respects_limit() {
    let fixture = Fixture::library();
    let books = fixture
        .books()
        .find_all()
        .unwrap()
        .order_by("year", Direction::Desc)
        .unwrap();
    assert_eq!(books.count_stored().unwrap(), 5);
    assert_eq!(books.limit_by(2, Some(4)).count_stored().unwrap(), 1);

    let counted = fixture.connection.executed_statements();
    let unlimited = &counted[0].sql;
    assert!(unlimited.starts_with("SELECT COUNT(*)"), "{}", unlimited);
    assert!(!unlimited.contains("ORDER BY"), "{}", unlimited);
}

#[test]
fn test_limit_and_offset() {
    let fixture = Fixture::library();
    let books = fixture
        .books()
        .find_all()
        .unwrap()
        .order_by("year", Direction::Desc)
        .unwrap()
        .limit_by(2, Some(1));
    assert_eq!(titles(&books.fetch_all().unwrap()), vec!["V", "X"]);

    let array = fixture
        .in_memory(&fixture.books().find_all().unwrap())
        .order_by("year", Direction::Desc)
        .unwrap()
        .limit_by(2, Some(1));
    assert_eq!(titles(&array.fetch_all().unwrap()), vec!["V", "X"]);
}

#[test]
fn test_multi_key_ordering_breaks_ties() {
    let fixture = Fixture::library();
    let keys = vec![
        (OrderExpr::from("author->name"), Direction::Asc),
        (OrderExpr::from("year"), Direction::Desc),
    ];
    let dbal = fixture
        .books()
        .find_all()
        .unwrap()
        .order_by_many(keys.clone())
        .unwrap();
    let expected = vec!["Y", "V", "X", "Z", "W"];
    assert_eq!(titles(&dbal.fetch_all().unwrap()), expected);

    let array = fixture
        .in_memory(&fixture.books().find_all().unwrap())
        .order_by_many(keys)
        .unwrap();
    assert_eq!(titles(&array.fetch_all().unwrap()), expected);
}

#[test]
fn test_stable_order_on_full_ties() {
    let fixture = Fixture::library();
    let books = fixture
        .books()
        .find_all()
        .unwrap()
        .order_by("id", Direction::Desc)
        .unwrap()
        .fetch_all()
        .unwrap();
    let array = fixture
        .books()
        .to_collection(books.clone())
        .unwrap()
        .order_by("author", Direction::Asc)
        .unwrap();
    // Authors 1 and 2 keep the descending id order within each group.
    assert_eq!(ids(&array.fetch_all().unwrap()), vec![13, 11, 10, 14, 12]);
}

#[test]
fn test_null_ordering() {
    let fixture = Fixture::library();
    let all = fixture.books().find_all().unwrap();
    let array = fixture.in_memory(&all);

    for collection in [&all, &array] {
        let asc = collection.order_by("price", Direction::Asc).unwrap();
        assert_eq!(titles(&asc.fetch_all().unwrap())[0], "Y");

        let desc = collection.order_by("price", Direction::Desc).unwrap();
        assert_eq!(titles(&desc.fetch_all().unwrap()), vec!["Z", "V", "X", "W", "Y"]);

        let last = collection.order_by("price", Direction::AscNullsLast).unwrap();
        assert_eq!(titles(&last.fetch_all().unwrap()), vec!["W", "X", "V", "Z", "Y"]);

        let first = collection.order_by("price", Direction::DescNullsFirst).unwrap();
        assert_eq!(titles(&first.fetch_all().unwrap()), vec!["Y", "Z", "V", "X", "W"]);
    }
}

#[test]
fn test_get_by_id_uses_identity_map() {
    let fixture = Fixture::library();
    let books = fixture.books();
    fixture.take_statement_count();

    let first = books.get_by_id(10).unwrap().unwrap();
    assert_eq!(fixture.take_statement_count(), 1);
    let second = books.get_by_id(10).unwrap().unwrap();
    assert_eq!(fixture.take_statement_count(), 0);
    assert!(Arc::ptr_eq(&first, &second));

    let fetched = books
        .find_by(Condition::property("title", "X"))
        .unwrap()
        .fetch()
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&first, &fetched));
}

#[test]
fn test_missing_ids() {
    let fixture = Fixture::library();
    let books = fixture.books();
    assert!(books.get_by_id(99).unwrap().is_none());
    fixture.take_statement_count();
    // Known missing keys are not queried again.
    assert!(books.get_by_id(99).unwrap().is_none());
    assert_eq!(fixture.take_statement_count(), 0);

    assert!(matches!(books.get_by_id_checked(99), Err(Error::NoResult(_))));
    assert!(matches!(
        books.get_by_checked(Condition::property("title", "nope")),
        Err(Error::NoResult(_))
    ));
    assert!(books
        .get_by(Condition::property("title", "nope"))
        .unwrap()
        .is_none());
}

#[test]
fn test_composite_primary_key() {
    let fixture = Fixture::library();
    let followers = fixture.repository("TagFollower");

    let follower = followers
        .get_by_id(Value::List(vec![1.into(), 2.into()]))
        .unwrap()
        .unwrap();
    assert_eq!(follower.get("followed_at").unwrap(), Value::Int(200));
    assert_eq!(follower.id(), Value::List(vec![1.into(), 2.into()]));

    assert!(matches!(
        followers.get_by_id(Value::List(vec![1.into()])),
        Err(Error::InvalidArgument(_))
    ));

    let pairs = Value::List(vec![
        Value::List(vec![1.into(), 1.into()]),
        Value::List(vec![2.into(), 1.into()]),
    ]);
    let dbal = followers
        .find_by(Condition::property("id", pairs.clone()))
        .unwrap();
    let array = fixture
        .in_memory(&followers.find_all().unwrap())
        .find_by(Condition::property("id", pairs))
        .unwrap();
    for collection in [dbal, array] {
        let mut at: Vec<Value> = collection
            .fetch_all()
            .unwrap()
            .iter()
            .map(|e| e.get("followed_at").unwrap())
            .collect();
        at.sort_by_key(|v| v.as_i64());
        assert_eq!(at, vec![Value::Int(100), Value::Int(300)]);
    }
}

#[test]
fn test_fetch_pairs() {
    let fixture = Fixture::library();
    let books = fixture
        .books()
        .find_by(Condition::property("author", 2))
        .unwrap()
        .order_by("id", Direction::Asc)
        .unwrap();

    match books.fetch_pairs(Some("id"), Some("title")).unwrap() {
        Pairs::Map(pairs) => assert_eq!(
            pairs,
            vec![(Value::Int(12), Value::from("Z")), (Value::Int(14), Value::from("W"))]
        ),
        other => panic!("unexpected pairs {:?}", other),
    }
    match books.fetch_pairs(None, Some("author->name")).unwrap() {
        Pairs::Values(values) => assert_eq!(values, vec![Value::from("Bob"), Value::from("Bob")]),
        other => panic!("unexpected pairs {:?}", other),
    }
    match books.fetch_pairs(Some("title"), None).unwrap() {
        Pairs::Entities(entities) => {
            assert_eq!(entities[0].0, Value::from("Z"));
            assert_eq!(entities[0].1.id(), Value::Int(12));
        }
        other => panic!("unexpected pairs {:?}", other),
    }
    assert!(matches!(
        books.fetch_pairs(None, None),
        Err(Error::InvalidArgument(_))
    ));
    // A to-many path has no single value.
    let authors = fixture.authors().find_all().unwrap();
    assert!(authors.fetch_pairs(None, Some("books->title")).is_err());
}

#[test]
fn test_embeddable_property() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();
    let prague = authors
        .find_by(Condition::property("address->city", "Prague"))
        .unwrap();
    assert_eq!(id_set(&prague), vec![1]);
    let array = fixture
        .in_memory(&authors)
        .find_by(Condition::property("address->city", "Prague"))
        .unwrap();
    assert_eq!(id_set(&array), vec![1]);

    let alice = fixture.authors().get_by_id(1).unwrap().unwrap();
    assert_eq!(alice.get("address.city").unwrap(), Value::from("Prague"));
}

#[test]
fn test_invalid_expressions_fail_at_construction() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();
    fixture.take_statement_count();

    assert!(books.find_by(Condition::property("title!!", "X")).is_err());
    assert!(books.find_by(Condition::property("->title", "X")).is_err());
    assert!(books
        .find_by(Condition::call("no_such_function", vec![]))
        .is_err());
    assert!(matches!(
        books.find_by(Condition::property("year>", Value::Null)),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(fixture.take_statement_count(), 0);

    // Unknown properties surface when the path is resolved.
    assert!(books
        .find_by(Condition::property("missing", 1))
        .and_then(|c| c.fetch_all())
        .is_err());
}

#[test]
fn test_empty_collection() {
    let fixture = Fixture::library();
    let metadata = fixture.books().metadata().clone();
    let empty = Collection::empty(metadata);
    let filtered = empty.find_by(Condition::property("year>", 2000)).unwrap();
    assert_eq!(filtered.count().unwrap(), 0);
    assert_eq!(filtered.count_stored().unwrap(), 0);
    assert!(filtered.fetch().unwrap().is_none());
    assert!(matches!(
        empty.call("recent", &[]),
        Err(Error::MemberAccess { .. })
    ));
}

#[test]
fn test_subscribers_fire_per_materialization() {
    let fixture = Fixture::library();
    let fired = Arc::new(AtomicUsize::new(0));
    let books = fixture.books().find_all().unwrap();
    let counter = fired.clone();
    books.subscribe_on_entity_fetch(Arc::new(move |entities: &[EntityRef]| {
        counter.fetch_add(entities.len(), Ordering::SeqCst);
    }));

    books.fetch_all().unwrap();
    books.fetch_all().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 5);

    // A derived collection materializes again and keeps the subscriber.
    books
        .find_by(Condition::property("year<", 2000))
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 7);
}

#[test]
fn test_repository_methods() {
    let config = OrmConfig::default();
    let connection = Arc::new(SqliteConnection::open_in_memory(&config).unwrap());
    connection.execute_batch(common::SCHEMA).unwrap();
    connection.execute_batch(common::LIBRARY_DATA).unwrap();
    let model = Model::builder(common::registry(), connection)
        .method(
            "Book",
            "published_after",
            Arc::new(|collection: Collection, args: &[Value]| {
                let year = args.first().cloned().unwrap_or(Value::Null);
                collection.find_by(Condition::property("year>", year))
            }),
        )
        .build()
        .unwrap();

    let books = model.repository("Book").unwrap();
    let recent = books.call("published_after", &[Value::Int(2002)]).unwrap();
    assert_eq!(id_set(&recent), vec![11, 13]);

    // Methods chain on collections of the same entity.
    let by_alice = books
        .find_by(Condition::property("author", 1))
        .unwrap()
        .call("published_after", &[Value::Int(2004)])
        .unwrap();
    assert_eq!(id_set(&by_alice), vec![11]);

    match books.call("missing", &[]) {
        Err(Error::MemberAccess { target, method }) => {
            assert_eq!(target, "repository Book");
            assert_eq!(method, "missing");
        }
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        books.find_all().unwrap().call("missing", &[]),
        Err(Error::MemberAccess { .. })
    ));
    assert!(Model::builder(common::registry(), Arc::new(
        SqliteConnection::open_in_memory(&config).unwrap()
    ))
    .method("Nope", "x", Arc::new(|c: Collection, _: &[Value]| Ok::<_, Error>(c)))
    .build()
    .is_err());
}
