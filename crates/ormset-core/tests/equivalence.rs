//! The same conditions evaluated in SQL and in memory select the same entities.

mod common;

use common::{id_set, ids, Fixture};
use ormset_core::collection::functions::{
    COMPARE_EQUALS, COMPARE_GREATER_THAN, COMPARE_GREATER_THAN_EQUALS, COMPARE_SMALLER_THAN,
};
use ormset_core::proto::Arg;
use ormset_core::{Collection, Condition, Direction, FunctionCall, LikeExpression, OrderExpr, Value};
use pretty_assertions::assert_eq;

/// Filter `base` in both backends and check both against `expected`.
fn check(fixture: &Fixture, base: &Collection, condition: Condition, expected: &[i64]) {
    let dbal = base.find_by(condition.clone()).unwrap();
    let array = fixture.in_memory(base).find_by(condition.clone()).unwrap();
    assert_eq!(id_set(&dbal), expected, "sql: {:?}", condition);
    assert_eq!(id_set(&array), expected, "memory: {:?}", condition);
    assert_eq!(dbal.count_stored().unwrap(), expected.len());
}

fn aggregate(function: &str, call: FunctionCall, value: impl Into<Arg>) -> Condition {
    Condition::call(function, vec![Arg::Call(call), value.into()])
}

#[test]
fn test_scalar_comparisons() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();

    check(&fixture, &books, Condition::property("title", "X"), &[10]);
    check(&fixture, &books, Condition::property("title!=", "X"), &[11, 12, 13, 14]);
    check(&fixture, &books, Condition::property("year>=", 2001), &[10, 11, 13]);
    check(&fixture, &books, Condition::property("year<", 2000), &[12, 14]);
    check(&fixture, &books, Condition::property("year<=", 1999), &[12, 14]);
    check(&fixture, &books, Condition::property("price>", 9.5), &[10, 12, 13]);
    // Values are coerced to the property type.
    check(&fixture, &books, Condition::property("year", "2001"), &[10]);
}

#[test]
fn test_null_comparisons() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();

    check(&fixture, &books, Condition::property("price", Value::Null), &[11]);
    check(&fixture, &books, Condition::property("price!=", Value::Null), &[10, 12, 13, 14]);
    // NULL differs from every value.
    check(&fixture, &books, Condition::property("price!=", 10.0), &[11, 12, 13, 14]);
    check(&fixture, &books, Condition::property("publisher", Value::Null), &[13]);
}

#[test]
fn test_list_comparisons() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();

    check(
        &fixture,
        &books,
        Condition::property("title", vec![Value::from("X"), Value::from("Z"), Value::from("Q")]),
        &[10, 12],
    );
    check(
        &fixture,
        &books,
        Condition::property("title!=", vec![Value::from("X"), Value::from("Y")]),
        &[12, 13, 14],
    );
    check(
        &fixture,
        &books,
        Condition::property("price", vec![Value::Float(10.0), Value::Null]),
        &[10, 11],
    );
    check(&fixture, &books, Condition::property("title", Vec::<Value>::new()), &[]);
}

#[test]
fn test_like_modes() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();

    check(&fixture, &authors, Condition::property("name~", LikeExpression::starts_with("A")), &[1]);
    check(&fixture, &authors, Condition::property("name~", LikeExpression::ends_with("b")), &[2]);
    check(&fixture, &authors, Condition::property("name~", LikeExpression::contains("aro")), &[3]);
    check(&fixture, &authors, Condition::property("name~", LikeExpression::raw("_o%")), &[2]);
    check(&fixture, &authors, Condition::property("name~", "%l%"), &[1, 3]);
    // Matching is case sensitive.
    check(&fixture, &authors, Condition::property("name~", LikeExpression::contains("ALI")), &[]);
    // Wildcards in the input are literal.
    check(&fixture, &authors, Condition::property("name~", LikeExpression::contains("%")), &[]);
}

#[test]
fn test_embeddable_paths() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();

    check(&fixture, &authors, Condition::property("address->city", "Brno"), &[2]);
    check(&fixture, &authors, Condition::property("address->city", Value::Null), &[3]);
    check(
        &fixture,
        &fixture.books().find_all().unwrap(),
        Condition::property("author->address->city", "Prague"),
        &[10, 11, 13],
    );
}

#[test]
fn test_junctions() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();

    check(
        &fixture,
        &books,
        Condition::pairs([("author->name", Arg::from("Alice")), ("year>", Arg::from(2002))]),
        &[11, 13],
    );
    check(
        &fixture,
        &books,
        Condition::or(vec![
            Condition::and(vec![
                Condition::property("author->name", "Alice"),
                Condition::property("year>", 2002),
            ]),
            Condition::property("title", "Z"),
        ]),
        &[11, 12, 13],
    );
    check(&fixture, &books, Condition::and(vec![]), &[10, 11, 12, 13, 14]);
    check(&fixture, &books, Condition::or(vec![]), &[]);
}

#[test]
fn test_relationship_paths() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();
    let authors = fixture.authors().find_all().unwrap();
    let tags = fixture.tags().find_all().unwrap();
    let eans = fixture.repository("Ean").find_all().unwrap();

    // many-has-one
    check(&fixture, &books, Condition::property("author->name", "Bob"), &[12, 14]);
    check(&fixture, &books, Condition::property("publisher->name", "Acme"), &[10, 12]);
    check(&fixture, &books, Condition::property("author", 2), &[12, 14]);
    // one-has-one from both sides
    check(&fixture, &books, Condition::property("ean->code", "222"), &[12]);
    check(&fixture, &eans, Condition::property("book->title", "X"), &[1]);
    // one-has-many
    check(&fixture, &authors, Condition::property("books->title", "W"), &[2]);
    check(&fixture, &authors, Condition::property("books->year>", 2004), &[1]);
    check(&fixture, &authors, Condition::property("books", vec![Value::Int(12), Value::Int(13)]), &[1, 2]);
    // many-has-many from both sides
    check(&fixture, &books, Condition::property("tags->name", "fiction"), &[10, 11]);
    check(&fixture, &tags, Condition::property("books->title", "X"), &[1, 3]);
    check(&fixture, &tags, Condition::property("books->author->name", "Alice"), &[1, 3]);
    check(&fixture, &authors, Condition::property("books->tags->name", "classic"), &[2]);
    // Conditions on one to-many path match the same related row.
    check(
        &fixture,
        &authors,
        Condition::and(vec![
            Condition::property("books->year>", 2000),
            Condition::property("books->price>", 15.0),
        ]),
        &[1],
    );
}

#[test]
fn test_aggregate_functions() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();

    // Alice 10 + NULL + 20, Bob 30 + 5, Carol has no books.
    check(&fixture, &authors, aggregate(COMPARE_GREATER_THAN, FunctionCall::sum("books->price"), 20.0), &[1, 2]);
    check(&fixture, &authors, aggregate(COMPARE_GREATER_THAN, FunctionCall::sum("books->price"), 32.0), &[2]);
    check(&fixture, &authors, aggregate(COMPARE_GREATER_THAN_EQUALS, FunctionCall::avg("books->price"), 15.0), &[1, 2]);
    check(&fixture, &authors, aggregate(COMPARE_GREATER_THAN, FunctionCall::avg("books->price"), 16.0), &[2]);
    check(&fixture, &authors, aggregate(COMPARE_GREATER_THAN, FunctionCall::count("books"), 2), &[1]);
    check(&fixture, &authors, aggregate(COMPARE_EQUALS, FunctionCall::count("books"), 0), &[3]);
    check(&fixture, &authors, aggregate(COMPARE_EQUALS, FunctionCall::count("books->price"), 2), &[1, 2]);
    check(&fixture, &authors, aggregate(COMPARE_SMALLER_THAN, FunctionCall::min("books->year"), 1995), &[2]);
    check(&fixture, &authors, aggregate(COMPARE_EQUALS, FunctionCall::max("books->price"), 30.0), &[2]);
    check(&fixture, &authors, aggregate(COMPARE_EQUALS, FunctionCall::sum("books->price"), Value::Null), &[3]);
    check(&fixture, &authors, aggregate(COMPARE_EQUALS, FunctionCall::min("books->year"), Value::Null), &[3]);
    check(&fixture, &authors, aggregate(COMPARE_EQUALS, FunctionCall::avg("books->price"), Value::Null), &[3]);

    // Aggregates combine with plain conditions.
    check(
        &fixture,
        &authors,
        Condition::and(vec![
            aggregate(COMPARE_GREATER_THAN, FunctionCall::count("books"), 1),
            Condition::property("born", Value::Null),
        ]),
        &[2],
    );
}

#[test]
fn test_aggregates_ignore_to_many_filter_joins() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();
    let recent = authors
        .find_by(Condition::property("books->year>", 2000))
        .unwrap();

    // Alice matches through two books; her sum is still 10 + 20.
    check(&fixture, &recent, aggregate(COMPARE_EQUALS, FunctionCall::sum("books->price"), 30.0), &[1]);
    check(&fixture, &recent, aggregate(COMPARE_EQUALS, FunctionCall::count("books"), 3), &[1]);
    check(&fixture, &recent, aggregate(COMPARE_EQUALS, FunctionCall::max("books->year"), 2005), &[1]);

    check(
        &fixture,
        &authors,
        Condition::and(vec![
            Condition::property("books->year>", 2000),
            aggregate(COMPARE_EQUALS, FunctionCall::count("books"), 3),
        ]),
        &[1],
    );
    check(
        &fixture,
        &authors,
        Condition::or(vec![
            Condition::property("books->tags->name", "classic"),
            aggregate(COMPARE_EQUALS, FunctionCall::sum("books->price"), 30.0),
        ]),
        &[1, 2],
    );

    // Ordering by an aggregate under a to-many filter.
    let any_year = authors
        .find_by(Condition::property("books->year>", 1000))
        .unwrap();
    let keys = vec![(OrderExpr::from(FunctionCall::sum("books->price")), Direction::Desc)];
    let dbal = any_year.order_by_many(keys.clone()).unwrap();
    let array = fixture.in_memory(&any_year).order_by_many(keys).unwrap();
    assert_eq!(ids(&dbal.fetch_all().unwrap()), vec![2, 1]);
    assert_eq!(ids(&array.fetch_all().unwrap()), vec![2, 1]);
}

#[test]
fn test_aggregated_conditions() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();
    let recent = || Condition::property("books->year>", 2004);
    let any_year = || Condition::property("books->year>", 1000);

    check(&fixture, &authors, Condition::any(recent()), &[1]);
    check(&fixture, &authors, Condition::any(any_year()), &[1, 2]);
    check(&fixture, &authors, Condition::any(Condition::property("books->year>", 3000)), &[]);
    check(&fixture, &authors, Condition::none(recent()), &[2, 3]);
    check(&fixture, &authors, Condition::none(any_year()), &[3]);

    let after_1995 = || Condition::property("books->year>", 1995);
    check(&fixture, &authors, Condition::count_between(Some(2), None, after_1995()), &[1]);
    check(&fixture, &authors, Condition::count_between(Some(1), Some(1), after_1995()), &[2]);
    check(
        &fixture,
        &authors,
        Condition::count_between(None, Some(0), Condition::property("books->price>", 100.0)),
        &[1, 2, 3],
    );

    // The aggregated rows must match every item of the junction.
    check(
        &fixture,
        &authors,
        Condition::count_between(
            Some(2),
            None,
            Condition::and(vec![
                Condition::property("books->year>", 1995),
                Condition::property("books->price!=", Value::Null),
            ]),
        ),
        &[1],
    );
}

#[test]
fn test_ordering_matches() {
    let fixture = Fixture::library();
    let authors = fixture.authors().find_all().unwrap();
    let books = fixture.books().find_all().unwrap();

    let orderings: Vec<(&Collection, Vec<(OrderExpr, Direction)>, Vec<i64>)> = vec![
        (
            &authors,
            vec![(FunctionCall::count("books").into(), Direction::Desc)],
            vec![1, 2, 3],
        ),
        (
            &authors,
            vec![(FunctionCall::sum("books->price").into(), Direction::DescNullsLast)],
            vec![2, 1, 3],
        ),
        (
            &authors,
            vec![("born".into(), Direction::Asc), ("name".into(), Direction::Desc)],
            vec![2, 1, 3],
        ),
        (
            &books,
            vec![("ean->code".into(), Direction::Asc), ("id".into(), Direction::Asc)],
            vec![11, 13, 14, 10, 12],
        ),
        (
            &books,
            vec![("publisher->name".into(), Direction::DescNullsFirst), ("id".into(), Direction::Desc)],
            vec![13, 14, 11, 12, 10],
        ),
    ];

    for (base, keys, expected) in orderings {
        let dbal = base.order_by_many(keys.clone()).unwrap();
        let array = fixture.in_memory(base).order_by_many(keys.clone()).unwrap();
        assert_eq!(ids(&dbal.fetch_all().unwrap()), expected, "sql: {:?}", keys);
        assert_eq!(ids(&array.fetch_all().unwrap()), expected, "memory: {:?}", keys);
    }
}

#[test]
fn test_filter_then_order_then_limit() {
    let fixture = Fixture::library();
    let books = fixture.books().find_all().unwrap();
    let condition = Condition::property("tags->name", vec![Value::from("fiction"), Value::from("new")]);

    let dbal = books
        .find_by(condition.clone())
        .unwrap()
        .order_by("price", Direction::Desc)
        .unwrap()
        .limit_by(2, None);
    let array = fixture
        .in_memory(&books)
        .find_by(condition)
        .unwrap()
        .order_by("price", Direction::Desc)
        .unwrap()
        .limit_by(2, None);
    // Book X matches through two tags but is returned once.
    assert_eq!(ids(&dbal.fetch_all().unwrap()), vec![13, 10]);
    assert_eq!(ids(&array.fetch_all().unwrap()), vec![13, 10]);
    assert_eq!(dbal.count_stored().unwrap(), 2);
}
