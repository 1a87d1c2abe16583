use eavault::EavaultError;
use eavault::connection::{ConnectionProvider, SqliteProvider};
use eavault::datatype::SqlValue;
use eavault::named::NamedStatement;

#[test]
fn repeated_name_binds_every_position() {
    let stmt = NamedStatement::parse("select * from people WHERE a = :id OR b = :id");
    assert_eq!(stmt.sql(), "select * from people WHERE a = ? OR b = ?");
    assert_eq!(stmt.positions("id"), Some(&[1, 2][..]));
    let values = stmt.bind_all(&[("id", SqlValue::from("x"))]).expect("bind");
    assert_eq!(values, vec![SqlValue::from("x"), SqlValue::from("x")]);
}

#[test]
fn quoted_marker_is_not_counted() {
    let stmt = NamedStatement::parse("select ':id' as literal, :id as bound");
    assert_eq!(stmt.parameter_count(), 1);
    assert_eq!(stmt.positions("id"), Some(&[1][..]));
}

#[test]
fn positions_follow_order_of_appearance() {
    let stmt = NamedStatement::parse(
        // comments get no special treatment
        "insert into t (a, b, c) values (:first, :second, :first_again) -- :first",
    );
    assert_eq!(stmt.positions("first"), Some(&[1, 4][..]));
    assert_eq!(stmt.positions("second"), Some(&[2][..]));
    assert_eq!(stmt.positions("first_again"), Some(&[3][..]));
    let mut names: Vec<&str> = stmt.names().collect();
    names.sort();
    assert_eq!(names, vec!["first", "first_again", "second"]);
}

#[test]
fn unknown_name_is_rejected() {
    let stmt = NamedStatement::parse("select :a");
    let err = stmt
        .bind_all(&[("a", SqlValue::from(1i64)), ("b", SqlValue::from(2i64))])
        .unwrap_err();
    assert!(matches!(err, EavaultError::UnknownParameter(name) if name == "b"));
    // bind_matching skips it instead
    let values = stmt
        .bind_matching(&[("a", SqlValue::from(1i64)), ("b", SqlValue::from(2i64))])
        .expect("bind");
    assert_eq!(values, vec![SqlValue::from(1i64)]);
}

#[test]
fn translated_statement_runs_against_sqlite() {
    let provider = SqliteProvider::open_in_memory().expect("sqlite");
    let mut conn = provider.acquire().expect("connection");
    let stmt = NamedStatement::parse("select :word || '-' || :word, ':word', 2 * :n");
    let rows = stmt
        .query(
            conn.as_mut(),
            &[("word", SqlValue::from("echo")), ("n", SqlValue::from(21i64))],
        )
        .expect("query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].text(0).expect("text"), "echo-echo");
    assert_eq!(rows[0].text(1).expect("text"), ":word");
    assert_eq!(rows[0].integer(2).expect("integer"), 42);
}
