use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use sqlroute_core::*;

// ===== Positional Tests =====

#[test]
fn test_insert_with_mixed_values() {
    let fmt = MySqlFormatter::new();
    let sql = fmt.format(
        "INSERT INTO events (name, payload, at, deleted) VALUES (?, ?, ?, ?)",
        &Params::positional([
            SqlValue::from("signup"),
            SqlValue::from(vec![0x01u8, 0xff]),
            NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap()
                .into(),
            SqlValue::from(None::<bool>),
        ]),
    );

    assert_eq!(
        sql,
        "INSERT INTO events (name, payload, at, deleted) \
         VALUES ('signup', X'01ff', '2024-01-02 03:04:05.000', NULL)"
    );
}

#[test]
fn test_bulk_insert_with_nested_list() {
    let fmt = MySqlFormatter::new();
    let rows = SqlValue::List(vec![
        SqlValue::List(vec![1.into(), "a".into()]),
        SqlValue::List(vec![2.into(), "b".into()]),
    ]);
    let sql = fmt.format("INSERT INTO t (id, v) VALUES ?", &Params::positional([rows]));

    assert_eq!(sql, "INSERT INTO t (id, v) VALUES (1, 'a'), (2, 'b')");
}

#[test]
fn test_in_clause_from_list() {
    let fmt = MySqlFormatter::new();
    let ids = SqlValue::List(vec![1.into(), 2.into(), 3.into()]);
    let sql = fmt.format("SELECT * FROM t WHERE id IN (?)", &Params::positional([ids]));

    assert_eq!(sql, "SELECT * FROM t WHERE id IN (1, 2, 3)");
}

// ===== Named Tests =====

#[test]
fn test_named_injection_attempt_is_quoted() {
    let fmt = MySqlFormatter::new();
    let sql = fmt.format(
        "SELECT * FROM users WHERE name = :name",
        &Params::named([("name", "x' OR '1'='1")]),
    );

    assert_eq!(sql, r"SELECT * FROM users WHERE name = 'x\' OR \'1\'=\'1'");
}

#[test]
fn test_named_raw_value() {
    let fmt = MySqlFormatter::new();
    let sql = fmt.format(
        "UPDATE t SET touched_at = :now WHERE id = :id",
        &Params::named([("now", SqlValue::raw("NOW()")), ("id", SqlValue::from(9))]),
    );

    assert_eq!(sql, "UPDATE t SET touched_at = NOW() WHERE id = 9");
}

#[test]
fn test_colons_in_string_literal_untouched() {
    let fmt = MySqlFormatter::new();
    let sql = fmt.format(
        "SELECT DATE_FORMAT(at, '%H:%i') AS hm FROM t WHERE id = :id",
        &Params::named([("id", 1)]),
    );

    assert_eq!(
        sql,
        "SELECT DATE_FORMAT(at, '%H:%i') AS hm FROM t WHERE id = 1"
    );
}

// ===== Timestamp Tests =====

#[test]
fn test_timestamp_round_trip_through_formatter() {
    let dt = NaiveDate::from_ymd_opt(2017, 7, 7)
        .unwrap()
        .and_hms_milli_opt(7, 7, 7, 777)
        .unwrap();

    let stamp = to_timestamp(&dt, false);
    let sql = MySqlFormatter::new().format("SELECT ?", &Params::positional([stamp]));

    assert_eq!(sql, "SELECT '2017-07-07 07:07:07.777'");
}
