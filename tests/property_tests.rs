//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

use proptest::prelude::*;

use hybrid_sync_engine::dialect::{rewrite_for, Dialect};
use hybrid_sync_engine::tickets::sla_minutes;
use hybrid_sync_engine::{Row, Value};

fn placeholder_count(sql: &str) -> usize {
    sql.bytes().filter(|b| *b == b'?').count()
}

// =============================================================================
// Dialect Rewriting Properties
// =============================================================================

proptest! {
    /// MySQL is the native dialect: rewriting for it never changes a statement.
    #[test]
    fn mysql_rewrite_is_identity(sql in ".{0,200}") {
        let rewritten = rewrite_for(Dialect::MySql, &sql);
        prop_assert_eq!(rewritten.as_ref(), sql.as_str());
    }

    /// Statements without MySQL-isms pass through SQLite rewriting untouched.
    #[test]
    fn plain_statements_pass_through(
        table in "[a-z][a-z_]{0,20}",
        column in "[a-z][a-z_]{0,20}",
    ) {
        let sql = format!("SELECT {column} FROM {table} WHERE {column} = ?");
        let rewritten = rewrite_for(Dialect::Sqlite, &sql);
        prop_assert_eq!(rewritten.as_ref(), sql.as_str());
    }

    /// Rewriting never changes the number of bind placeholders, so parameter
    /// lists built for the logical statement stay valid for the rendered one.
    #[test]
    fn rewrite_preserves_placeholder_count(
        table in "[a-z][a-z_]{0,20}",
        n in 1usize..10,
        ignore in proptest::bool::ANY,
    ) {
        let placeholders = vec!["?"; n].join(", ");
        let verb = if ignore { "INSERT IGNORE" } else { "INSERT" };
        let sql = format!("{verb} INTO {table} VALUES ({placeholders}, NOW())");
        let rendered = rewrite_for(Dialect::Sqlite, &sql);
        prop_assert_eq!(placeholder_count(&rendered), placeholder_count(&sql));
    }

    /// SQLite rendering is a fixed point: rewriting its own output changes
    /// nothing further.
    #[test]
    fn sqlite_rewrite_is_idempotent(
        table in "[a-z][a-z_]{0,20}",
        ignore in proptest::bool::ANY,
    ) {
        let verb = if ignore { "INSERT IGNORE" } else { "INSERT" };
        let sql = format!("{verb} INTO {table} (a, at) VALUES (?, NOW())");
        let once = rewrite_for(Dialect::Sqlite, &sql).into_owned();
        let twice = rewrite_for(Dialect::Sqlite, &once).into_owned();
        prop_assert_eq!(once, twice);
    }
}

// =============================================================================
// Row Properties
// =============================================================================

proptest! {
    /// Rows preserve column order and look up values by name.
    #[test]
    fn row_preserves_order_and_lookup(names in proptest::collection::btree_set("[a-z]{1,8}", 1..10)) {
        let pairs: Vec<(String, Value)> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), Value::Int(i as i64)))
            .collect();
        let row = Row::new(pairs.clone());

        let seen: Vec<&str> = row.columns().collect();
        let expected: Vec<&str> = pairs.iter().map(|(n, _)| n.as_str()).collect();
        prop_assert_eq!(seen, expected);

        for (i, (name, _)) in pairs.iter().enumerate() {
            prop_assert_eq!(row.get(name), Some(&Value::Int(i as i64)));
        }
    }
}

// =============================================================================
// SLA Properties
// =============================================================================

proptest! {
    /// Priorities outside the fixed table never produce a due date.
    #[test]
    fn unknown_priorities_have_no_sla(priority in "[a-z]{1,12}") {
        prop_assume!(!["Critical", "High", "Medium", "Low"].contains(&priority.as_str()));
        prop_assert_eq!(sla_minutes(&priority), None);
    }
}
