// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL dialect translation.
//!
//! Logical queries are written in MySQL dialect. When a statement is about
//! to run on the SQLite cache it passes through a fixed, explicit rule table;
//! anything the table does not match is passed through byte-for-byte. There
//! is no open-ended "make MySQL work on SQLite" translation here, only the
//! finite set of constructs the logical query corpus actually uses:
//!
//! | MySQL construct               | SQLite rendering                     |
//! |-------------------------------|--------------------------------------|
//! | `NOW()`                       | `datetime('now')`                    |
//! | `CURRENT_TIMESTAMP()`         | `CURRENT_TIMESTAMP`                  |
//! | `INSERT IGNORE`               | `INSERT OR IGNORE`                   |
//! | `INSERT ... ON DUPLICATE KEY UPDATE ...` | `INSERT OR REPLACE ...` (update clause stripped) |
//!
//! Rewriting is textual and keyword-case-insensitive. Placeholders (`?`) are
//! never touched: sqlx uses the same positional marker on both backends.

use std::borrow::Cow;

/// The SQL dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

/// Keyword/function substitutions applied to SQLite-bound statements.
///
/// Matched case-insensitively, replaced left to right. Order matters only in
/// that `INSERT IGNORE` must not double-fire after the upsert rule has
/// already rewritten the INSERT keyword, so the upsert rule runs first.
const FUNCTION_RULES: &[(&str, &str)] = &[
    ("NOW()", "datetime('now')"),
    ("CURRENT_TIMESTAMP()", "CURRENT_TIMESTAMP"),
    ("INSERT IGNORE", "INSERT OR IGNORE"),
];

const ON_DUPLICATE: &str = "ON DUPLICATE KEY UPDATE";

/// Render a logical (MySQL-dialect) statement for the given dialect.
///
/// MySQL targets get the statement unchanged. SQLite targets get the rule
/// table applied; unmatched constructs pass through untouched.
pub fn rewrite_for(dialect: Dialect, sql: &str) -> Cow<'_, str> {
    match dialect {
        Dialect::MySql => Cow::Borrowed(sql),
        Dialect::Sqlite => match rewrite_sqlite(sql) {
            Some(rewritten) => Cow::Owned(rewritten),
            None => Cow::Borrowed(sql),
        },
    }
}

/// Returns `None` when no rule matched (pass-through).
fn rewrite_sqlite(sql: &str) -> Option<String> {
    let mut out: Option<String> = rewrite_upsert(sql);
    for (from, to) in FUNCTION_RULES {
        let current = out.as_deref().unwrap_or(sql);
        if find_ci(current, from).is_some() {
            out = Some(replace_ci(current, from, to));
        }
    }
    out
}

/// `INSERT ... ON DUPLICATE KEY UPDATE ...` becomes `INSERT OR REPLACE ...`
/// with the update clause dropped. REPLACE deletes-then-inserts on conflict,
/// which matches what the known upserts (control mappings) use the clause
/// for: last write wins on the full row.
fn rewrite_upsert(sql: &str) -> Option<String> {
    let clause = find_ci(sql, ON_DUPLICATE)?;
    let insert = find_ci(sql, "INSERT")?;
    if insert != sql.find(|c: char| !c.is_whitespace()).unwrap_or(0) {
        // ON DUPLICATE inside something that is not a leading INSERT; leave it.
        return None;
    }
    let mut out = String::with_capacity(sql.len());
    out.push_str(&sql[..insert]);
    out.push_str("INSERT OR REPLACE");
    out.push_str(sql[insert + "INSERT".len()..clause].trim_end());
    Some(out)
}

/// Byte offset of the first case-insensitive occurrence of `needle`.
///
/// ASCII-only case folding, which is length-preserving; SQL keywords are
/// ASCII by construction.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn replace_ci(haystack: &str, needle: &str, replacement: &str) -> String {
    let lower = haystack.to_ascii_lowercase();
    let needle_lower = needle.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut i = 0;
    while let Some(pos) = lower[i..].find(&needle_lower) {
        let abs = i + pos;
        out.push_str(&haystack[i..abs]);
        out.push_str(replacement);
        i = abs + needle.len();
    }
    out.push_str(&haystack[i..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_is_identity() {
        let sql = "INSERT IGNORE INTO t (a) VALUES (NOW())";
        assert_eq!(rewrite_for(Dialect::MySql, sql), sql);
    }

    #[test]
    fn test_now_rewrite() {
        let out = rewrite_for(Dialect::Sqlite, "UPDATE tickets SET updated_at = NOW() WHERE id = ?");
        assert_eq!(
            out,
            "UPDATE tickets SET updated_at = datetime('now') WHERE id = ?"
        );
    }

    #[test]
    fn test_now_rewrite_case_insensitive() {
        let out = rewrite_for(Dialect::Sqlite, "select now(), NOW()");
        assert_eq!(out, "select datetime('now'), datetime('now')");
    }

    #[test]
    fn test_current_timestamp_call() {
        let out = rewrite_for(Dialect::Sqlite, "SELECT CURRENT_TIMESTAMP()");
        assert_eq!(out, "SELECT CURRENT_TIMESTAMP");
    }

    #[test]
    fn test_insert_ignore() {
        let out = rewrite_for(Dialect::Sqlite, "INSERT IGNORE INTO assets (id) VALUES (?)");
        assert_eq!(out, "INSERT OR IGNORE INTO assets (id) VALUES (?)");
    }

    #[test]
    fn test_upsert_rewrite_strips_update_clause() {
        let sql = "INSERT INTO asset_controls (asset_id, control_id, status) \
                   VALUES (?, ?, ?) ON DUPLICATE KEY UPDATE status = VALUES(status)";
        let out = rewrite_for(Dialect::Sqlite, sql);
        assert_eq!(
            out,
            "INSERT OR REPLACE INTO asset_controls (asset_id, control_id, status) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_upsert_rewrite_lowercase() {
        let sql = "insert into m (a, b) values (?, ?) on duplicate key update b = values(b)";
        let out = rewrite_for(Dialect::Sqlite, sql);
        assert_eq!(out, "INSERT OR REPLACE into m (a, b) values (?, ?)");
    }

    #[test]
    fn test_unmatched_passes_through() {
        let sql = "SELECT id, title FROM tickets WHERE status = ? ORDER BY id";
        match rewrite_for(Dialect::Sqlite, sql) {
            Cow::Borrowed(s) => assert_eq!(s, sql),
            Cow::Owned(_) => panic!("pass-through should not allocate"),
        }
    }

    #[test]
    fn test_placeholders_preserved() {
        let sql = "INSERT IGNORE INTO t (a, b, c) VALUES (?, ?, NOW())";
        let out = rewrite_for(Dialect::Sqlite, sql);
        let before = sql.matches('?').count();
        let after = out.matches('?').count();
        assert_eq!(before, after);
    }
}
