//! Canonical SQL rewriting for target engines.
//!
//! Every statement in this workspace is written once, in canonical form:
//! server-flavored SQL with `$n` ordinal parameter markers (`$1`, `$2`, ...)
//! and single-quoted literals using `''` doubling. [`translate`] rewrites that
//! text for the engine that will execute it:
//!
//! - **MySql**: markers become positional `?`, so ordinals must run 1..N in
//!   order, each exactly once. Keywords pass through untouched.
//! - **Sqlite**: markers become numbered `?n` (reuse and any order allowed),
//!   `NOW()` becomes `datetime('now')`, `INSERT IGNORE` becomes
//!   `INSERT OR IGNORE`, and identity-column DDL is restated.
//!
//! Constructs with no mapping fail loudly with `UnsupportedConstruct`; nothing
//! is ever dropped from a statement silently. Text inside string literals is
//! never rewritten. Multi-word phrases are matched with single spaces, the
//! same convention the canonical statements are written in.

use regex::Regex;
use skybridge_types::{Dialect, DialectError};
use std::sync::OnceLock;

static ON_DUPLICATE_REGEX: OnceLock<Regex> = OnceLock::new();
static ON_UPDATE_TS_REGEX: OnceLock<Regex> = OnceLock::new();
static ENGINE_OPT_REGEX: OnceLock<Regex> = OnceLock::new();

fn on_duplicate_regex() -> &'static Regex {
    ON_DUPLICATE_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\bON\s+DUPLICATE\s+KEY\s+UPDATE\b")
            .expect("on-duplicate regex is valid")
    })
}

fn on_update_ts_regex() -> &'static Regex {
    ON_UPDATE_TS_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\bON\s+UPDATE\s+CURRENT_TIMESTAMP\b")
            .expect("on-update-timestamp regex is valid")
    })
}

fn engine_opt_regex() -> &'static Regex {
    ENGINE_OPT_REGEX
        .get_or_init(|| Regex::new(r"(?i)\bENGINE\s*=").expect("engine-option regex is valid"))
}

/// Phrase rewrites applied for the embedded engine, in match order.
const EMBEDDED_PHRASES: [(&str, &str); 4] = [
    ("INT AUTO_INCREMENT PRIMARY KEY", "INTEGER PRIMARY KEY AUTOINCREMENT"),
    ("INTEGER AUTO_INCREMENT PRIMARY KEY", "INTEGER PRIMARY KEY AUTOINCREMENT"),
    ("INSERT IGNORE", "INSERT OR IGNORE"),
    ("NOW()", "datetime('now')"),
];

/// Rewrite a canonical statement for the given target dialect.
pub fn translate(statement: &str, target: Dialect) -> Result<String, DialectError> {
    if target == Dialect::Sqlite {
        check_unmappable(statement, target)?;
    }
    rewrite(statement, target)
}

/// Canonical bind list `$1, $2, ... $n` for statement builders.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Scan the literal-stripped statement for constructs the embedded engine
/// cannot express. Whitespace between the words of a construct is irrelevant
/// here, unlike the rewrite phrases.
fn check_unmappable(statement: &str, target: Dialect) -> Result<(), DialectError> {
    let stripped = strip_literals(statement)?;
    let checks: [(&Regex, &str); 3] = [
        (on_duplicate_regex(), "ON DUPLICATE KEY UPDATE"),
        (on_update_ts_regex(), "ON UPDATE CURRENT_TIMESTAMP"),
        (engine_opt_regex(), "ENGINE="),
    ];
    for (re, construct) in checks {
        if re.is_match(&stripped) {
            return Err(DialectError::UnsupportedConstruct {
                construct: construct.to_string(),
                dialect: target,
            });
        }
    }
    Ok(())
}

/// Replace every string literal with `''` so construct detection cannot be
/// fooled by quoted text.
fn strip_literals(statement: &str) -> Result<String, DialectError> {
    let bytes = statement.as_bytes();
    let mut out = String::with_capacity(statement.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            let end = literal_end(bytes, i)?;
            out.push_str("''");
            i = end;
        } else {
            let ch = statement[i..].chars().next().unwrap_or('\u{fffd}');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Ok(out)
}

fn rewrite(statement: &str, target: Dialect) -> Result<String, DialectError> {
    let bytes = statement.as_bytes();
    let mut out = String::with_capacity(statement.len() + 16);
    let mut i = 0usize;
    let mut next_ordinal: u32 = 1;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            let end = literal_end(bytes, i)?;
            out.push_str(&statement[i..end]);
            i = end;
        } else if b == b'$' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            let ordinal: u32 =
                statement[i + 1..j]
                    .parse()
                    .map_err(|_| DialectError::PlaceholderOutOfOrder {
                        expected: next_ordinal,
                        found: 0,
                        dialect: target,
                    })?;
            if ordinal == 0 {
                return Err(DialectError::PlaceholderOutOfOrder {
                    expected: next_ordinal,
                    found: 0,
                    dialect: target,
                });
            }
            match target {
                Dialect::MySql => {
                    // `?` is purely positional; the canonical ordinals must
                    // already be in execution order to survive the rewrite
                    if ordinal != next_ordinal {
                        return Err(DialectError::PlaceholderOutOfOrder {
                            expected: next_ordinal,
                            found: ordinal,
                            dialect: target,
                        });
                    }
                    next_ordinal += 1;
                    out.push('?');
                }
                Dialect::Sqlite => {
                    out.push('?');
                    out.push_str(&statement[i + 1..j]);
                }
            }
            i = j;
        } else if target == Dialect::Sqlite {
            if let Some((consumed, replacement)) = phrase_at(statement, i) {
                out.push_str(replacement);
                i += consumed;
            } else if matches_word(statement, i, "AUTO_INCREMENT") {
                // Not part of a recognized identity-column phrase
                return Err(DialectError::UnsupportedConstruct {
                    construct: "AUTO_INCREMENT".to_string(),
                    dialect: target,
                });
            } else {
                let ch = statement[i..].chars().next().unwrap_or('\u{fffd}');
                out.push(ch);
                i += ch.len_utf8();
            }
        } else {
            let ch = statement[i..].chars().next().unwrap_or('\u{fffd}');
            out.push(ch);
            i += ch.len_utf8();
        }
    }

    Ok(out)
}

/// Byte index just past the closing quote of the literal opening at `start`.
/// `''` inside a literal is the canonical escape for a single quote.
fn literal_end(bytes: &[u8], start: usize) -> Result<usize, DialectError> {
    let mut j = start + 1;
    while j < bytes.len() {
        if bytes[j] == b'\'' {
            if j + 1 < bytes.len() && bytes[j + 1] == b'\'' {
                j += 2;
                continue;
            }
            return Ok(j + 1);
        }
        j += 1;
    }
    Err(DialectError::UnterminatedLiteral)
}

/// Match one of the embedded-engine phrases at `pos`, returning the matched
/// length and its replacement.
fn phrase_at(statement: &str, pos: usize) -> Option<(usize, &'static str)> {
    for (phrase, replacement) in EMBEDDED_PHRASES {
        if matches_phrase(statement, pos, phrase) {
            return Some((phrase.len(), replacement));
        }
    }
    None
}

/// Case-insensitive phrase match with identifier boundaries on both sides.
fn matches_phrase(statement: &str, pos: usize, phrase: &str) -> bool {
    let bytes = statement.as_bytes();
    let end = pos + phrase.len();
    if end > bytes.len() {
        return false;
    }
    if !bytes[pos..end].eq_ignore_ascii_case(phrase.as_bytes()) {
        return false;
    }
    if pos > 0 && is_ident_byte(bytes[pos - 1]) {
        return false;
    }
    // Only guard the tail when the phrase ends in an identifier character;
    // phrases ending in ')' are self-delimiting
    let last = phrase.as_bytes()[phrase.len() - 1];
    if is_ident_byte(last) && end < bytes.len() && is_ident_byte(bytes[end]) {
        return false;
    }
    true
}

fn matches_word(statement: &str, pos: usize, word: &str) -> bool {
    matches_phrase(statement, pos, word)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_placeholders_become_positional() {
        let sql = translate(
            "SELECT id FROM tickets WHERE asset_id = $1 AND logged_by = $2",
            Dialect::MySql,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT id FROM tickets WHERE asset_id = ? AND logged_by = ?"
        );
    }

    #[test]
    fn test_mysql_rejects_out_of_order_placeholders() {
        let err = translate("UPDATE tickets SET id = $2 WHERE id = $1", Dialect::MySql)
            .unwrap_err();
        assert_eq!(
            err,
            DialectError::PlaceholderOutOfOrder {
                expected: 1,
                found: 2,
                dialect: Dialect::MySql,
            }
        );
    }

    #[test]
    fn test_mysql_rejects_reused_placeholder() {
        let err =
            translate("SELECT * FROM t WHERE a = $1 OR b = $1", Dialect::MySql).unwrap_err();
        assert!(matches!(
            err,
            DialectError::PlaceholderOutOfOrder {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_sqlite_placeholders_keep_ordinals() {
        let sql = translate(
            "UPDATE tickets SET id = $2 WHERE id = $1 OR id = $1",
            Dialect::Sqlite,
        )
        .unwrap();
        assert_eq!(sql, "UPDATE tickets SET id = ?2 WHERE id = ?1 OR id = ?1");
    }

    #[test]
    fn test_now_substitution_only_for_sqlite() {
        let canonical = "INSERT INTO tickets (title, created_at) VALUES ($1, NOW())";
        assert_eq!(
            translate(canonical, Dialect::Sqlite).unwrap(),
            "INSERT INTO tickets (title, created_at) VALUES (?1, datetime('now'))"
        );
        assert_eq!(
            translate(canonical, Dialect::MySql).unwrap(),
            "INSERT INTO tickets (title, created_at) VALUES (?, NOW())"
        );
    }

    #[test]
    fn test_insert_ignore_rewrite() {
        let sql = translate("INSERT IGNORE INTO assets (name) VALUES ($1)", Dialect::Sqlite)
            .unwrap();
        assert_eq!(sql, "INSERT OR IGNORE INTO assets (name) VALUES (?1)");
    }

    #[test]
    fn test_identity_column_ddl() {
        let ddl = "CREATE TABLE t (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(50))";
        assert_eq!(
            translate(ddl, Dialect::Sqlite).unwrap(),
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name VARCHAR(50))"
        );
        assert_eq!(translate(ddl, Dialect::MySql).unwrap(), ddl);
    }

    #[test]
    fn test_stray_auto_increment_is_unsupported_for_sqlite() {
        let err = translate(
            "CREATE TABLE t (id BIGINT AUTO_INCREMENT PRIMARY KEY)",
            Dialect::Sqlite,
        )
        .unwrap_err();
        assert_eq!(
            err,
            DialectError::UnsupportedConstruct {
                construct: "AUTO_INCREMENT".to_string(),
                dialect: Dialect::Sqlite,
            }
        );
    }

    #[test]
    fn test_on_duplicate_key_is_unsupported_for_sqlite() {
        let canonical =
            "INSERT INTO t (a) VALUES ($1) ON DUPLICATE KEY UPDATE a = VALUES(a)";
        let err = translate(canonical, Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, DialectError::UnsupportedConstruct { .. }));
        // The server dialect keeps it verbatim
        assert!(translate(canonical, Dialect::MySql).unwrap().contains("ON DUPLICATE"));
    }

    #[test]
    fn test_engine_table_option_is_unsupported_for_sqlite() {
        let err = translate("CREATE TABLE t (id INT) ENGINE=InnoDB", Dialect::Sqlite)
            .unwrap_err();
        assert_eq!(
            err,
            DialectError::UnsupportedConstruct {
                construct: "ENGINE=".to_string(),
                dialect: Dialect::Sqlite,
            }
        );
    }

    #[test]
    fn test_literals_are_never_rewritten() {
        let sql = translate(
            "SELECT * FROM notes WHERE body = 'call NOW() about $1' AND id = $1",
            Dialect::Sqlite,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM notes WHERE body = 'call NOW() about $1' AND id = ?1"
        );
    }

    #[test]
    fn test_doubled_quote_escape_inside_literal() {
        let sql = translate(
            "INSERT INTO notes (body) VALUES ('it''s NOW() o''clock')",
            Dialect::Sqlite,
        )
        .unwrap();
        assert_eq!(sql, "INSERT INTO notes (body) VALUES ('it''s NOW() o''clock')");
    }

    #[test]
    fn test_unsupported_construct_inside_literal_is_fine() {
        let sql = translate(
            "INSERT INTO notes (body) VALUES ('ON DUPLICATE KEY UPDATE')",
            Dialect::Sqlite,
        );
        assert!(sql.is_ok());
    }

    #[test]
    fn test_unterminated_literal() {
        let err = translate("SELECT 'oops FROM t", Dialect::Sqlite).unwrap_err();
        assert_eq!(err, DialectError::UnterminatedLiteral);
    }

    #[test]
    fn test_zero_ordinal_is_rejected() {
        let err = translate("SELECT $0", Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, DialectError::PlaceholderOutOfOrder { found: 0, .. }));
    }

    #[test]
    fn test_bare_dollar_passes_through() {
        let sql = translate("SELECT '$' AS sym, cost$ FROM t", Dialect::MySql).unwrap();
        assert_eq!(sql, "SELECT '$' AS sym, cost$ FROM t");
    }

    #[test]
    fn test_multibyte_text_passes_through() {
        let sql = translate("SELECT 'café' AS name WHERE id = $1", Dialect::Sqlite).unwrap();
        assert_eq!(sql, "SELECT 'café' AS name WHERE id = ?1");
    }

    #[test]
    fn test_lowercase_phrases_match() {
        let sql = translate("insert ignore into t values (now())", Dialect::Sqlite).unwrap();
        assert_eq!(sql, "INSERT OR IGNORE into t values (datetime('now'))");
    }
}
