//! Statement text preparation.
//!
//! The client library reports zero affected rows for `DELETE FROM table`
//! without a predicate. Appending a tautological `WHERE 1=1` makes the server
//! report the real count. The rewrite is textual and only applies to the
//! exact unconditional single-table form.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Driver name, as reported to callers that branch on it.
pub const DRIVER_NAME: &str = "mysqli";

/// Identifier quoting character.
pub const ESCAPE_CHAR: char = '`';

/// Predicate appended to unconditional deletes.
pub const DELETE_HACK_SUFFIX: &str = " WHERE 1=1";

// `[[:space:]]` is the ASCII class. A statement terminator is never part of
// the table token, so `DELETE FROM t;` is left alone.
const UNCONDITIONAL_DELETE_PATTERN: &str =
    r"(?i)^[[:space:]]*DELETE[[:space:]]+FROM[[:space:]]+[^[:space:];]+[[:space:]]*$";

static UNCONDITIONAL_DELETE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    match Regex::new(UNCONDITIONAL_DELETE_PATTERN) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(
                pattern = UNCONDITIONAL_DELETE_PATTERN,
                error = %e,
                "Invalid unconditional delete pattern, delete rewrite disabled"
            );
            None
        }
    }
});

/// Characters stripped around a rewritten delete: space, tab, newline,
/// carriage return, NUL and vertical tab. Form feed is kept.
fn is_trimmed(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B')
}

/// `DELETE FROM <one token>` with nothing else but surrounding whitespace.
pub fn is_unconditional_delete(sql: &str) -> bool {
    UNCONDITIONAL_DELETE
        .as_ref()
        .is_some_and(|re| re.is_match(sql))
}

/// Prepare SQL for submission.
///
/// With `delete_hack` enabled an unconditional delete is trimmed and gets
/// [`DELETE_HACK_SUFFIX`]; every other statement is returned unchanged.
pub fn prep_query(sql: &str, delete_hack: bool) -> Cow<'_, str> {
    if delete_hack && is_unconditional_delete(sql) {
        let trimmed = sql.trim_matches(is_trimmed);
        Cow::Owned(format!("{trimmed}{DELETE_HACK_SUFFIX}"))
    } else {
        Cow::Borrowed(sql)
    }
}

/// Quote an identifier with backticks, doubling embedded backticks.
///
/// Dotted names are quoted per segment (`db.table` → `` `db`.`table` ``);
/// `*` segments are left bare.
pub fn escape_identifier(name: &str) -> String {
    name.split('.')
        .map(|segment| {
            if segment == "*" {
                segment.to_string()
            } else {
                let doubled = segment.replace(ESCAPE_CHAR, "``");
                format!("{ESCAPE_CHAR}{doubled}{ESCAPE_CHAR}")
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
