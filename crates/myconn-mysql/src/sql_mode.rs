//! Strict-mode session initialization.
//!
//! The edit is sent to the server as an init command so it applies to
//! whatever `@@sql_mode` the server defaults to. [`SqlModeEdit::apply`]
//! performs the identical edit on a mode string locally.

pub const STRICT_ALL_TABLES: &str = "STRICT_ALL_TABLES";
pub const STRICT_TRANS_TABLES: &str = "STRICT_TRANS_TABLES";

/// Modes removed when strict mode is turned off, in removal order.
const STRICT_MODES: [&str; 2] = [STRICT_ALL_TABLES, STRICT_TRANS_TABLES];

/// How the session's sql_mode is adjusted after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlModeEdit {
    /// Add STRICT_ALL_TABLES to the current mode
    AppendStrictAll,
    /// Remove STRICT_ALL_TABLES and STRICT_TRANS_TABLES
    StripStrict,
}

/// Substrings removed for one mode token: leading `TOKEN,`, inner or
/// trailing `,TOKEN`, then a lone `TOKEN`.
fn removal_patterns(token: &str) -> [String; 3] {
    [format!("{token},"), format!(",{token}"), token.to_string()]
}

impl SqlModeEdit {
    /// `None` leaves the server default untouched.
    pub fn from_strict(strict: Option<bool>) -> Option<Self> {
        strict.map(|on| {
            if on {
                SqlModeEdit::AppendStrictAll
            } else {
                SqlModeEdit::StripStrict
            }
        })
    }

    /// SQL executed right after authentication.
    pub fn init_command(self) -> String {
        match self {
            SqlModeEdit::AppendStrictAll => format!(
                "SET SESSION sql_mode = CONCAT_WS(',', NULLIF(@@sql_mode, ''), '{}')",
                STRICT_ALL_TABLES
            ),
            SqlModeEdit::StripStrict => {
                let expr = STRICT_MODES
                    .iter()
                    .flat_map(|token| removal_patterns(token))
                    .fold("@@sql_mode".to_string(), |inner, pattern| {
                        format!("REPLACE({inner}, '{pattern}', '')")
                    });
                format!("SET SESSION sql_mode = {expr}")
            }
        }
    }

    /// Apply the same edit to `mode` locally.
    pub fn apply(self, mode: &str) -> String {
        match self {
            SqlModeEdit::AppendStrictAll if mode.is_empty() => STRICT_ALL_TABLES.to_string(),
            SqlModeEdit::AppendStrictAll => format!("{mode},{STRICT_ALL_TABLES}"),
            SqlModeEdit::StripStrict => STRICT_MODES
                .iter()
                .flat_map(|token| removal_patterns(token))
                .fold(mode.to_string(), |current, pattern| {
                    current.replace(&pattern, "")
                }),
        }
    }
}
