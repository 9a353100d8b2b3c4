//! Raw statement results.
//!
//! Rows are kept as the server sent them in the text protocol: one optional
//! byte string per column. Type decoding belongs to the caller.

use crate::protocol::OkPacket;

/// Column metadata from a result set header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// A text column with only a name, as returned by `SHOW` statements.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            schema: String::new(),
            table: String::new(),
            org_name: name.clone(),
            name,
            charset: 33,
            column_length: 0,
            // MYSQL_TYPE_VAR_STRING
            column_type: 0xFD,
            flags: 0,
            decimals: 0,
        }
    }
}

/// One cell; `None` is SQL NULL.
pub type Cell = Option<Vec<u8>>;

/// Rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row built from UTF-8 text cells.
    pub fn with_text_row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        self.rows.push(
            cells
                .into_iter()
                .map(|cell| cell.map(|s| s.as_ref().as_bytes().to_vec()))
                .collect(),
        );
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the column named `name` (case-insensitive, as MySQL
    /// compares column labels).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Raw value of `column` in `row`. NULL cells and unknown columns both
    /// yield `None`.
    pub fn value(&self, row: usize, column: &str) -> Option<&[u8]> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    /// Value as text, with invalid UTF-8 replaced.
    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        self.value(row, column)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// What the server returned for one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// A statement without rows (INSERT, UPDATE, DELETE, DDL, SET)
    Done(OkPacket),
    /// A statement that produced rows
    Rows(ResultSet),
}

impl QueryResult {
    /// Rows changed by a `Done` result, or rows returned by a `Rows` result.
    pub fn affected_rows(&self) -> u64 {
        match self {
            QueryResult::Done(ok) => ok.affected_rows,
            QueryResult::Rows(rs) => rs.len() as u64,
        }
    }

    pub fn rows(&self) -> Option<&ResultSet> {
        match self {
            QueryResult::Rows(rs) => Some(rs),
            QueryResult::Done(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<ResultSet> {
        match self {
            QueryResult::Rows(rs) => Some(rs),
            QueryResult::Done(_) => None,
        }
    }
}
