//! Typed statements issued by the harness.
//!
//! Every statement targets a two-column table: an integer primary key and an
//! integer value. The MySQL frontend renders statements to SQL text; the mock
//! frontend interprets them directly.

use std::fmt;

/// A two-column table: `(key BIGINT PRIMARY KEY, value BIGINT)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Primary-key column.
    pub key_column: &'static str,
    /// Value column.
    pub value_column: &'static str,
}

impl Table {
    /// Key/value table with columns `c1`, `c2`.
    pub fn key_value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: "c1",
            value_column: "c2",
        }
    }

    /// Account table with columns `id`, `money`.
    pub fn accounts(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: "id",
            value_column: "money",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// One statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Create the table (fails with "already exists" if present).
    CreateTable(Table),
    /// Drop the table if it exists.
    DropTable(Table),
    /// Insert one row.
    Insert {
        /// Target table.
        table: Table,
        /// Primary key.
        key: i64,
        /// Value.
        value: i64,
    },
    /// Set the value of one row.
    SetValue {
        /// Target table.
        table: Table,
        /// Primary key.
        key: i64,
        /// New value.
        value: i64,
    },
    /// Add `delta` (possibly negative) to the value of one row.
    AddValue {
        /// Target table.
        table: Table,
        /// Primary key.
        key: i64,
        /// Amount added.
        delta: i64,
    },
    /// Delete one row.
    Delete {
        /// Target table.
        table: Table,
        /// Primary key.
        key: i64,
    },
    /// Every row, ordered by key.
    SelectAll(Table),
    /// The row with `key` if its value is at least `amount`, locked for update.
    SelectFunded {
        /// Target table.
        table: Table,
        /// Primary key.
        key: i64,
        /// Minimum value.
        amount: i64,
    },
}

impl Statement {
    /// Table the statement targets.
    pub fn table(&self) -> &Table {
        match self {
            Statement::CreateTable(t) | Statement::DropTable(t) | Statement::SelectAll(t) => t,
            Statement::Insert { table, .. }
            | Statement::SetValue { table, .. }
            | Statement::AddValue { table, .. }
            | Statement::Delete { table, .. }
            | Statement::SelectFunded { table, .. } => table,
        }
    }

    /// Whether the statement returns rows.
    pub fn is_query(&self) -> bool {
        matches!(self, Statement::SelectAll(_) | Statement::SelectFunded { .. })
    }

    /// Short name for logs.
    pub fn verb(&self) -> &'static str {
        match self {
            Statement::CreateTable(_) => "create table",
            Statement::DropTable(_) => "drop table",
            Statement::Insert { .. } => "insert",
            Statement::SetValue { .. } | Statement::AddValue { .. } => "update",
            Statement::Delete { .. } => "delete",
            Statement::SelectAll(_) | Statement::SelectFunded { .. } => "select",
        }
    }

    /// MySQL text for this statement.
    pub fn to_sql(&self) -> String {
        match self {
            Statement::CreateTable(t) => format!(
                "CREATE TABLE {} ({k} BIGINT NOT NULL, {v} BIGINT NOT NULL, PRIMARY KEY ({k}))",
                t.name,
                k = t.key_column,
                v = t.value_column
            ),
            Statement::DropTable(t) => format!("DROP TABLE IF EXISTS {}", t.name),
            Statement::Insert { table, key, value } => format!(
                "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                table.name, table.key_column, table.value_column, key, value
            ),
            Statement::SetValue { table, key, value } => format!(
                "UPDATE {} SET {} = {} WHERE {} = {}",
                table.name, table.value_column, value, table.key_column, key
            ),
            Statement::AddValue { table, key, delta } => format!(
                "UPDATE {t} SET {v} = {v} + ({d}) WHERE {k} = {key}",
                t = table.name,
                v = table.value_column,
                d = delta,
                k = table.key_column,
                key = key
            ),
            Statement::Delete { table, key } => format!(
                "DELETE FROM {} WHERE {} = {}",
                table.name, table.key_column, key
            ),
            Statement::SelectAll(t) => format!(
                "SELECT {k}, {v} FROM {t} ORDER BY {k}",
                k = t.key_column,
                v = t.value_column,
                t = t.name
            ),
            Statement::SelectFunded { table, key, amount } => format!(
                "SELECT {k}, {v} FROM {t} WHERE {k} = {key} AND {v} >= {amount} FOR UPDATE",
                k = table.key_column,
                v = table.value_column,
                t = table.name,
                key = key,
                amount = amount
            ),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.verb(), self.table())
    }
}
