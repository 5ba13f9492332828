use crate::{AsValue, ChainError, Result, Value};
use std::{borrow::Cow, collections::HashMap, sync::Arc};

/// Metadata about modify operations (INSERT/UPDATE/DELETE).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsAffected {
    /// Total number of rows impacted.
    pub rows_affected: u64,
    /// Backend-specific last inserted / affected identifier when available.
    pub last_affected_id: Option<i64>,
}

impl RowsAffected {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_affected_id: None,
        }
    }
}

impl Extend<RowsAffected> for RowsAffected {
    fn extend<T: IntoIterator<Item = RowsAffected>>(&mut self, iter: T) {
        for elem in iter {
            self.rows_affected += elem.rows_affected;
            if elem.last_affected_id.is_some() {
                self.last_affected_id = elem.last_affected_id;
            }
        }
    }
}

/// Shared reference-counted column name list.
pub type RowNames = Arc<[String]>;
/// Owned row value slice matching `RowNames` length.
pub type Row = Box<[Value]>;

/// A result row with its corresponding column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLabeled {
    /// Column names.
    pub labels: RowNames,
    /// Data values (aligned by index with `labels`).
    pub values: Row,
}

impl RowLabeled {
    pub fn new(labels: RowNames, values: Row) -> Self {
        Self { labels, values }
    }
    pub fn names(&self) -> &[String] {
        &self.labels
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn get_column(&self, name: &str) -> Option<&Value> {
        self.labels
            .iter()
            .position(|v| v == name)
            .map(|i| &self.values()[i])
    }
    /// Removes the value of the column `name` and converts it, erroring when it is missing.
    pub fn take<T: AsValue>(&mut self, name: &str) -> Result<T> {
        let Some(i) = self.labels.iter().position(|v| v == name) else {
            return Err(ChainError::invalid_argument(
                name.to_owned(),
                "the row does not contain this column",
            )
            .into());
        };
        T::try_from_value(std::mem::take(&mut self.values[i]))
    }
    pub fn into_map(self) -> HashMap<String, Value> {
        self.labels
            .iter()
            .cloned()
            .zip(self.values.into_vec())
            .collect()
    }
}

/// Heterogeneous items produced by an `Executor` combining rows and modify results.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// A labeled row.
    Row(RowLabeled),
    /// A modify effect aggregation.
    Affected(RowsAffected),
}

impl From<RowLabeled> for QueryResult {
    fn from(value: RowLabeled) -> Self {
        QueryResult::Row(value)
    }
}

impl From<RowsAffected> for QueryResult {
    fn from(value: RowsAffected) -> Self {
        QueryResult::Affected(value)
    }
}

/// Ordered `(column, value)` pairs describing the columns an object writes.
pub type RowFields = Vec<(Cow<'static, str>, Value)>;

/// An object that can be written by insert and update operations.
///
/// The order of the returned fields is the column order of the generated statement and it
/// must not depend on the values: batch inserts sample one object to size the batches.
pub trait ToRow {
    fn to_row(&self) -> RowFields;
}

impl ToRow for RowFields {
    fn to_row(&self) -> RowFields {
        self.clone()
    }
}

/// An object that can be materialized from a result row.
pub trait FromRow: Sized {
    /// Columns to project. Empty lets the statement builder choose (`*`).
    fn columns() -> &'static [&'static str] {
        &[]
    }
    fn from_row(row: RowLabeled) -> Result<Self>;
}

impl FromRow for RowLabeled {
    fn from_row(row: RowLabeled) -> Result<Self> {
        Ok(row)
    }
}

impl FromRow for HashMap<String, Value> {
    fn from_row(row: RowLabeled) -> Result<Self> {
        Ok(row.into_map())
    }
}
