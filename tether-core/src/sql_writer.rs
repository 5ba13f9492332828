use crate::{TableRef, separated_by};
use std::fmt::Write;

macro_rules! write_integer {
    ($out:ident, $value:expr) => {{
        let mut buffer = itoa::Buffer::new();
        $out.push_str(buffer.format($value));
    }};
}

/// Ordering term of a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Dialect printer turning operations into statement text.
///
/// The default methods produce a generic, parameterized SQL (`@p0` placeholders, double quoted
/// identifiers, `LIMIT`/`OFFSET`, `RETURNING`). Drivers override what their dialect does
/// differently. Parameter values never appear in the text.
pub trait SqlWriter: Send + Sync {
    /// Escape occurrences of `search` char with `replace` while copying into buffer.
    fn write_escaped(&self, out: &mut String, value: &str, search: char, replace: &str) {
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == search {
                out.push_str(&value[position..i]);
                out.push_str(replace);
                position = i + c.len_utf8();
            }
        }
        out.push_str(&value[position..]);
    }

    /// Quote identifiers ("name") doubling inner quotes.
    fn write_identifier_quoted(&self, out: &mut String, value: &str) {
        out.push('"');
        self.write_escaped(out, value, '"', "\"\"");
        out.push('"');
    }

    fn write_table_ref(&self, out: &mut String, value: &TableRef) {
        if !value.schema.is_empty() {
            self.write_identifier_quoted(out, &value.schema);
            out.push('.');
        }
        self.write_identifier_quoted(out, &value.name);
    }

    /// Name of the `index`-th generated parameter.
    fn parameter_name(&self, index: usize) -> String {
        let mut out = String::with_capacity(6);
        out.push_str("@p");
        write_integer!(out, index);
        out
    }

    /// How a parameter name is referenced inside the statement text.
    fn write_parameter(&self, out: &mut String, name: &str) {
        out.push_str(name);
    }

    fn write_comment(&self, out: &mut String, comment: &str) {
        out.push_str("/* ");
        out.push_str(&comment.replace("*/", "* /"));
        out.push_str(" */\n");
    }

    /// Projection list, `*` when `columns` is empty.
    fn write_columns(&self, out: &mut String, columns: &[&str]) {
        if columns.is_empty() {
            out.push('*');
            return;
        }
        separated_by(
            out,
            columns,
            |out, v| self.write_identifier_quoted(out, v),
            ", ",
        );
    }

    /// `column = @p` or `column IS NULL` when there is no parameter.
    fn write_condition_equals(&self, out: &mut String, column: &str, parameter: Option<&str>) {
        self.write_identifier_quoted(out, column);
        match parameter {
            Some(parameter) => {
                out.push_str(" = ");
                self.write_parameter(out, parameter);
            }
            None => out.push_str(" IS NULL"),
        }
    }

    fn write_order_by(&self, out: &mut String, order_by: &[OrderBy]) {
        if order_by.is_empty() {
            return;
        }
        out.push_str("\nORDER BY ");
        separated_by(
            out,
            order_by,
            |out, v| {
                self.write_identifier_quoted(out, &v.column);
                out.push_str(if v.descending { " DESC" } else { " ASC" });
            },
            ", ",
        );
    }

    fn write_limit_offset(&self, out: &mut String, limit: Option<u64>, offset: Option<u64>) {
        if let Some(limit) = limit {
            out.push_str("\nLIMIT ");
            write_integer!(out, limit);
        }
        if let Some(offset) = offset {
            let _ = write!(out, "\nOFFSET {}", offset);
        }
    }

    fn write_returning(&self, out: &mut String, columns: &[&str]) {
        out.push_str("\nRETURNING ");
        self.write_columns(out, columns);
    }

    fn write_select(
        &self,
        out: &mut String,
        table: &TableRef,
        columns: &[&str],
        condition: Option<&str>,
        order_by: &[OrderBy],
        limit: Option<u64>,
        offset: Option<u64>,
    ) {
        out.push_str("SELECT ");
        self.write_columns(out, columns);
        out.push_str("\nFROM ");
        self.write_table_ref(out, table);
        if let Some(condition) = condition {
            out.push_str("\nWHERE ");
            out.push_str(condition);
        }
        self.write_order_by(out, order_by);
        self.write_limit_offset(out, limit, offset);
        out.push(';');
    }

    /// Multi-row insert, one parameter list per row, aligned with `columns`.
    fn write_insert(
        &self,
        out: &mut String,
        table: &TableRef,
        columns: &[&str],
        rows: &[Vec<String>],
        returning: Option<&[&str]>,
    ) {
        out.push_str("INSERT INTO ");
        self.write_table_ref(out, table);
        out.push_str(" (");
        separated_by(
            out,
            columns,
            |out, v| self.write_identifier_quoted(out, v),
            ", ",
        );
        out.push_str(") VALUES\n");
        separated_by(
            out,
            rows,
            |out, row| {
                out.push('(');
                separated_by(out, row, |out, v| self.write_parameter(out, v), ", ");
                out.push(')');
            },
            ",\n",
        );
        if let Some(returning) = returning {
            self.write_returning(out, returning);
        }
        out.push(';');
    }

    /// `set` pairs each column with the parameter holding its new value.
    fn write_update(
        &self,
        out: &mut String,
        table: &TableRef,
        set: &[(&str, String)],
        condition: Option<&str>,
        returning: Option<&[&str]>,
    ) {
        out.push_str("UPDATE ");
        self.write_table_ref(out, table);
        out.push_str(" SET\n");
        separated_by(
            out,
            set,
            |out, (column, parameter)| {
                self.write_identifier_quoted(out, column);
                out.push_str(" = ");
                self.write_parameter(out, parameter);
            },
            ",\n",
        );
        if let Some(condition) = condition {
            out.push_str("\nWHERE ");
            out.push_str(condition);
        }
        if let Some(returning) = returning {
            self.write_returning(out, returning);
        }
        out.push(';');
    }

    fn write_delete(
        &self,
        out: &mut String,
        table: &TableRef,
        condition: Option<&str>,
        returning: Option<&[&str]>,
    ) {
        out.push_str("DELETE FROM ");
        self.write_table_ref(out, table);
        if let Some(condition) = condition {
            out.push_str("\nWHERE ");
            out.push_str(condition);
        }
        if let Some(returning) = returning {
            self.write_returning(out, returning);
        }
        out.push(';');
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct GenericSqlWriter;

impl GenericSqlWriter {
    pub const fn new() -> Self {
        Self {}
    }
}

impl SqlWriter for GenericSqlWriter {}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const WRITER: GenericSqlWriter = GenericSqlWriter::new();

    #[test]
    fn select() {
        let mut out = String::new();
        WRITER.write_select(
            &mut out,
            &TableRef::new("orders").with_schema("sales"),
            &["id", "total"],
            Some("\"total\" > @min"),
            &[OrderBy::desc("total")],
            Some(10),
            Some(20),
        );
        assert_eq!(
            out,
            indoc! {r#"
                SELECT "id", "total"
                FROM "sales"."orders"
                WHERE "total" > @min
                ORDER BY "total" DESC
                LIMIT 10
                OFFSET 20;
            "#}
            .trim()
        );
    }

    #[test]
    fn insert_rows() {
        let mut out = String::new();
        WRITER.write_insert(
            &mut out,
            &TableRef::new("my\"table"),
            &["a", "b"],
            &[
                vec!["@p0".into(), "@p1".into()],
                vec!["@p2".into(), "@p3".into()],
            ],
            Some(&[]),
        );
        assert_eq!(
            out,
            indoc! {r#"
                INSERT INTO "my""table" ("a", "b") VALUES
                (@p0, @p1),
                (@p2, @p3)
                RETURNING *;
            "#}
            .trim()
        );
    }

    #[test]
    fn parameter_names() {
        assert_eq!(WRITER.parameter_name(0), "@p0");
        assert_eq!(WRITER.parameter_name(137), "@p137");
    }
}
