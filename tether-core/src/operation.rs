use crate::{
    ChainError, DataSource, ExecutionToken, OrderBy, Parameter, Result, RowFields, SqlWriter,
    StatementKind, TableRef, ToRow, Value,
};
use std::{borrow::Cow, collections::HashSet};

/// Columns a materializer needs from the statement.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredColumns {
    /// Let the statement builder choose.
    #[default]
    All,
    Named(&'static [&'static str]),
    /// No result set at all.
    NoColumns,
}

impl DesiredColumns {
    pub fn from_columns(columns: &'static [&'static str]) -> Self {
        if columns.is_empty() {
            DesiredColumns::All
        } else {
            DesiredColumns::Named(columns)
        }
    }
    /// The projection list, `None` for [`DesiredColumns::NoColumns`], empty for all columns.
    pub fn columns(&self) -> Option<&'static [&'static str]> {
        match self {
            DesiredColumns::All => Some(&[]),
            DesiredColumns::Named(columns) => Some(columns),
            DesiredColumns::NoColumns => None,
        }
    }
}

/// Settings of the command builder, mutable by the *preparing* hooks of the chain.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct StatementOptions {
    pub strict: bool,
    /// Comment written in front of the statement text.
    pub comment: Option<String>,
}

/// Produces the execution token of an operation. The leaf of every chain owns one.
pub trait CommandBuilder: Send + Sync {
    fn data_source(&self) -> &DataSource;
    fn prepare(&self, columns: DesiredColumns, options: &StatementOptions)
    -> Result<ExecutionToken>;
}

/// Parameters of a statement being generated.
struct ParameterList<'w> {
    writer: &'w dyn SqlWriter,
    parameters: Vec<Parameter>,
    names: HashSet<Cow<'static, str>>,
    generated: usize,
}

impl<'w> ParameterList<'w> {
    fn new(writer: &'w dyn SqlWriter) -> Self {
        Self {
            writer,
            parameters: Vec::new(),
            names: HashSet::new(),
            generated: 0,
        }
    }
    /// Adds a generated parameter and returns its name.
    fn add(&mut self, value: Value) -> String {
        loop {
            let name = self.writer.parameter_name(self.generated);
            self.generated += 1;
            if !self.names.contains(name.as_str()) {
                self.names.insert(Cow::Owned(name.clone()));
                self.parameters.push(Parameter::new(name.clone(), value));
                return name;
            }
        }
    }
    /// Adds a caller named parameter.
    fn add_named(&mut self, parameter: Parameter) -> Result<()> {
        if parameter.name.trim().is_empty() {
            return Err(ChainError::invalid_argument("parameter", "the name is empty").into());
        }
        if !self.names.insert(parameter.name.clone()) {
            return Err(ChainError::invalid_argument(
                parameter.name.clone(),
                "the parameter is bound more than once",
            )
            .into());
        }
        self.parameters.push(parameter);
        Ok(())
    }
}

fn with_comment(text: String, writer: &dyn SqlWriter, options: &StatementOptions) -> String {
    match &options.comment {
        Some(comment) => {
            let mut out = String::with_capacity(text.len() + comment.len() + 8);
            writer.write_comment(&mut out, comment);
            out.push_str(&text);
            out
        }
        None => text,
    }
}

/// Condition of a select, update or delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every column equals its value, a NULL value compares with `IS NULL`.
    Equals(RowFields),
    /// Caller written condition with its named parameters.
    Sql {
        condition: String,
        parameters: Vec<Parameter>,
    },
}

impl Filter {
    pub fn equals(column: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Filter::Equals(vec![(column.into(), value.into())])
    }
    /// Filter object: every field of `object` must match.
    pub fn matching(object: &impl ToRow) -> Self {
        Filter::Equals(object.to_row())
    }
    pub fn sql(condition: impl Into<String>) -> Self {
        Filter::Sql {
            condition: condition.into(),
            parameters: Vec::new(),
        }
    }
    pub fn and_equals(mut self, column: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        if let Filter::Equals(fields) = &mut self {
            fields.push((column.into(), value.into()));
        }
        self
    }
    pub fn bind(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        if let Filter::Sql { parameters, .. } = &mut self {
            parameters.push(Parameter::new(name, value));
        }
        self
    }

    fn render(&self, parameters: &mut ParameterList) -> Result<String> {
        let writer = parameters.writer;
        match self {
            Filter::Equals(fields) => {
                if fields.is_empty() {
                    return Err(ChainError::invalid_argument(
                        "filter",
                        "the filter object has no column",
                    )
                    .into());
                }
                let mut out = String::new();
                for (i, (column, value)) in fields.iter().enumerate() {
                    if column.trim().is_empty() {
                        return Err(ChainError::invalid_argument(
                            "filter",
                            "the filter object has a column without name",
                        )
                        .into());
                    }
                    if i > 0 {
                        out.push_str(" AND ");
                    }
                    if value.is_null() {
                        writer.write_condition_equals(&mut out, column, None);
                    } else {
                        let name = parameters.add(value.clone());
                        writer.write_condition_equals(&mut out, column, Some(&name));
                    }
                }
                Ok(out)
            }
            Filter::Sql {
                condition,
                parameters: bound,
            } => {
                if condition.trim().is_empty() {
                    return Err(
                        ChainError::invalid_argument("filter", "the condition is empty").into(),
                    );
                }
                for parameter in bound {
                    parameters.add_named(parameter.clone())?;
                }
                Ok(condition.clone())
            }
        }
    }
}

/// Options of insert operations.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Columns left out of the statement, typically identity or computed columns.
    pub ignore_columns: Vec<Cow<'static, str>>,
}

impl WriteOptions {
    pub fn ignore(mut self, column: impl Into<Cow<'static, str>>) -> Self {
        self.ignore_columns.push(column.into());
        self
    }
    pub fn apply(&self, mut row: RowFields) -> RowFields {
        if !self.ignore_columns.is_empty() {
            row.retain(|(column, _)| !self.ignore_columns.contains(column));
        }
        row
    }
}

/// Raw SQL, one or more statements with their named parameters.
#[derive(Debug, Clone)]
pub struct SqlCall {
    data_source: DataSource,
    statements: Vec<(String, Vec<Parameter>)>,
}

impl SqlCall {
    /// Binds a parameter of the last statement.
    pub fn bind(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        if let Some((_, parameters)) = self.statements.last_mut() {
            parameters.push(Parameter::new(name, value));
        }
        self
    }
    pub fn bind_parameter(mut self, parameter: Parameter) -> Self {
        if let Some((_, parameters)) = self.statements.last_mut() {
            parameters.push(parameter);
        }
        self
    }
    /// Adds a statement run after the previous ones.
    pub fn then(mut self, text: impl Into<String>) -> Self {
        self.statements.push((text.into(), Vec::new()));
        self
    }
}

impl CommandBuilder for SqlCall {
    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn prepare(&self, _columns: DesiredColumns, options: &StatementOptions) -> Result<ExecutionToken> {
        let writer = self.data_source.executor().sql_writer();
        let mut result: Option<ExecutionToken> = None;
        for (i, (text, bound)) in self.statements.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(ChainError::invalid_argument("sql", "the statement is empty").into());
            }
            let mut parameters = ParameterList::new(writer);
            for parameter in bound {
                parameters.add_named(parameter.clone())?;
            }
            let text = if i == 0 {
                with_comment(text.clone(), writer, options)
            } else {
                text.clone()
            };
            let token = ExecutionToken::new("sql", text, parameters.parameters, StatementKind::Text);
            result = Some(match result {
                Some(head) => head.then(token),
                None => token,
            });
        }
        result.ok_or_else(|| ChainError::invalid_argument("sql", "there is no statement").into())
    }
}

/// Stored procedure call.
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    data_source: DataSource,
    name: String,
    parameters: Vec<Parameter>,
}

impl ProcedureCall {
    pub fn bind(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        self.parameters.push(Parameter::new(name, value));
        self
    }
    pub fn bind_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl CommandBuilder for ProcedureCall {
    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn prepare(&self, _columns: DesiredColumns, _options: &StatementOptions) -> Result<ExecutionToken> {
        if self.name.trim().is_empty() {
            return Err(
                ChainError::invalid_argument("procedure", "the procedure name is empty").into(),
            );
        }
        let mut parameters = ParameterList::new(self.data_source.executor().sql_writer());
        for parameter in &self.parameters {
            parameters.add_named(parameter.clone())?;
        }
        Ok(ExecutionToken::new(
            format!("call {}", self.name),
            self.name.clone(),
            parameters.parameters,
            StatementKind::StoredProcedure,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct Select {
    data_source: DataSource,
    table: TableRef,
    filter: Option<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by.push(order_by);
        self
    }
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl CommandBuilder for Select {
    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn prepare(&self, columns: DesiredColumns, options: &StatementOptions) -> Result<ExecutionToken> {
        self.table.validate()?;
        let Some(columns) = columns.columns() else {
            return Err(ChainError::invalid_argument(
                "columns",
                "a select must produce a result set",
            )
            .into());
        };
        let writer = self.data_source.executor().sql_writer();
        let mut parameters = ParameterList::new(writer);
        let condition = self
            .filter
            .as_ref()
            .map(|v| v.render(&mut parameters))
            .transpose()?;
        let mut text = String::with_capacity(256);
        writer.write_select(
            &mut text,
            &self.table,
            columns,
            condition.as_deref(),
            &self.order_by,
            self.limit,
            self.offset,
        );
        Ok(ExecutionToken::new(
            format!("select from {}", self.table),
            with_comment(text, writer, options),
            parameters.parameters,
            StatementKind::Text,
        ))
    }
}

/// Insert of one or more rows in a single statement.
#[derive(Debug, Clone)]
pub struct Insert {
    data_source: DataSource,
    table: TableRef,
    rows: Vec<RowFields>,
    options: WriteOptions,
}

impl Insert {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl CommandBuilder for Insert {
    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn prepare(&self, columns: DesiredColumns, options: &StatementOptions) -> Result<ExecutionToken> {
        self.table.validate()?;
        let rows = self
            .rows
            .iter()
            .map(|v| self.options.apply(v.clone()))
            .collect::<Vec<_>>();
        let Some(first) = rows.first() else {
            return Err(ChainError::invalid_argument("rows", "there is no row to insert").into());
        };
        if first.is_empty() {
            return Err(ChainError::invalid_argument("rows", "the row has no column").into());
        }
        let names = first.iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>();
        let uneven = rows.iter().any(|row| {
            row.len() != names.len()
                || row
                    .iter()
                    .zip(&names)
                    .any(|((k, _), n)| k.as_ref() != n.as_str())
        });
        if uneven {
            return Err(ChainError::invalid_argument(
                "rows",
                "every row of a multi-row insert must have the same columns",
            )
            .into());
        }
        let writer = self.data_source.executor().sql_writer();
        let mut parameters = ParameterList::new(writer);
        let placeholders = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(_, v)| parameters.add(v))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let names = names.iter().map(String::as_str).collect::<Vec<_>>();
        let mut text = String::with_capacity(128 + placeholders.len() * names.len() * 6);
        writer.write_insert(
            &mut text,
            &self.table,
            &names,
            &placeholders,
            columns.columns(),
        );
        Ok(ExecutionToken::new(
            format!("insert into {}", self.table),
            with_comment(text, writer, options),
            parameters.parameters,
            StatementKind::Text,
        ))
    }
}

fn refuse_unfiltered(
    operation: &'static str,
    filter: Option<&Filter>,
    options: &StatementOptions,
) -> Result<()> {
    if filter.is_none() && options.strict {
        return Err(ChainError::invalid_argument(
            "filter",
            format!("strict mode refuses {} without a filter", operation),
        )
        .into());
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum UpdateSource {
    /// Key columns of the object become the filter, the rest is the new values.
    Object {
        row: RowFields,
        key_columns: Vec<Cow<'static, str>>,
    },
    Values {
        values: RowFields,
        filter: Option<Filter>,
    },
}

#[derive(Debug, Clone)]
pub struct Update {
    data_source: DataSource,
    table: TableRef,
    source: UpdateSource,
}

impl Update {
    fn split(&self) -> Result<(RowFields, Option<Filter>)> {
        match &self.source {
            UpdateSource::Values { values, filter } => Ok((values.clone(), filter.clone())),
            UpdateSource::Object { row, key_columns } => {
                if key_columns.is_empty() {
                    return Err(ChainError::invalid_argument(
                        "key_columns",
                        "an update by object needs at least one key column",
                    )
                    .into());
                }
                let (keys, values): (RowFields, RowFields) = row
                    .iter()
                    .cloned()
                    .partition(|(column, _)| key_columns.contains(column));
                if let Some(missing) = key_columns
                    .iter()
                    .find(|k| !keys.iter().any(|(column, _)| column == *k))
                {
                    return Err(ChainError::invalid_argument(
                        "key_columns",
                        format!("the object has no column `{}`", missing),
                    )
                    .into());
                }
                Ok((values, Some(Filter::Equals(keys))))
            }
        }
    }
}

impl CommandBuilder for Update {
    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn prepare(&self, columns: DesiredColumns, options: &StatementOptions) -> Result<ExecutionToken> {
        self.table.validate()?;
        let (values, filter) = self.split()?;
        if values.is_empty() {
            return Err(ChainError::invalid_argument("values", "there is no column to set").into());
        }
        refuse_unfiltered("an UPDATE", filter.as_ref(), options)?;
        let writer = self.data_source.executor().sql_writer();
        let mut parameters = ParameterList::new(writer);
        let set = values
            .into_iter()
            .map(|(column, value)| (column, parameters.add(value)))
            .collect::<Vec<_>>();
        let condition = filter
            .as_ref()
            .map(|v| v.render(&mut parameters))
            .transpose()?;
        let set = set
            .iter()
            .map(|(column, parameter)| (column.as_ref(), parameter.clone()))
            .collect::<Vec<_>>();
        let mut text = String::with_capacity(256);
        writer.write_update(
            &mut text,
            &self.table,
            &set,
            condition.as_deref(),
            columns.columns(),
        );
        Ok(ExecutionToken::new(
            format!("update {}", self.table),
            with_comment(text, writer, options),
            parameters.parameters,
            StatementKind::Text,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct Delete {
    data_source: DataSource,
    table: TableRef,
    filter: Option<Filter>,
}

impl CommandBuilder for Delete {
    fn data_source(&self) -> &DataSource {
        &self.data_source
    }
    fn prepare(&self, columns: DesiredColumns, options: &StatementOptions) -> Result<ExecutionToken> {
        self.table.validate()?;
        refuse_unfiltered("a DELETE", self.filter.as_ref(), options)?;
        let writer = self.data_source.executor().sql_writer();
        let mut parameters = ParameterList::new(writer);
        let condition = self
            .filter
            .as_ref()
            .map(|v| v.render(&mut parameters))
            .transpose()?;
        let mut text = String::with_capacity(128);
        writer.write_delete(
            &mut text,
            &self.table,
            condition.as_deref(),
            columns.columns(),
        );
        Ok(ExecutionToken::new(
            format!("delete from {}", self.table),
            with_comment(text, writer, options),
            parameters.parameters,
            StatementKind::Text,
        ))
    }
}

/// Operations of a data source. Nothing touches the database until the chain is executed.
impl DataSource {
    /// Raw SQL statement, more statements can follow with [`SqlCall::then`].
    pub fn sql(&self, text: impl Into<String>) -> SqlCall {
        SqlCall {
            data_source: self.clone(),
            statements: vec![(text.into(), Vec::new())],
        }
    }

    /// Several raw SQL statements run in order as one operation.
    pub fn sql_batch<S: Into<String>>(&self, texts: impl IntoIterator<Item = S>) -> SqlCall {
        SqlCall {
            data_source: self.clone(),
            statements: texts.into_iter().map(|v| (v.into(), Vec::new())).collect(),
        }
    }

    pub fn procedure(&self, name: impl Into<String>) -> ProcedureCall {
        ProcedureCall {
            data_source: self.clone(),
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn from(&self, table: impl Into<TableRef>) -> Select {
        Select {
            data_source: self.clone(),
            table: table.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn insert(
        &self,
        table: impl Into<TableRef>,
        object: &impl ToRow,
        options: WriteOptions,
    ) -> Insert {
        Insert {
            data_source: self.clone(),
            table: table.into(),
            rows: vec![object.to_row()],
            options,
        }
    }

    /// Multi-row insert in one statement, the caller is responsible for the provider limits.
    pub fn insert_batch<'a, T: ToRow + 'a>(
        &self,
        table: impl Into<TableRef>,
        objects: impl IntoIterator<Item = &'a T>,
        options: WriteOptions,
    ) -> Insert {
        Insert {
            data_source: self.clone(),
            table: table.into(),
            rows: objects.into_iter().map(ToRow::to_row).collect(),
            options,
        }
    }

    /// Updates the row identified by `key_columns` of `object` with its other columns.
    pub fn update(
        &self,
        table: impl Into<TableRef>,
        object: &impl ToRow,
        key_columns: &[&'static str],
    ) -> Update {
        Update {
            data_source: self.clone(),
            table: table.into(),
            source: UpdateSource::Object {
                row: object.to_row(),
                key_columns: key_columns.iter().map(|v| Cow::Borrowed(*v)).collect(),
            },
        }
    }

    /// Sets `values` on the rows matching `filter`.
    pub fn update_set(
        &self,
        table: impl Into<TableRef>,
        values: RowFields,
        filter: Option<Filter>,
    ) -> Update {
        Update {
            data_source: self.clone(),
            table: table.into(),
            source: UpdateSource::Values { values, filter },
        }
    }

    /// Deletes the rows matching `filter`, strict mode refuses `None`.
    pub fn delete(&self, table: impl Into<TableRef>, filter: Option<Filter>) -> Delete {
        Delete {
            data_source: self.clone(),
            table: table.into(),
            filter,
        }
    }
}
