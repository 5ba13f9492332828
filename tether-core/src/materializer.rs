use crate::{
    AsValue, ChainError, CommandBuilder, DataSource, DesiredColumns, ExecutionToken, FromRow, Link,
    PreparedHook, PreparingHook, QueryResult, Result, RowLabeled, RowsAffected, RunState,
    StatementOptions, Value, log_error,
};
use std::{collections::HashMap, future::Future, marker::PhantomData};
use tokio_util::sync::CancellationToken;

/// Hooks registered on a chain, fired in registration order.
#[derive(Default, Clone)]
pub struct LinkEvents {
    preparing: Vec<PreparingHook>,
    prepared: Vec<PreparedHook>,
}

impl LinkEvents {
    pub fn push_preparing(&mut self, hook: PreparingHook) {
        self.preparing.push(hook);
    }
    pub fn push_prepared(&mut self, hook: PreparedHook) {
        self.prepared.push(hook);
    }
    pub fn fire_preparing(&self, options: &mut StatementOptions) {
        for hook in &self.preparing {
            hook(options);
        }
    }
    pub fn fire_prepared(&self, token: &mut ExecutionToken) {
        for hook in &self.prepared {
            hook(token);
        }
    }
}

/// Shape of the result of a materializer. `State` accumulates one run.
pub trait Collector: Send + Sync {
    type Output: Send;
    type State: Send;

    fn desired_columns(&self) -> DesiredColumns;
    fn begin(&self) -> Self::State;
    fn accept(&self, state: &mut Self::State, result: QueryResult) -> Result<()>;
    fn finish(
        &self,
        state: Self::State,
        token: &ExecutionToken,
        rows_affected: Option<RowsAffected>,
    ) -> Result<Self::Output>;
}

/// Options of the single-row materializers.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOptions {
    /// Keep the first row and ignore the others instead of failing.
    pub discard_extra_rows: bool,
}

impl RowOptions {
    pub fn discard_extra_rows() -> Self {
        Self {
            discard_extra_rows: true,
        }
    }
}

/// The root link of a chain: a command builder and the shape of its result.
pub struct Materializer<B, C> {
    builder: B,
    collector: C,
    events: LinkEvents,
}

impl<B: CommandBuilder, C: Collector> Materializer<B, C> {
    pub fn new(builder: B, collector: C) -> Self {
        Self {
            builder,
            collector,
            events: Default::default(),
        }
    }

    /// Replaces the hooks with `events`, registered elsewhere.
    pub fn with_events(mut self, events: LinkEvents) -> Self {
        self.events = events;
        self
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Builds the execution token, firing the *preparing* and *prepared* hooks.
    pub fn prepare(&self) -> Result<ExecutionToken> {
        let mut options = StatementOptions {
            strict: self.builder.data_source().config().strict_mode,
            comment: None,
        };
        self.events.fire_preparing(&mut options);
        let mut token = self
            .builder
            .prepare(self.collector.desired_columns(), &options)?;
        self.events.fire_prepared(&mut token);
        Ok(token)
    }

    /// Statement text that would run, without running it.
    pub fn sql(&self) -> Result<String> {
        let token = self.prepare()?;
        Ok(token
            .iter()
            .map(ExecutionToken::statement_text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl<B: CommandBuilder, C: Collector> Link for Materializer<B, C> {
    type Output = C::Output;

    fn data_source(&self) -> &DataSource {
        self.builder.data_source()
    }

    fn on_preparing(&mut self, hook: PreparingHook) {
        self.events.push_preparing(hook);
    }

    fn on_prepared(&mut self, hook: PreparedHook) {
        self.events.push_prepared(hook);
    }

    fn run(&self, state: &RunState) -> Result<Self::Output> {
        let token = self.prepare()?;
        let mut collected = self.collector.begin();
        let affected = self.data_source().execute(
            &token,
            &mut |result| self.collector.accept(&mut collected, result),
            state,
        )?;
        self.collector.finish(collected, &token, affected)
    }

    fn run_async<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        state: &'a RunState,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a {
        async move {
            let token = self.prepare()?;
            let mut collected = self.collector.begin();
            let affected = self
                .data_source()
                .execute_async(
                    &token,
                    &mut |result| self.collector.accept(&mut collected, result),
                    cancel,
                    state,
                )
                .await?;
            self.collector.finish(collected, &token, affected)
        }
    }
}

/// Turns a command builder into a materializer.
pub trait Materialize: CommandBuilder + Sized {
    /// Runs the statement for its side effects, the output is the affected rows.
    fn to_non_query(self) -> Materializer<Self, NonQuery> {
        Materializer::new(self, NonQuery)
    }
    /// Number of affected rows, zero when the provider reports none.
    fn to_affected(self) -> Materializer<Self, Affected> {
        Materializer::new(self, Affected)
    }
    /// First column of the first row.
    fn to_scalar<T: AsValue + Send>(self) -> Materializer<Self, Scalar<T>> {
        Materializer::new(self, Scalar(PhantomData))
    }
    fn to_object<T: FromRow + Send>(self, options: RowOptions) -> Materializer<Self, Object<T>> {
        Materializer::new(self, Object::new(options))
    }
    fn to_object_or_none<T: FromRow + Send>(
        self,
        options: RowOptions,
    ) -> Materializer<Self, ObjectOrNone<T>> {
        Materializer::new(self, ObjectOrNone(Object::new(options)))
    }
    fn to_collection<T: FromRow + Send>(self) -> Materializer<Self, Collection<T>> {
        Materializer::new(self, Collection(PhantomData))
    }
    /// The only row as a column to value map.
    fn to_row(self, options: RowOptions) -> Materializer<Self, Object<HashMap<String, Value>>> {
        Materializer::new(self, Object::new(options))
    }
    fn to_rows(self) -> Materializer<Self, Collection<RowLabeled>> {
        Materializer::new(self, Collection(PhantomData))
    }
    /// Statement text of the operation with the default options.
    fn sql(&self) -> Result<String> {
        let options = StatementOptions {
            strict: self.data_source().config().strict_mode,
            comment: None,
        };
        let token = self.prepare(DesiredColumns::All, &options)?;
        Ok(token
            .iter()
            .map(ExecutionToken::statement_text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

impl<B: CommandBuilder + Sized> Materialize for B {}

#[derive(Default, Debug, Clone, Copy)]
pub struct NonQuery;

impl Collector for NonQuery {
    type Output = RowsAffected;
    type State = ();

    fn desired_columns(&self) -> DesiredColumns {
        DesiredColumns::NoColumns
    }
    fn begin(&self) {}
    fn accept(&self, _state: &mut (), _result: QueryResult) -> Result<()> {
        Ok(())
    }
    fn finish(
        &self,
        _state: (),
        _token: &ExecutionToken,
        rows_affected: Option<RowsAffected>,
    ) -> Result<RowsAffected> {
        Ok(rows_affected.unwrap_or_default())
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct Affected;

impl Collector for Affected {
    type Output = u64;
    type State = ();

    fn desired_columns(&self) -> DesiredColumns {
        DesiredColumns::NoColumns
    }
    fn begin(&self) {}
    fn accept(&self, _state: &mut (), _result: QueryResult) -> Result<()> {
        Ok(())
    }
    fn finish(
        &self,
        _state: (),
        _token: &ExecutionToken,
        rows_affected: Option<RowsAffected>,
    ) -> Result<u64> {
        Ok(rows_affected.map(|v| v.rows_affected).unwrap_or_default())
    }
}

pub struct Scalar<T>(PhantomData<fn() -> T>);

impl<T: AsValue + Send> Collector for Scalar<T> {
    type Output = T;
    type State = Option<Value>;

    fn desired_columns(&self) -> DesiredColumns {
        DesiredColumns::All
    }
    fn begin(&self) -> Option<Value> {
        None
    }
    fn accept(&self, state: &mut Option<Value>, result: QueryResult) -> Result<()> {
        if state.is_none()
            && let QueryResult::Row(row) = result
        {
            *state = Some(row.values.into_vec().into_iter().next().unwrap_or_default());
        }
        Ok(())
    }
    /// Without rows the result is a NULL value, valid only for nullable targets.
    fn finish(
        &self,
        state: Option<Value>,
        token: &ExecutionToken,
        _rows_affected: Option<RowsAffected>,
    ) -> Result<T> {
        match state {
            Some(value) => T::try_from_value(value),
            None => T::try_from_value(T::as_empty_value()).map_err(|_| {
                ChainError::NoRows {
                    operation: token.operation_name().to_owned(),
                }
                .into()
            }),
        }
    }
}

/// First row, counting the rows that follow.
pub struct SingleRow {
    row: Option<RowLabeled>,
    count: usize,
}

pub struct Object<T> {
    options: RowOptions,
    _target: PhantomData<fn() -> T>,
}

impl<T> Object<T> {
    fn new(options: RowOptions) -> Self {
        Self {
            options,
            _target: PhantomData,
        }
    }

    fn single(&self, state: SingleRow, token: &ExecutionToken) -> Result<Option<RowLabeled>> {
        if state.count > 1 {
            if !self.options.discard_extra_rows {
                return Err(log_error!(ChainError::TooManyRows {
                    operation: token.operation_name().to_owned(),
                    rows: state.count,
                }));
            }
            log::debug!(
                "Operation `{}` discarded {} extra rows",
                token.operation_name(),
                state.count - 1
            );
        }
        Ok(state.row)
    }
}

impl<T: FromRow + Send> Collector for Object<T> {
    type Output = T;
    type State = SingleRow;

    fn desired_columns(&self) -> DesiredColumns {
        DesiredColumns::from_columns(T::columns())
    }
    fn begin(&self) -> SingleRow {
        SingleRow {
            row: None,
            count: 0,
        }
    }
    fn accept(&self, state: &mut SingleRow, result: QueryResult) -> Result<()> {
        if let QueryResult::Row(row) = result {
            state.count += 1;
            if state.row.is_none() {
                state.row = Some(row);
            }
        }
        Ok(())
    }
    fn finish(
        &self,
        state: SingleRow,
        token: &ExecutionToken,
        _rows_affected: Option<RowsAffected>,
    ) -> Result<T> {
        match self.single(state, token)? {
            Some(row) => T::from_row(row),
            None => Err(ChainError::NoRows {
                operation: token.operation_name().to_owned(),
            }
            .into()),
        }
    }
}

pub struct ObjectOrNone<T>(Object<T>);

impl<T: FromRow + Send> Collector for ObjectOrNone<T> {
    type Output = Option<T>;
    type State = SingleRow;

    fn desired_columns(&self) -> DesiredColumns {
        self.0.desired_columns()
    }
    fn begin(&self) -> SingleRow {
        self.0.begin()
    }
    fn accept(&self, state: &mut SingleRow, result: QueryResult) -> Result<()> {
        self.0.accept(state, result)
    }
    fn finish(
        &self,
        state: SingleRow,
        token: &ExecutionToken,
        _rows_affected: Option<RowsAffected>,
    ) -> Result<Option<T>> {
        self.0.single(state, token)?.map(T::from_row).transpose()
    }
}

pub struct Collection<T>(PhantomData<fn() -> T>);

impl<T: FromRow + Send> Collector for Collection<T> {
    type Output = Vec<T>;
    type State = Vec<T>;

    fn desired_columns(&self) -> DesiredColumns {
        DesiredColumns::from_columns(T::columns())
    }
    fn begin(&self) -> Vec<T> {
        Vec::new()
    }
    fn accept(&self, state: &mut Vec<T>, result: QueryResult) -> Result<()> {
        if let QueryResult::Row(row) = result {
            state.push(T::from_row(row)?);
        }
        Ok(())
    }
    fn finish(
        &self,
        state: Vec<T>,
        _token: &ExecutionToken,
        _rows_affected: Option<RowsAffected>,
    ) -> Result<Vec<T>> {
        Ok(state)
    }
}
