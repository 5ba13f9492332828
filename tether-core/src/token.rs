use crate::{RowsAffected, Value};
use std::{
    borrow::Cow,
    fmt::{self, Debug},
    sync::Arc,
    time::Duration,
};

/// Direction of a statement parameter.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// A named statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: Cow<'static, str>,
    pub value: Value,
    pub direction: ParameterDirection,
    /// Provider specific type name, when the provider cannot infer it from the value.
    pub provider_type: Option<Cow<'static, str>>,
}

impl Parameter {
    pub fn new(name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            direction: ParameterDirection::Input,
            provider_type: None,
        }
    }
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }
    pub fn with_provider_type(mut self, provider_type: impl Into<Cow<'static, str>>) -> Self {
        self.provider_type = Some(provider_type.into());
        self
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    #[default]
    Text,
    StoredProcedure,
}

/// The physical command handed to the `Executor`, built from one token right before running.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<Parameter>,
    pub kind: StatementKind,
    pub timeout: Option<Duration>,
    /// Free form annotations (tracing ids, application name) providers may forward.
    pub tags: Vec<(Cow<'static, str>, String)>,
}

/// Payload of the *command executed* notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandExecuted {
    pub rows_affected: Option<RowsAffected>,
}

pub type CommandBuiltHook = Arc<dyn Fn(&mut Command) + Send + Sync>;
pub type CommandExecutedHook = Arc<dyn Fn(&CommandExecuted) + Send + Sync>;

/// Immutable description of one prepared statement.
///
/// Operations compiled into several physical statements chain their tokens through
/// [`ExecutionToken::then`]; the data source runs them in order. A token lives for one run.
#[derive(Clone)]
pub struct ExecutionToken {
    operation_name: Cow<'static, str>,
    statement_text: String,
    parameters: Vec<Parameter>,
    kind: StatementKind,
    command_built: Vec<CommandBuiltHook>,
    command_executed: Vec<CommandExecutedHook>,
    next: Option<Box<ExecutionToken>>,
}

impl ExecutionToken {
    pub fn new(
        operation_name: impl Into<Cow<'static, str>>,
        statement_text: String,
        parameters: Vec<Parameter>,
        kind: StatementKind,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            statement_text,
            parameters,
            kind,
            command_built: Vec::new(),
            command_executed: Vec::new(),
            next: None,
        }
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }
    pub fn statement_text(&self) -> &str {
        &self.statement_text
    }
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
    pub fn kind(&self) -> StatementKind {
        self.kind
    }
    pub fn next(&self) -> Option<&ExecutionToken> {
        self.next.as_deref()
    }

    /// Appends `next` at the end of the chain.
    pub fn then(mut self, next: ExecutionToken) -> Self {
        let mut tail = &mut self.next;
        while let Some(token) = tail {
            tail = &mut token.next;
        }
        *tail = Some(Box::new(next));
        self
    }

    /// Iterates the physical statements of this operation.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionToken> {
        std::iter::successors(Some(self), |v| v.next())
    }

    /// Registers a hook on every statement of the chain.
    pub fn on_command_built(&mut self, hook: CommandBuiltHook) {
        let mut current = Some(self);
        while let Some(token) = current {
            token.command_built.push(hook.clone());
            current = token.next.as_deref_mut();
        }
    }

    /// Registers a hook on every statement of the chain.
    pub fn on_command_executed(&mut self, hook: CommandExecutedHook) {
        let mut current = Some(self);
        while let Some(token) = current {
            token.command_executed.push(hook.clone());
            current = token.next.as_deref_mut();
        }
    }

    /// Builds the physical command of this statement only, firing *command built*.
    pub fn build_command(&self, timeout: Option<Duration>) -> Command {
        let mut command = Command {
            text: self.statement_text.clone(),
            parameters: self.parameters.clone(),
            kind: self.kind,
            timeout,
            tags: Vec::new(),
        };
        for hook in &self.command_built {
            hook(&mut command);
        }
        command
    }

    pub fn fire_command_executed(&self, rows_affected: Option<RowsAffected>) {
        let executed = CommandExecuted { rows_affected };
        for hook in &self.command_executed {
            hook(&executed);
        }
    }
}

impl Debug for ExecutionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionToken")
            .field("operation_name", &self.operation_name)
            .field("statement_text", &self.statement_text)
            .field("parameters", &self.parameters)
            .field("kind", &self.kind)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn chained_tokens_share_hooks() {
        let mut token = ExecutionToken::new("first", "A".into(), vec![], StatementKind::Text)
            .then(ExecutionToken::new("second", "B".into(), vec![], StatementKind::Text))
            .then(ExecutionToken::new("third", "C".into(), vec![], StatementKind::Text));
        assert_eq!(
            token.iter().map(|v| v.statement_text()).collect::<Vec<_>>(),
            ["A", "B", "C"]
        );
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        token.on_command_built(Arc::new(move |command| {
            counter.fetch_add(1, Ordering::Relaxed);
            command.timeout = Some(Duration::from_secs(3));
        }));
        let commands = token
            .iter()
            .map(|v| v.build_command(None))
            .collect::<Vec<_>>();
        assert_eq!(built.load(Ordering::Relaxed), 3);
        assert!(commands
            .iter()
            .all(|v| v.timeout == Some(Duration::from_secs(3))));
    }
}
