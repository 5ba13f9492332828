use std::{
    any::{self, Any},
    borrow::Cow,
    fmt::{self, Debug},
};
use thiserror::Error;

/// Failures raised by the chain itself, attached to [`crate::Error`].
///
/// Provider errors are never wrapped into this type: they reach the caller unchanged, except
/// when they happen while the cancellation signal is active, in which case they become
/// [`ChainError::Canceled`].
#[derive(Error, Debug)]
pub enum ChainError {
    /// A required argument is missing or malformed. Raised before any database round-trip.
    #[error("Invalid argument `{argument}`: {message}")]
    InvalidArgument {
        argument: Cow<'static, str>,
        message: Cow<'static, str>,
    },
    /// The data source was built without a cache adapter but a cache appender was requested.
    #[error("The data source `{data_source}` has no cache adapter configured")]
    MissingCache { data_source: String },
    /// A single-row materializer received no row.
    #[error("Operation `{operation}` expected one row but the result was empty")]
    NoRows { operation: String },
    /// A single-row materializer received more rows than it can accept.
    #[error(
        "Operation `{operation}` expected one row but the result had {rows} rows, discard the extra rows explicitly if this is intended"
    )]
    TooManyRows { operation: String, rows: usize },
    /// A join could not find a parent for a child.
    #[error(transparent)]
    UnmatchedChild(#[from] UnmatchedChild),
    /// The provider failed while the cancellation signal was active.
    #[error("Operation `{operation}` was canceled")]
    Canceled { operation: String },
    /// The cache returned a value that does not have the requested type.
    #[error("The cache entry `{key}` does not contain a value of type `{expected}`")]
    CacheCorruption { key: String, expected: &'static str },
    /// One row alone needs more parameters than the provider accepts in one statement.
    #[error(
        "A single row of `{table}` needs {parameters} parameters but the provider accepts at most {max_parameters}"
    )]
    BatchTooWide {
        table: String,
        parameters: usize,
        max_parameters: usize,
    },
}

impl ChainError {
    pub fn invalid_argument(
        argument: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            message: message.into(),
        }
    }
}

/// Reconciliation error carrying the child that had no matching parent.
#[derive(Error)]
#[error("Could not find a parent for the child {description}")]
pub struct UnmatchedChild {
    child: Box<dyn Any + Send + Sync>,
    child_type: &'static str,
    description: String,
}

impl UnmatchedChild {
    pub fn new<C: Debug + Send + Sync + 'static>(child: C) -> Self {
        Self {
            description: format!("{:?}", child),
            child_type: any::type_name::<C>(),
            child: Box::new(child),
        }
    }
    /// The orphan child, when `C` is its actual type.
    pub fn child<C: 'static>(&self) -> Option<&C> {
        self.child.downcast_ref::<C>()
    }
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Debug for UnmatchedChild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnmatchedChild")
            .field("child_type", &self.child_type)
            .field("child", &format_args!("{}", self.description))
            .finish()
    }
}
