use crate::{ChainError, Result};
use std::{
    borrow::Cow,
    fmt::{self, Display},
};

/// Name of the table (or view) an operation targets.
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub name: Cow<'static, str>,
    pub schema: Cow<'static, str>,
}

impl TableRef {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            schema: Cow::Borrowed(""),
        }
    }
    pub fn with_schema(mut self, schema: impl Into<Cow<'static, str>>) -> Self {
        self.schema = schema.into();
        self
    }
    pub fn full_name(&self) -> String {
        let mut result = String::new();
        if !self.schema.is_empty() {
            result.push_str(&self.schema);
            result.push('.');
        }
        result.push_str(&self.name);
        result
    }
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ChainError::invalid_argument("table", "the table name is empty").into());
        }
        Ok(())
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.schema.is_empty() {
            write!(f, "{}.", self.schema)?;
        }
        f.write_str(&self.name)
    }
}

impl From<&'static str> for TableRef {
    fn from(value: &'static str) -> Self {
        match value.split_once('.') {
            Some((schema, name)) => TableRef::new(name).with_schema(schema),
            None => TableRef::new(value),
        }
    }
}

impl From<String> for TableRef {
    fn from(value: String) -> Self {
        match value.split_once('.') {
            Some((schema, name)) => TableRef::new(name.to_owned()).with_schema(schema.to_owned()),
            None => TableRef::new(value),
        }
    }
}
