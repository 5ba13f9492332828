use std::sync::Arc;
use tether_core::{
    AsValue, Cacheable, Command, FromRow, QueryResult, Result, RowFields, RowLabeled,
    RowsAffected, ToRow, Value,
};

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub orders: Vec<Order>,
}

impl Customer {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.into(),
            ..Default::default()
        }
    }
}

impl ToRow for Customer {
    fn to_row(&self) -> RowFields {
        vec![
            ("id".into(), self.id.into()),
            ("name".into(), self.name.clone().into()),
            ("email".into(), self.email.clone().into()),
        ]
    }
}

impl FromRow for Customer {
    fn columns() -> &'static [&'static str] {
        &["id", "name", "email"]
    }
    fn from_row(mut row: RowLabeled) -> Result<Self> {
        Ok(Self {
            id: row.take("id")?,
            name: row.take("name")?,
            email: row.take("email")?,
            orders: Vec::new(),
        })
    }
}

impl Cacheable for Customer {}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub amount: i64,
}

impl Order {
    pub fn new(id: i64, customer_id: i64, amount: i64) -> Self {
        Self {
            id,
            customer_id,
            amount,
        }
    }
}

impl ToRow for Order {
    fn to_row(&self) -> RowFields {
        vec![
            ("id".into(), self.id.into()),
            ("customer_id".into(), self.customer_id.into()),
            ("amount".into(), self.amount.into()),
        ]
    }
}

impl FromRow for Order {
    fn columns() -> &'static [&'static str] {
        &["id", "customer_id", "amount"]
    }
    fn from_row(mut row: RowLabeled) -> Result<Self> {
        Ok(Self {
            id: row.take("id")?,
            customer_id: row.take("customer_id")?,
            amount: row.take("amount")?,
        })
    }
}

impl Cacheable for Order {}

/// Row with the given labels, the values are converted with `AsValue`.
pub fn row<const N: usize>(labels: [&str; N], values: [Value; N]) -> QueryResult {
    let labels: Arc<[String]> = labels.into_iter().map(String::from).collect();
    RowLabeled::new(labels, values.into()).into()
}

pub fn customer_row(customer: &Customer) -> QueryResult {
    row(
        ["id", "name", "email"],
        [
            customer.id.as_value(),
            customer.name.clone().as_value(),
            customer.email.clone().as_value(),
        ],
    )
}

pub fn order_row(order: &Order) -> QueryResult {
    row(
        ["id", "customer_id", "amount"],
        [
            order.id.as_value(),
            order.customer_id.as_value(),
            order.amount.as_value(),
        ],
    )
}

/// Affected rows of a multi-row insert: its parameters divided by the columns of one row.
pub fn inserted_rows(command: &Command, columns: usize) -> QueryResult {
    RowsAffected::new((command.parameters.len() / columns.max(1)) as u64).into()
}

