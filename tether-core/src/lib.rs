mod util;

mod appender;
mod batch;
mod cache;
mod data_source;
mod error;
mod executor;
mod join;
mod link;
mod materializer;
mod operation;
mod row;
mod sql_writer;
mod table_ref;
mod token;
mod value;

pub use ::anyhow::Context;
pub use appender::*;
pub use batch::*;
pub use cache::*;
pub use data_source::*;
pub use error::*;
pub use executor::*;
pub use join::*;
pub use link::*;
pub use materializer::*;
pub use operation::*;
pub use row::*;
pub use sql_writer::*;
pub use table_ref::*;
pub use token::*;
pub use util::*;
pub use value::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;
pub use ::tokio_util::sync::CancellationToken;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
