//! Async client for InterMine webservices.
//!
//! ```no_run
//! # async fn run() -> Result<(), intermine_client::ClientError> {
//! use std::time::Duration;
//! use intermine_client::{Operator, ServiceConnection};
//!
//! let service = ServiceConnection::connect("https://www.flymine.org/flymine/service", None, Duration::from_secs(30))?;
//!
//! let mut builder = service.new_query().await?;
//! builder.add_view_str("Gene.symbol Gene.length")?;
//! builder.add_constraint("Gene.symbol", Operator::Eq, "zen")?;
//! let query = builder.build()?;
//!
//! let mut rows = service.execute(&query).await?;
//! while let Some(row) = rows.next_row().await {
//!     println!("{:?}", row?.values());
//! }
//! # Ok(())
//! # }
//! ```
mod builder;
mod client;
mod config;
mod lists;
mod parameters;
mod registry;
mod results;
mod transport;

pub use builder::ServiceBuilder;
pub use client::{ClientError, Page, Result, ServiceConnection};
pub use config::ServiceConfig;
pub use lists::{ListOptions, ListUpload, NewList, SavedList};
pub use parameters::Credentials;
pub use registry::ModelRegistry;
pub use results::{ResultIterator, ResultRow};
pub use transport::{BodyStream, HttpTransport, Method, Request, Response, Transport, TransportError};

pub use intermine_model::{Model, ModelError};
pub use intermine_query::{
    ConstraintValue, Direction, JoinStyle, Logic, Operator, Query, QueryBuilder, QueryError, Switchable, Template,
};
