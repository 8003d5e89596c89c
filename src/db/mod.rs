//! Database abstraction layer.
//!
//! This module provides access to the partner store:
//! - Dialect descriptors and the dialect catalog
//! - Connection pool management with background retirement
//! - Result windowing and placeholder handling
//! - Template execution and row rendering
//! - Read-only checks for configured templates

pub mod dialect;
pub mod executor;
pub mod guard;
#[macro_use]
pub mod macros;
pub mod paginate;
pub mod params;
pub mod pool;
pub mod types;

pub use dialect::{DialectCatalog, DialectDescriptor, DriverKind, PaginationStrategy, PlaceholderStyle};
pub use executor::QueryExecutor;
pub use paginate::{
    Pageable, count_placeholders, number_placeholders, paginate, paginate_with, statement_body,
};
pub use params::{QueryParam, bind_plan};
pub use pool::{ActivePool, DbPool, PoolManager, PoolSettings};
pub use types::{AttributeMap, RowToAttributes};
