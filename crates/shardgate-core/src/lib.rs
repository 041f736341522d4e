pub mod catalog;
pub mod error;
pub mod types;

pub use catalog::{SchemaCatalog, SchemaDescriptor, TableRule};
pub use error::ShardgateError;
pub use types::{QueryContext, RouteNode, SqlType};
