pub mod backend;
pub mod buffer;
pub mod config;
pub mod lifecycle;
pub mod session;
pub mod show_tables;
pub mod single_node;
pub mod stats;

pub use backend::{BackendConnection, BackendEvent, BackendRef, ResponseHandler};
pub use buffer::ReplyBuffer;
pub use config::Config;
pub use lifecycle::{Lifecycle, RunState};
pub use session::{FrontendConnection, Session};
pub use show_tables::{ShardTableFilter, ShowTablesKind};
pub use single_node::SingleNodeHandler;
pub use stats::{QueryResult, QueryResultDispatcher, QueryResultSink};

#[cfg(test)]
mod testing;
