use crate::error::ShardgateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Statement class assigned by the router. Used as the statistics tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Select,
    Insert,
    Replace,
    Update,
    Delete,
    Show,
    Set,
    Begin,
    Commit,
    Rollback,
    Call,
    LoadData,
    Ddl,
    Other,
}

impl SqlType {
    pub fn as_str(self) -> &'static str {
        match self {
            SqlType::Select => "select",
            SqlType::Insert => "insert",
            SqlType::Replace => "replace",
            SqlType::Update => "update",
            SqlType::Delete => "delete",
            SqlType::Show => "show",
            SqlType::Set => "set",
            SqlType::Begin => "begin",
            SqlType::Commit => "commit",
            SqlType::Rollback => "rollback",
            SqlType::Call => "call",
            SqlType::LoadData => "load_data",
            SqlType::Ddl => "ddl",
            SqlType::Other => "other",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const READ_HINT_UNSET: u8 = 0;
const READ_HINT_MASTER: u8 = 1;
const READ_HINT_SLAVE: u8 = 2;

/// One physical data node a statement was routed to.
///
/// The replica read hint is shared with the connection pool, which may read it
/// from another thread while the connection is being acquired.
#[derive(Debug)]
pub struct RouteNode {
    name: String,
    statement: String,
    run_on_slave: AtomicU8,
}

impl RouteNode {
    pub fn new(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            run_on_slave: AtomicU8::new(READ_HINT_UNSET),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn run_on_slave(&self) -> Option<bool> {
        match self.run_on_slave.load(Ordering::Acquire) {
            READ_HINT_MASTER => Some(false),
            READ_HINT_SLAVE => Some(true),
            _ => None,
        }
    }

    pub fn set_run_on_slave(&self, hint: Option<bool>) {
        let value = match hint {
            None => READ_HINT_UNSET,
            Some(false) => READ_HINT_MASTER,
            Some(true) => READ_HINT_SLAVE,
        };
        self.run_on_slave.store(value, Ordering::Release);
    }
}

impl fmt::Display for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.name, self.statement)
    }
}

/// Routing result handed to an execution handler. Read-only once built.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub nodes: Vec<Arc<RouteNode>>,
    pub statement: String,
    pub sql_type: SqlType,
    pub run_on_slave: Option<bool>,
    pub call_statement: bool,
    pub load_data: bool,
}

impl QueryContext {
    pub fn new(statement: impl Into<String>, sql_type: SqlType, nodes: Vec<Arc<RouteNode>>) -> Self {
        Self {
            nodes,
            statement: statement.into(),
            sql_type,
            run_on_slave: None,
            call_statement: sql_type == SqlType::Call,
            load_data: sql_type == SqlType::LoadData,
        }
    }

    /// Context for a statement routed unchanged to a single data node.
    pub fn single(node: impl Into<String>, statement: impl Into<String>, sql_type: SqlType) -> Self {
        let statement = statement.into();
        let route = Arc::new(RouteNode::new(node, statement.clone()));
        Self::new(statement, sql_type, vec![route])
    }

    pub fn with_run_on_slave(mut self, hint: Option<bool>) -> Self {
        self.run_on_slave = hint;
        self
    }

    pub fn target_node(&self) -> Result<&Arc<RouteNode>, ShardgateError> {
        self.nodes
            .first()
            .ok_or_else(|| ShardgateError::InvalidRoute("route has no target node".into()))
    }
}
