use metrics::counter;
use shardgate_core::SqlType;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// Traffic summary of a finished (or partially delivered) query.
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub user: String,
    pub sql_type: SqlType,
    pub statement: String,
    pub net_in_bytes: u64,
    pub net_out_bytes: u64,
    pub start_time: u64,
    pub end_time: u64,
}

/// Fire-and-forget consumer of query summaries. Must not block.
pub trait QueryResultSink: Send + Sync {
    fn dispatch(&self, result: QueryResult);
}

const DEFAULT_CAPACITY: usize = 128;

/// Records traffic counters and forwards summaries to a bounded channel.
/// Summaries that do not fit are dropped and counted.
#[derive(Debug, Clone)]
pub struct QueryResultDispatcher {
    tx: mpsc::Sender<QueryResult>,
}

impl QueryResultDispatcher {
    pub fn new() -> (Self, mpsc::Receiver<QueryResult>) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<QueryResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl QueryResultSink for QueryResultDispatcher {
    fn dispatch(&self, result: QueryResult) {
        let sql_type = result.sql_type.as_str();
        counter!("query_result_dispatched_total", "sql_type" => sql_type).increment(1);
        counter!("query_net_in_bytes_total", "sql_type" => sql_type).increment(result.net_in_bytes);
        counter!("query_net_out_bytes_total", "sql_type" => sql_type).increment(result.net_out_bytes);
        match self.tx.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counter!("query_result_dropped_total", "sql_type" => sql_type).increment(1);
                trace!(sql_type, "query result channel full; dropping summary");
            }
            Err(TrySendError::Closed(_)) => {
                counter!("query_result_dropped_total", "sql_type" => sql_type).increment(1);
                trace!(sql_type, "query result receiver closed; dropping summary");
            }
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
