use crate::session::FrontendConnection;
use bytes::BytesMut;
use shardgate_core::RouteNode;
use shardgate_protocol::Charset;
use std::fmt;
use std::sync::Arc;

/// A pooled connection to one physical data node.
pub trait BackendConnection: Send + Sync + fmt::Debug {
    fn id(&self) -> u64;

    /// Installs the handler that receives this connection's responses.
    fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>);

    /// Sends the node's statement. Responses arrive later as [`BackendEvent`]s.
    fn execute(
        &self,
        node: &RouteNode,
        frontend: &dyn FrontendConnection,
        autocommit: bool,
    ) -> anyhow::Result<()>;

    /// True once the final OK of a multi-statement batch has arrived.
    fn sync_and_execute(&self) -> bool;

    fn record_sql(&self, host: &str, schema: Option<&str>, statement: &str);

    fn charset(&self) -> Charset;

    /// Answers a `LOAD DATA LOCAL INFILE` file request from the server.
    fn send_local_infile(&self, request: &[u8]) -> anyhow::Result<()>;
}

pub type BackendRef = Arc<dyn BackendConnection>;

/// Everything a backend connection can report to its response handler.
/// Raw packets still carry their header so they can be renumbered in place.
#[derive(Debug)]
pub enum BackendEvent {
    Ok(BytesMut),
    Error(BytesMut),
    FieldEof {
        header: BytesMut,
        fields: Vec<BytesMut>,
        eof: BytesMut,
    },
    Row(BytesMut),
    RowEof(BytesMut),
    /// Transport-level failure, or failure to obtain a connection at all.
    ConnectionError(anyhow::Error),
    ConnectionClose(String),
    LocalInfileRequest(BytesMut),
    WriteQueueAvailable,
}

impl BackendEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::Ok(_) => "ok",
            BackendEvent::Error(_) => "error",
            BackendEvent::FieldEof { .. } => "field_eof",
            BackendEvent::Row(_) => "row",
            BackendEvent::RowEof(_) => "row_eof",
            BackendEvent::ConnectionError(_) => "connection_error",
            BackendEvent::ConnectionClose(_) => "connection_close",
            BackendEvent::LocalInfileRequest(_) => "local_infile_request",
            BackendEvent::WriteQueueAvailable => "write_queue_available",
        }
    }
}

/// Receiver side of a backend connection. Events for one query are delivered
/// one at a time, in wire order.
pub trait ResponseHandler: Send + Sync {
    fn connection_acquired(&self, conn: BackendRef);

    /// `conn` is `None` only for failures that happen before a connection exists.
    fn handle_event(&self, conn: Option<&BackendRef>, event: BackendEvent);
}
