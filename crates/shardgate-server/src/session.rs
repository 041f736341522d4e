use crate::backend::{BackendRef, ResponseHandler};
use bytes::BytesMut;
use shardgate_core::RouteNode;
use shardgate_protocol::Charset;
use std::sync::Arc;

/// The client side of a proxied session.
pub trait FrontendConnection: Send + Sync {
    fn charset(&self) -> Charset;
    fn user(&self) -> String;
    fn host(&self) -> String;
    fn local_port(&self) -> u16;
    fn schema(&self) -> Option<String>;
    fn is_autocommit(&self) -> bool;

    /// Rejects further statements of the current transaction until it is reset.
    fn set_tx_interrupt(&self, reason: &str);

    /// Takes a buffer from the connection's pool.
    fn allocate(&self) -> BytesMut;
    /// Returns an unsent buffer to the pool.
    fn recycle(&self, buf: BytesMut);
    /// Hands `buf` to the transport. The caller must not reuse it.
    fn write(&self, buf: BytesMut);

    fn set_last_insert_id(&self, id: u64);

    /// Sequence id of the last packet of the client's LOAD DATA upload.
    fn load_data_last_packet_id(&self) -> u8;
    fn clear_load_data(&self);
}

/// Per-client registry of backend connections, keyed by data node.
pub trait Session: Send + Sync {
    fn frontend(&self) -> &dyn FrontendConnection;

    /// A bound connection for `node` that can take another statement.
    fn existing_connection(&self, node: &RouteNode) -> Option<BackendRef>;

    fn bind_connection(&self, node: &RouteNode, conn: BackendRef);

    /// Requests a new connection. Completion is reported through
    /// `handler.connection_acquired` or a `ConnectionError` event.
    fn acquire_connection(
        &self,
        node: Arc<RouteNode>,
        autocommit: bool,
        handler: Arc<dyn ResponseHandler>,
    ) -> anyhow::Result<()>;

    /// Returns `conn` to its pool if it is reusable, otherwise closes it.
    fn release_connection_if_safe(&self, conn: &BackendRef, force_close: bool) -> anyhow::Result<()>;

    fn clear_resources(&self, force: bool);

    fn is_closed(&self) -> bool;
}
