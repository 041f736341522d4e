use crate::backend::{BackendConnection, BackendEvent, BackendRef, ResponseHandler};
use crate::session::{FrontendConnection, Session};
use crate::stats::{QueryResult, QueryResultSink};
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use shardgate_core::RouteNode;
use shardgate_protocol::codec::{split_packets, write_lenenc_bytes, write_packet};
use shardgate_protocol::messages::eof_packet;
use shardgate_protocol::{Charset, RowDataPacket};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub struct MockFrontend {
    pub schema: Option<String>,
    pub autocommit: AtomicBool,
    pub charset: Charset,
    pub allocations: AtomicUsize,
    pub recycled: AtomicUsize,
    pub writes: Mutex<Vec<BytesMut>>,
    pub tx_interrupt: Mutex<Option<String>>,
    pub last_insert_id: AtomicU64,
    pub load_data_packet_id: AtomicU8,
    pub load_data_cleared: AtomicBool,
}

impl Default for MockFrontend {
    fn default() -> Self {
        Self {
            schema: Some("shop".into()),
            autocommit: AtomicBool::new(true),
            charset: Charset::Utf8,
            allocations: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            tx_interrupt: Mutex::new(None),
            last_insert_id: AtomicU64::new(0),
            load_data_packet_id: AtomicU8::new(0),
            load_data_cleared: AtomicBool::new(false),
        }
    }
}

impl MockFrontend {
    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes.lock().iter().flat_map(|buf| buf.iter().copied()).collect()
    }

    /// Every packet the client received, in order.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        let bytes = self.written_bytes();
        split_packets(&bytes)
            .expect("client stream splits into packets")
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect()
    }

    pub fn packet_ids(&self) -> Vec<u8> {
        self.packets().iter().map(|p| p[3]).collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }
}

impl FrontendConnection for MockFrontend {
    fn charset(&self) -> Charset {
        self.charset
    }

    fn user(&self) -> String {
        "app".into()
    }

    fn host(&self) -> String {
        "10.0.0.7".into()
    }

    fn local_port(&self) -> u16 {
        8066
    }

    fn schema(&self) -> Option<String> {
        self.schema.clone()
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit.load(Ordering::SeqCst)
    }

    fn set_tx_interrupt(&self, reason: &str) {
        *self.tx_interrupt.lock() = Some(reason.to_string());
    }

    fn allocate(&self) -> BytesMut {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        BytesMut::with_capacity(256)
    }

    fn recycle(&self, _buf: BytesMut) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self, buf: BytesMut) {
        self.writes.lock().push(buf);
    }

    fn set_last_insert_id(&self, id: u64) {
        self.last_insert_id.store(id, Ordering::SeqCst);
    }

    fn load_data_last_packet_id(&self) -> u8 {
        self.load_data_packet_id.load(Ordering::SeqCst)
    }

    fn clear_load_data(&self) {
        self.load_data_cleared.store(true, Ordering::SeqCst);
    }
}

pub struct MockBackend {
    pub id: u64,
    pub batch_complete: AtomicBool,
    pub fail_execute: Option<String>,
    pub fail_infile: bool,
    pub executed: Mutex<Vec<String>>,
    pub recorded_sql: Mutex<Vec<String>>,
    pub infile_requests: Mutex<Vec<Vec<u8>>>,
    pub handler: Mutex<Option<Arc<dyn ResponseHandler>>>,
    /// Delivered to the handler from inside `execute`, before it returns.
    pub respond_on_execute: Mutex<Option<BackendEvent>>,
}

impl MockBackend {
    pub fn plain(id: u64) -> Self {
        Self {
            id,
            batch_complete: AtomicBool::new(true),
            fail_execute: None,
            fail_infile: false,
            executed: Mutex::new(Vec::new()),
            recorded_sql: Mutex::new(Vec::new()),
            infile_requests: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            respond_on_execute: Mutex::new(None),
        }
    }

    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self::plain(id))
    }

    pub fn failing(id: u64, message: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_execute: Some(message.to_string()),
            ..Self::plain(id)
        })
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend").field("id", &self.id).finish()
    }
}

impl BackendConnection for MockBackend {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn execute(
        &self,
        node: &RouteNode,
        _frontend: &dyn FrontendConnection,
        _autocommit: bool,
    ) -> anyhow::Result<()> {
        let response = self.respond_on_execute.lock().take();
        if let Some(event) = response {
            let handler = self.handler.lock().clone();
            if let Some(handler) = handler {
                handler.handle_event(None, event);
            }
        }
        if let Some(message) = &self.fail_execute {
            return Err(anyhow::anyhow!(message.clone()));
        }
        self.executed.lock().push(node.statement().to_string());
        Ok(())
    }

    fn sync_and_execute(&self) -> bool {
        self.batch_complete.load(Ordering::SeqCst)
    }

    fn record_sql(&self, _host: &str, _schema: Option<&str>, statement: &str) {
        self.recorded_sql.lock().push(statement.to_string());
    }

    fn charset(&self) -> Charset {
        Charset::Utf8
    }

    fn send_local_infile(&self, request: &[u8]) -> anyhow::Result<()> {
        if self.fail_infile {
            return Err(anyhow::anyhow!("local file not readable"));
        }
        self.infile_requests.lock().push(request.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockSession {
    pub frontend: MockFrontend,
    pub existing: Mutex<Option<BackendRef>>,
    pub fail_acquire: bool,
    pub closed: AtomicBool,
    pub bound: Mutex<Vec<(String, u64)>>,
    /// Node name and read hint observed when acquisition was requested.
    pub acquire_requests: Mutex<Vec<(String, Option<bool>)>>,
    pub acquire_handler: Mutex<Option<Arc<dyn ResponseHandler>>>,
    /// Connection id and force-close flag of every release.
    pub releases: Mutex<Vec<(u64, bool)>>,
    pub cleared: AtomicUsize,
}

impl MockSession {
    pub fn with_existing(conn: BackendRef) -> Self {
        let session = Self::default();
        *session.existing.lock() = Some(conn);
        session
    }

    pub fn release_count(&self) -> usize {
        self.releases.lock().len()
    }
}

impl Session for MockSession {
    fn frontend(&self) -> &dyn FrontendConnection {
        &self.frontend
    }

    fn existing_connection(&self, _node: &RouteNode) -> Option<BackendRef> {
        self.existing.lock().clone()
    }

    fn bind_connection(&self, node: &RouteNode, conn: BackendRef) {
        self.bound.lock().push((node.name().to_string(), conn.id()));
    }

    fn acquire_connection(
        &self,
        node: Arc<RouteNode>,
        _autocommit: bool,
        handler: Arc<dyn ResponseHandler>,
    ) -> anyhow::Result<()> {
        if self.fail_acquire {
            return Err(anyhow::anyhow!("no idle connection for {}", node.name()));
        }
        self.acquire_requests
            .lock()
            .push((node.name().to_string(), node.run_on_slave()));
        *self.acquire_handler.lock() = Some(handler);
        Ok(())
    }

    fn release_connection_if_safe(&self, conn: &BackendRef, force_close: bool) -> anyhow::Result<()> {
        self.releases.lock().push((conn.id(), force_close));
        Ok(())
    }

    fn clear_resources(&self, _force: bool) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Session whose pool and transport call back into the handler while it is
/// still inside an event: a release reports the connection as closed, and
/// every client write reports the write queue as available.
#[derive(Default)]
pub struct ReentrantSession {
    pub inner: MockSession,
    pub handler: Mutex<Option<Weak<dyn ResponseHandler>>>,
    pub reentered: AtomicUsize,
}

impl ReentrantSession {
    pub fn with_existing(conn: BackendRef) -> Self {
        Self {
            inner: MockSession::with_existing(conn),
            ..Self::default()
        }
    }

    pub fn attach(&self, handler: Weak<dyn ResponseHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn reenter(&self, conn: &BackendRef, event: BackendEvent) {
        let handler = self.handler.lock().as_ref().and_then(Weak::upgrade);
        if let Some(handler) = handler {
            self.reentered.fetch_add(1, Ordering::SeqCst);
            handler.handle_event(Some(conn), event);
        }
    }
}

impl FrontendConnection for ReentrantSession {
    fn charset(&self) -> Charset {
        self.inner.frontend.charset()
    }

    fn user(&self) -> String {
        self.inner.frontend.user()
    }

    fn host(&self) -> String {
        self.inner.frontend.host()
    }

    fn local_port(&self) -> u16 {
        self.inner.frontend.local_port()
    }

    fn schema(&self) -> Option<String> {
        self.inner.frontend.schema()
    }

    fn is_autocommit(&self) -> bool {
        self.inner.frontend.is_autocommit()
    }

    fn set_tx_interrupt(&self, reason: &str) {
        self.inner.frontend.set_tx_interrupt(reason);
    }

    fn allocate(&self) -> BytesMut {
        self.inner.frontend.allocate()
    }

    fn recycle(&self, buf: BytesMut) {
        self.inner.frontend.recycle(buf);
    }

    fn write(&self, buf: BytesMut) {
        self.inner.frontend.write(buf);
        let conn = self.inner.existing.lock().clone();
        if let Some(conn) = conn {
            self.reenter(&conn, BackendEvent::WriteQueueAvailable);
        }
    }

    fn set_last_insert_id(&self, id: u64) {
        self.inner.frontend.set_last_insert_id(id);
    }

    fn load_data_last_packet_id(&self) -> u8 {
        self.inner.frontend.load_data_last_packet_id()
    }

    fn clear_load_data(&self) {
        self.inner.frontend.clear_load_data();
    }
}

impl Session for ReentrantSession {
    fn frontend(&self) -> &dyn FrontendConnection {
        self
    }

    fn existing_connection(&self, node: &RouteNode) -> Option<BackendRef> {
        self.inner.existing_connection(node)
    }

    fn bind_connection(&self, node: &RouteNode, conn: BackendRef) {
        self.inner.bind_connection(node, conn);
    }

    fn acquire_connection(
        &self,
        node: Arc<RouteNode>,
        autocommit: bool,
        handler: Arc<dyn ResponseHandler>,
    ) -> anyhow::Result<()> {
        self.inner.acquire_connection(node, autocommit, handler)
    }

    fn release_connection_if_safe(&self, conn: &BackendRef, force_close: bool) -> anyhow::Result<()> {
        self.inner.release_connection_if_safe(conn, force_close)?;
        self.reenter(conn, BackendEvent::ConnectionClose("closed by pool on release".into()));
        Ok(())
    }

    fn clear_resources(&self, force: bool) {
        self.inner.clear_resources(force);
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[derive(Default)]
pub struct CollectingSink {
    pub results: Mutex<Vec<QueryResult>>,
}

impl QueryResultSink for CollectingSink {
    fn dispatch(&self, result: QueryResult) {
        self.results.lock().push(result);
    }
}

/// Raw packets as a MySQL server would send them, with the server's own
/// sequence ids.
pub mod wire {
    use super::*;

    pub fn column_count(count: u64, seq: u8) -> BytesMut {
        let mut payload = BytesMut::new();
        shardgate_protocol::codec::write_lenenc_int(&mut payload, count);
        packet(seq, &payload)
    }

    pub fn column(name: &str, seq: u8) -> BytesMut {
        let mut payload = BytesMut::new();
        for part in ["def", "shop", "", "", name, name] {
            write_lenenc_bytes(&mut payload, part.as_bytes());
        }
        payload.put_u8(0x0c);
        payload.put_u16_le(33);
        payload.put_u32_le(64);
        payload.put_u8(0xfd);
        payload.put_u16_le(0);
        payload.put_u8(0);
        payload.put_u16_le(0);
        packet(seq, &payload)
    }

    pub fn eof(seq: u8) -> BytesMut {
        eof_packet(seq, 0, 0x0002)
    }

    pub fn row(values: &[&str], seq: u8) -> BytesMut {
        let mut row = RowDataPacket::new(seq);
        for value in values {
            row.add(value.as_bytes().to_vec());
        }
        let mut buf = BytesMut::new();
        row.write(&mut buf);
        buf
    }

    pub fn ok(insert_id: u64, seq: u8) -> BytesMut {
        let mut payload = BytesMut::new();
        payload.put_u8(0x00);
        shardgate_protocol::codec::write_lenenc_int(&mut payload, 1);
        shardgate_protocol::codec::write_lenenc_int(&mut payload, insert_id);
        payload.put_u16_le(0x0002);
        payload.put_u16_le(0);
        packet(seq, &payload)
    }

    pub fn error(errno: u16, message: &str, seq: u8) -> BytesMut {
        let mut payload = BytesMut::new();
        payload.put_u8(0xff);
        payload.put_u16_le(errno);
        payload.put_u8(b'#');
        payload.extend_from_slice(b"42000");
        payload.extend_from_slice(message.as_bytes());
        packet(seq, &payload)
    }

    fn packet(seq: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        write_packet(&mut buf, seq, payload);
        buf
    }
}
