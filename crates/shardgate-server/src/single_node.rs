use crate::backend::{BackendEvent, BackendRef, ResponseHandler};
use crate::buffer::ReplyBuffer;
use crate::lifecycle::{Lifecycle, RunState, TerminateCallback};
use crate::session::Session;
use crate::show_tables::ShardTableFilter;
use crate::stats::{now_millis, QueryResult, QueryResultSink};
use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use shardgate_core::{QueryContext, RouteNode, SchemaCatalog, ShardgateError};
use shardgate_protocol::codec::set_packet_id;
use shardgate_protocol::error_code::{
    ERR_FOUND_EXCEPTION, ER_ERROR_ON_CLOSE, ER_NEW_ABORTING_CONNECTION,
};
use shardgate_protocol::messages::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};
use shardgate_protocol::{ErrorPacket, OkPacket};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Default)]
struct ExecState {
    packet_id: u8,
    buffer: ReplyBuffer,
    net_out_bytes: u64,
    start_time: u64,
    /// Bound backend connection. Taken on release so it can only be returned once.
    conn: Option<BackendRef>,
    effects: Effects,
}

impl ExecState {
    fn next_packet_id(&mut self) -> u8 {
        self.packet_id = self.packet_id.wrapping_add(1);
        self.packet_id
    }

    fn flush(&mut self) {
        if let Some(buf) = self.buffer.take() {
            self.effects.writes.push(buf);
        }
    }
}

/// Collaborator calls decided under the state lock. They are made once the
/// lock is dropped, since a pool or transport may call back into the handler.
#[derive(Default)]
struct Effects {
    audit: Option<BackendRef>,
    release: Option<(BackendRef, bool)>,
    tx_interrupt: Option<String>,
    writes: Vec<BytesMut>,
    recycle: Option<BytesMut>,
    clear_load_data: bool,
    last_insert_id: Option<u64>,
    summaries: Vec<QueryResult>,
    clear_resources: bool,
    callbacks: Vec<TerminateCallback>,
}

/// Executes a statement routed to exactly one data node.
///
/// The handler binds one backend connection, relays its result stream to the
/// client with sequence ids renumbered for the client's reply, and releases
/// the connection when the stream ends.
pub struct SingleNodeHandler {
    id: Uuid,
    me: Weak<SingleNodeHandler>,
    ctx: Arc<QueryContext>,
    node: Arc<RouteNode>,
    session: Arc<dyn Session>,
    results: Arc<dyn QueryResultSink>,
    table_filter: Option<ShardTableFilter>,
    net_in_bytes: u64,
    lifecycle: Lifecycle,
    state: Mutex<ExecState>,
}

impl SingleNodeHandler {
    pub fn new(
        ctx: Arc<QueryContext>,
        session: Arc<dyn Session>,
        catalog: &SchemaCatalog,
        results: Arc<dyn QueryResultSink>,
    ) -> Result<Arc<Self>, ShardgateError> {
        let node = ctx.target_node()?.clone();
        let schema = session.frontend().schema();
        let table_filter = ShardTableFilter::resolve(&ctx, schema.as_deref(), catalog);
        let net_in_bytes = ctx.statement.len() as u64;
        Ok(Arc::new_cyclic(|me| Self {
            id: Uuid::new_v4(),
            me: me.clone(),
            ctx,
            node,
            session,
            results,
            table_filter,
            net_in_bytes,
            lifecycle: Lifecycle::new(),
            state: Mutex::new(ExecState::default()),
        }))
    }

    pub fn run_state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn table_filter(&self) -> Option<&ShardTableFilter> {
        self.table_filter.as_ref()
    }

    /// Starts the query on the bound connection for the node, or requests a
    /// new one and resumes in [`ResponseHandler::connection_acquired`].
    pub fn execute(&self) {
        if !self.lifecycle.start() {
            warn!(query_id = %self.id, state = ?self.lifecycle.state(), "execute called on a started handler");
            return;
        }
        {
            let mut state = self.state.lock();
            state.start_time = now_millis();
            state.packet_id = 0;
        }
        self.node.set_run_on_slave(self.ctx.run_on_slave);
        debug!(
            query_id = %self.id,
            node = self.node.name(),
            run_on_slave = ?self.node.run_on_slave(),
            "executing on single node"
        );

        if let Some(conn) = self.session.existing_connection(&self.node) {
            self.dispatch(conn);
            return;
        }

        let Some(handler) = self.me.upgrade() else {
            error!(query_id = %self.id, "handler dropped before connection acquisition");
            return;
        };
        // Acquisition may hop threads; the hint must be current when the pool reads it.
        self.node.set_run_on_slave(self.ctx.run_on_slave);
        let autocommit = self.session.frontend().is_autocommit();
        if let Err(err) = self
            .session
            .acquire_connection(self.node.clone(), autocommit, handler)
        {
            self.handle_event(None, BackendEvent::ConnectionError(err));
        }
    }

    /// Runs `callback` immediately if the query is not running, otherwise
    /// once it reaches its terminal event. Safe to call from any thread.
    pub fn terminate<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lifecycle.terminate(Box::new(callback));
    }

    fn dispatch(&self, conn: BackendRef) {
        if self.session.is_closed() {
            debug!(query_id = %self.id, "session closed before dispatch");
            let mut state = self.state.lock();
            self.end_running(&mut state);
            state.effects.clear_resources = true;
            self.finish_event(state);
            return;
        }
        let Some(handler) = self.me.upgrade() else {
            error!(query_id = %self.id, "handler dropped before dispatch");
            return;
        };
        self.state.lock().conn = Some(conn.clone());
        conn.set_response_handler(handler);
        let frontend = self.session.frontend();
        if let Err(err) = conn.execute(&self.node, frontend, frontend.is_autocommit()) {
            if !self.lifecycle.is_running() {
                warn!(query_id = %self.id, error = %err, "dispatch failed after query ended");
                return;
            }
            let mut state = self.state.lock();
            self.local_failure(&mut state, &err.to_string());
            self.finish_event(state);
        }
    }

    fn end_running(&self, state: &mut ExecState) {
        if let Some(callbacks) = self.lifecycle.finish() {
            state.effects.callbacks.extend(callbacks);
        }
    }

    /// Drops the state lock, then performs the collaborator calls the event decided on.
    fn finish_event(&self, mut state: MutexGuard<'_, ExecState>) {
        let effects = std::mem::take(&mut state.effects);
        drop(state);

        let frontend = self.session.frontend();
        if let Some(conn) = &effects.audit {
            conn.record_sql(&frontend.host(), frontend.schema().as_deref(), self.node.statement());
        }
        if let Some((conn, force_close)) = effects.release {
            if let Err(err) = self.session.release_connection_if_safe(&conn, force_close) {
                warn!(query_id = %self.id, backend = ?conn, error = %err, "failed to release backend connection");
            }
        }
        if let Some(reason) = &effects.tx_interrupt {
            frontend.set_tx_interrupt(reason);
        }
        for buf in effects.writes {
            frontend.write(buf);
        }
        if let Some(buf) = effects.recycle {
            frontend.recycle(buf);
        }
        if effects.clear_load_data {
            frontend.clear_load_data();
        }
        if let Some(id) = effects.last_insert_id {
            frontend.set_last_insert_id(id);
        }
        for summary in effects.summaries {
            self.results.dispatch(summary);
        }
        if effects.clear_resources {
            self.session.clear_resources(true);
        }
        for callback in effects.callbacks {
            callback();
        }
    }

    fn release_backend(&self, state: &mut ExecState, force_close: bool) {
        if let Some(conn) = state.conn.take() {
            state.effects.release = Some((conn, force_close));
        }
    }

    fn dispatch_result(&self, state: &mut ExecState) {
        let summary = QueryResult {
            user: self.session.frontend().user(),
            sql_type: self.ctx.sql_type,
            statement: self.ctx.statement.clone(),
            net_in_bytes: self.net_in_bytes,
            net_out_bytes: state.net_out_bytes,
            start_time: state.start_time,
            end_time: now_millis(),
        };
        state.effects.summaries.push(summary);
    }

    /// Renumbers a raw packet and appends it to the reply buffer.
    fn buffer_packet(&self, state: &mut ExecState, mut packet: BytesMut) -> Result<(), ShardgateError> {
        let packet_id = state.next_packet_id();
        set_packet_id(&mut packet, packet_id)?;
        state.buffer.append(self.session.frontend(), &packet);
        Ok(())
    }

    fn on_ok(&self, state: &mut ExecState, conn: Option<BackendRef>, data: BytesMut) {
        state.net_out_bytes += data.len() as u64;
        if !conn.map_or(true, |conn| conn.sync_and_execute()) {
            return;
        }
        self.end_running(state);
        if !self.ctx.call_statement {
            self.release_backend(state, false);
        }

        let frontend = self.session.frontend();
        let mut ok = match OkPacket::read(&data) {
            Ok(ok) => ok,
            Err(err) => return self.local_failure(state, &err.to_string()),
        };
        ok.packet_id = if self.ctx.load_data {
            state.effects.clear_load_data = true;
            frontend.load_data_last_packet_id().wrapping_add(1)
        } else {
            state.next_packet_id()
        };
        ok.server_status = if frontend.is_autocommit() {
            SERVER_STATUS_AUTOCOMMIT
        } else {
            SERVER_STATUS_IN_TRANS
        };
        ok.write(state.buffer.get_or_alloc(frontend));
        state.flush();
        self.dispatch_result(state);
        state.effects.last_insert_id = Some(ok.insert_id);
    }

    fn on_row_eof(&self, state: &mut ExecState, conn: Option<BackendRef>, eof: BytesMut) {
        state.net_out_bytes += eof.len() as u64;
        state.effects.audit = conn;
        // A procedure may return further result sets on this connection.
        if !self.ctx.call_statement {
            self.end_running(state);
            self.release_backend(state, false);
        }
        if let Err(err) = self.buffer_packet(state, eof) {
            return self.local_failure(state, &err.to_string());
        }
        state.flush();
    }

    fn on_field_eof(&self, state: &mut ExecState, header: BytesMut, fields: Vec<BytesMut>, eof: BytesMut) {
        state.net_out_bytes += header.len() as u64;
        state.net_out_bytes += fields.iter().map(|f| f.len() as u64).sum::<u64>();
        self.dispatch_result(state);

        let packets = std::iter::once(header).chain(fields).chain(std::iter::once(eof));
        for packet in packets {
            if let Err(err) = self.buffer_packet(state, packet) {
                return self.local_failure(state, &err.to_string());
            }
        }

        if let Some(filter) = &self.table_filter {
            let frontend = self.session.frontend();
            for mut row in filter.synthesized_rows(frontend.charset()) {
                row.packet_id = state.next_packet_id();
                row.write(state.buffer.get_or_alloc(frontend));
            }
        }
    }

    fn on_row(&self, state: &mut ExecState, conn: Option<BackendRef>, row: BytesMut) {
        if let Some(filter) = &self.table_filter {
            let charset = conn
                .map(|conn| conn.charset())
                .unwrap_or_else(|| self.session.frontend().charset());
            match filter.suppresses(&row, charset) {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    warn!(query_id = %self.id, error = %err, "unreadable table row; passing through");
                }
            }
        }
        state.net_out_bytes += row.len() as u64;
        if let Err(err) = self.buffer_packet(state, row) {
            self.local_failure(state, &err.to_string());
        }
    }

    fn on_error(&self, state: &mut ExecState, data: BytesMut) {
        let mut err = match ErrorPacket::read(&data) {
            Ok(err) => err,
            Err(parse_err) => return self.local_failure(state, &parse_err.to_string()),
        };
        err.packet_id = state.next_packet_id();
        self.backend_failure(state, err);
    }

    fn on_connection_close(&self, state: &mut ExecState, reason: &str) {
        let charset = self.session.frontend().charset();
        let err = ErrorPacket::new(state.next_packet_id(), ER_ERROR_ON_CLOSE, charset.encode(reason));
        self.backend_failure(state, err);
    }

    /// Transport-level failure: the error goes straight to the client and the
    /// connection is discarded rather than returned to its pool.
    fn on_connection_error(&self, state: &mut ExecState, cause: anyhow::Error) {
        self.end_running(state);
        let frontend = self.session.frontend();
        let message = cause.to_string();
        warn!(
            query_id = %self.id,
            node = self.node.name(),
            error = %message,
            "backend connection failed"
        );
        let err = ErrorPacket::new(
            state.next_packet_id(),
            ER_NEW_ABORTING_CONNECTION,
            frontend.charset().encode(&message),
        );
        self.release_backend(state, true);
        state.effects.tx_interrupt = Some(format!("errno:{} {}", err.errno, message));
        state.effects.recycle = state.buffer.take();
        let mut out = BytesMut::new();
        err.write(&mut out);
        state.effects.writes.push(out);
    }

    fn on_local_infile(&self, state: &mut ExecState, conn: Option<BackendRef>, request: BytesMut) {
        let Some(conn) = conn else {
            return self.local_failure(state, "file request without a backend connection");
        };
        if let Err(err) = conn.send_local_infile(&request) {
            self.local_failure(state, &err.to_string());
        }
    }

    /// Failure raised inside the proxy while driving the backend.
    fn local_failure(&self, state: &mut ExecState, message: &str) {
        let charset = self.session.frontend().charset();
        let err = ErrorPacket::new(state.next_packet_id(), ERR_FOUND_EXCEPTION, charset.encode(message));
        self.backend_failure(state, err);
    }

    fn backend_failure(&self, state: &mut ExecState, err: ErrorPacket) {
        self.end_running(state);
        let frontend = self.session.frontend();
        let message = err.message_lossy();
        warn!(
            query_id = %self.id,
            errno = err.errno,
            message = %message,
            backend = ?state.conn,
            host = %frontend.host(),
            port = frontend.local_port(),
            user = %frontend.user(),
            charset = frontend.charset().name(),
            "execute sql error"
        );
        self.release_backend(state, false);
        state.effects.tx_interrupt = Some(format!("errno:{} {}", err.errno, message));
        let mut out = BytesMut::new();
        err.write(&mut out);
        state.effects.writes.push(out);
        state.effects.recycle = state.buffer.take();
    }
}

impl ResponseHandler for SingleNodeHandler {
    fn connection_acquired(&self, conn: BackendRef) {
        if !self.lifecycle.is_running() {
            debug!(query_id = %self.id, backend = ?conn, "connection acquired after query ended");
            if let Err(err) = self.session.release_connection_if_safe(&conn, false) {
                warn!(query_id = %self.id, error = %err, "failed to release late connection");
            }
            return;
        }
        self.session.bind_connection(&self.node, conn.clone());
        self.dispatch(conn);
    }

    fn handle_event(&self, conn: Option<&BackendRef>, event: BackendEvent) {
        if !self.lifecycle.is_running() {
            debug!(query_id = %self.id, event = event.name(), state = ?self.lifecycle.state(), "ignoring backend event");
            return;
        }
        let mut state = self.state.lock();
        let conn = conn.cloned().or_else(|| state.conn.clone());
        match event {
            BackendEvent::Ok(data) => self.on_ok(&mut state, conn, data),
            BackendEvent::Error(data) => self.on_error(&mut state, data),
            BackendEvent::FieldEof { header, fields, eof } => {
                self.on_field_eof(&mut state, header, fields, eof)
            }
            BackendEvent::Row(row) => self.on_row(&mut state, conn, row),
            BackendEvent::RowEof(eof) => self.on_row_eof(&mut state, conn, eof),
            BackendEvent::ConnectionError(cause) => self.on_connection_error(&mut state, cause),
            BackendEvent::ConnectionClose(reason) => self.on_connection_close(&mut state, &reason),
            BackendEvent::LocalInfileRequest(request) => self.on_local_infile(&mut state, conn, request),
            BackendEvent::WriteQueueAvailable => {}
        }
        self.finish_event(state);
    }
}

impl fmt::Debug for SingleNodeHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.try_lock();
        f.debug_struct("SingleNodeHandler")
            .field("id", &self.id)
            .field("node", &self.node.name())
            .field("packet_id", &state.as_ref().map(|state| state.packet_id))
            .field("buffered", &state.as_ref().map(|state| state.buffer.len()))
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}
