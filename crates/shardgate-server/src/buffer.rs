use crate::session::FrontendConnection;
use bytes::BytesMut;

/// Reply bytes batched for one flush to the client.
///
/// Nothing is allocated until the first append. Taking the buffer hands it to
/// the caller; the next append allocates a fresh one.
#[derive(Debug, Default)]
pub struct ReplyBuffer {
    buf: Option<BytesMut>,
}

impl ReplyBuffer {
    pub fn new() -> Self {
        Self { buf: None }
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, BytesMut::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_alloc(&mut self, frontend: &dyn FrontendConnection) -> &mut BytesMut {
        self.buf.get_or_insert_with(|| frontend.allocate())
    }

    pub fn append(&mut self, frontend: &dyn FrontendConnection, bytes: &[u8]) {
        self.get_or_alloc(frontend).extend_from_slice(bytes);
    }

    /// Moves the buffer out, to be written or recycled by the caller. `None`
    /// when nothing was allocated since the last take.
    pub fn take(&mut self) -> Option<BytesMut> {
        self.buf.take()
    }
}
