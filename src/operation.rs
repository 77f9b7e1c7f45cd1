//! A single in-flight request and the identifiers used to correlate its
//! response.

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Get,
    Set,
    Delete,
    Sasl,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub op_type: OpType,
    pub key: Vec<u8>,
    /// Requested value length: the SET payload size, or the size the
    /// miss-fill SET must synthesize for a GET.
    pub valuelen: usize,
    pub opaque: u32,
    pub key_hash: u64,
    pub start: Instant,
    /// Set once a response is applied; read by the caller to compute
    /// latency before the op is dropped from the queue.
    pub end: Option<Instant>,
    /// False for a miss-fill SET: it still occupies a FIFO slot in the
    /// `OpQueue` so ASCII/RESP correlation stays in order, but its
    /// completion isn't latency-sampled (spec §4.4).
    pub instrumented: bool,
}

impl Operation {
    pub fn new(op_type: OpType, key: Vec<u8>, valuelen: usize, opaque: u32, key_hash: u64, start: Instant) -> Self {
        Self { op_type, key, valuelen, opaque, key_hash, start, end: None, instrumented: true }
    }

    pub fn new_uninstrumented(op_type: OpType, key: Vec<u8>, valuelen: usize, opaque: u32, key_hash: u64, start: Instant) -> Self {
        Self { instrumented: false, ..Self::new(op_type, key, valuelen, opaque, key_hash, start) }
    }

    pub fn latency_us(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_duration_since(self.start).as_micros() as u64)
    }
}
