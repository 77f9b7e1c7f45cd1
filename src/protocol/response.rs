//! A fully decoded response frame, produced by any of the three codecs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// A GET response: either a hit (`obj_size` valid) or a miss.
    Get,
    /// A generic ack completing a SET or DELETE. ASCII and RESP acks don't
    /// name which op they complete on the wire; the caller matches against
    /// the head of its `OpQueue` instead (spec §5 "Ordering").
    Ack,
    Sasl,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub kind: ResponseKind,
    /// Present for binary (out-of-order correlation); absent for ASCII and
    /// RESP, which are correlated by FIFO order instead (spec §5
    /// "Ordering").
    pub opaque: Option<u32>,
    pub hit: bool,
    pub obj_size: usize,
}
