use crate::floodgate::common::{Error, Result};
use crate::floodgate::mongo::protocol::{MsgHeader, OpCode};

/// What the framer concluded from the bytes accumulated so far.
#[derive(Debug, Eq, PartialEq)]
pub enum Frame {
    /// Not enough bytes yet to decode a header; keep reading, forward nothing.
    Incomplete,
    /// A new message header was just decoded.
    Start(OpCode),
    /// Bytes belong to the message whose header was decoded earlier.
    Continue(OpCode),
}

/// Tracks message boundaries on the client-to-server stream across
/// arbitrary TCP segmentation. remaining == 0 means the next bytes begin
/// a new message header.
pub struct Framer {
    remaining: usize,
    op: OpCode,
}

impl Framer {
    pub fn new() -> Self {
        Framer {
            remaining: 0,
            op: OpCode::UNKNOWN,
        }
    }

    /// Inspects the bytes accumulated since the last flush. max_len bounds
    /// the message lengths a client may declare; a larger (or negative)
    /// declared length is unrecoverable at session level.
    pub fn observe(&mut self, data: &[u8], max_len: usize) -> Result<Frame> {
        if self.remaining > 0 {
            return Ok(Frame::Continue(self.op));
        }
        let hdr = match MsgHeader::parse(data) {
            None => return Ok(Frame::Incomplete),
            Some(hdr) => hdr,
        };
        if hdr.length == 0 {
            return Ok(Frame::Incomplete);
        }
        if hdr.length < 0 || hdr.length as usize > max_len {
            return Err(Error::new(format!(
                "message length {} exceeds the {} byte frame limit", hdr.length, max_len)));
        }
        self.remaining = hdr.length as usize;
        self.op = hdr.op;
        Ok(Frame::Start(self.op))
    }

    /// Accounts n forwarded bytes against the in-flight message. Clamps at
    /// zero: a client that sends more bytes than its declared length gets
    /// the excess interpreted as the next message header.
    pub fn consume(&mut self, n: usize) {
        self.remaining = self.remaining.saturating_sub(n);
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn op(&self) -> OpCode {
        self.op
    }
}
