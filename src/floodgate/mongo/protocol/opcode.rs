use std::fmt::{Debug, Display, Formatter};

// OpCode defines the MongoDB wire protocol operation codes
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct OpCode(i32);

impl OpCode {
    pub const UNKNOWN: OpCode = OpCode(0);
    // Server -> client
    pub const REPLY: OpCode = OpCode(1);
    pub const MSG: OpCode = OpCode(1000);
    // Client -> server
    pub const UPDATE: OpCode = OpCode(2001);
    pub const INSERT: OpCode = OpCode(2002);
    pub const RESERVED: OpCode = OpCode(2003);
    pub const QUERY: OpCode = OpCode(2004);
    pub const GET_MORE: OpCode = OpCode(2005);
    pub const DELETE: OpCode = OpCode(2006);
    pub const KILL_CURSORS: OpCode = OpCode(2007);

    pub const fn new(code: i32) -> Self {
        OpCode(code)
    }

    pub const fn as_i32(&self) -> i32 {
        self.0
    }

    /// True for operations that grow backend storage and are subject to
    /// quota blocking.
    pub fn is_write(&self) -> bool {
        *self == OpCode::UPDATE || *self == OpCode::INSERT
    }

    /// True for operations that change backend storage at all; these wake
    /// the storage monitors.
    pub fn is_dirty(&self) -> bool {
        *self == OpCode::UPDATE || *self == OpCode::INSERT || *self == OpCode::DELETE
    }

    pub fn name(&self) -> &'static str {
        match *self {
            OpCode::REPLY => "OP_REPLY",
            OpCode::MSG => "OP_MSG",
            OpCode::UPDATE => "OP_UPDATE",
            OpCode::INSERT => "OP_INSERT",
            OpCode::RESERVED => "RESERVED",
            OpCode::QUERY => "OP_QUERY",
            OpCode::GET_MORE => "OP_GET_MORE",
            OpCode::DELETE => "OP_DELETE",
            OpCode::KILL_CURSORS => "OP_KILL_CURSORS",
            _ => "",
        }
    }
}

impl Display for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self.name();
        if !name.is_empty() {
            return f.write_str(name);
        }
        f.write_fmt(format_args!("unknown op code {}", self.0))
    }
}

impl Debug for OpCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ops() {
        assert!(OpCode::UPDATE.is_write());
        assert!(OpCode::INSERT.is_write());
        assert!(!OpCode::DELETE.is_write());
        assert!(!OpCode::QUERY.is_write());
        assert!(!OpCode::REPLY.is_write());

        assert!(OpCode::UPDATE.is_dirty());
        assert!(OpCode::INSERT.is_dirty());
        assert!(OpCode::DELETE.is_dirty());
        assert!(!OpCode::QUERY.is_dirty());
        assert!(!OpCode::KILL_CURSORS.is_dirty());
    }

    #[test]
    fn display_names() {
        assert_eq!(format!("{}", OpCode::INSERT), "OP_INSERT");
        assert_eq!(format!("{}", OpCode::new(42)), "unknown op code 42");
    }
}
