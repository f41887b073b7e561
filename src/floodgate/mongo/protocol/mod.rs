mod framer;
mod header;
mod opcode;

pub use framer::{Frame, Framer};
pub use header::{MsgHeader, HEADER_LEN};
pub use opcode::OpCode;
