use std::convert::TryInto;

use crate::floodgate::mongo::protocol::OpCode;

/// Byte length of the standard message header: message_length, request_id,
/// response_to and op_code, each a little-endian int32.
pub const HEADER_LEN: usize = 16;

pub struct MsgHeader {
    pub length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op: OpCode,
}

impl MsgHeader {
    /// Decodes a header from the start of bytes. Returns None until at
    /// least HEADER_LEN bytes have accumulated. A decoded length of 0 is
    /// returned as-is; callers treat it as incomplete.
    pub fn parse(bytes: &[u8]) -> Option<MsgHeader> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        // Like BSON documents, all data in the wire protocol is little-endian.
        Some(MsgHeader {
            length: i32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            request_id: i32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            response_to: i32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            op: OpCode::new(i32::from_le_bytes(bytes[12..16].try_into().unwrap())),
        })
    }

    pub fn encode(length: i32, request_id: i32, response_to: i32, op: OpCode) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&length.to_le_bytes());
        bytes[4..8].copy_from_slice(&request_id.to_le_bytes());
        bytes[8..12].copy_from_slice(&response_to.to_le_bytes());
        bytes[12..16].copy_from_slice(&op.as_i32().to_le_bytes());
        bytes
    }
}
