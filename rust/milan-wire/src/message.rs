//! Message envelope codes.
//!
//! Every frame on an RPC connection starts with
//! `u8 message_type ‖ u32 request_id`. One request maps to exactly one
//! response; cancellation requests carry no body beyond the envelope.

use std::fmt;

use crate::error::{Error, Result};

/// Kind of a message on an RPC connection.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client-to-server method call.
    Request = 0,
    /// Server-to-client result for a previous request.
    Response = 1,
    /// Client-to-server best-effort cancellation of an in-flight request.
    CancelRequest = 2,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => MessageType::Request,
            1 => MessageType::Response,
            2 => MessageType::CancelRequest,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        MessageType::from_u8(value)
            .ok_or_else(|| Error::data_mismatch(format!("unknown message type {}", value)))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Request => f.write_str("request"),
            MessageType::Response => f.write_str("response"),
            MessageType::CancelRequest => f.write_str("cancel_request"),
        }
    }
}
