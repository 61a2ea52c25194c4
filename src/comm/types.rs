use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Message types for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Client → fedsim: send a message to an agent
    Request = 0x01,
    /// fedsim → Client: request accepted
    RequestAck = 0x02,
    /// fedsim → Client: final answer
    Response = 0x03,
    /// fedsim → Client: intermediate task update of a streaming request
    Update = 0x04,
    /// Client → fedsim: cancel the request with the same seq
    Cancel = 0x05,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::RequestAck),
            0x03 => Some(Self::Response),
            0x04 => Some(Self::Update),
            0x05 => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Request payload from client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Target agent name
    pub agent: String,
    /// Message text, hints included
    pub content: String,
    /// Inbound headers offered for forwarding
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Stream task updates before the response
    #[serde(default)]
    pub stream: bool,
}

/// One task update of a streaming request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub task_id: String,
    pub state: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Structured part, JSON encoded
    #[serde(default)]
    pub data: Option<String>,
}

/// Response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    /// Reply text
    pub content: String,
    /// Whether this is an error response
    pub is_error: bool,
}

/// Request sent from Comm to main loop
#[derive(Debug)]
pub struct UserRequest {
    pub agent: String,
    pub content: String,
    pub headers: HashMap<String, String>,
    pub stream: bool,
    /// Tripped by a client Cancel or a response timeout
    pub cancel: CancellationToken,
    /// Task updates to relay to the client
    pub updates: mpsc::UnboundedSender<UpdatePayload>,
    /// Channel to send response back to Comm
    pub reply: oneshot::Sender<UserResponse>,
    /// Client source address
    pub source_addr: SocketAddr,
}

/// Response sent from main loop to Comm
#[derive(Debug)]
pub struct UserResponse {
    /// Response content
    pub content: String,
    /// Whether this is an error response
    pub is_error: bool,
}

impl UserResponse {
    pub fn new(content: String) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: String) -> Self {
        Self {
            content,
            is_error: true,
        }
    }
}
