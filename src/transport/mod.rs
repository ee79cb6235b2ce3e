//! Network transport: wire protocol and the WebSocket server.

pub mod protocol;
pub mod ws;

pub use protocol::{ClientMessage, DecodeError, ServerMessage};
pub use ws::{WsConfig, WsServer, parse_bind_addr};
