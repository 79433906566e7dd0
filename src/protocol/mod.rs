//! Gateway protocol message types and codec.
//!
//! This module defines the frames exchanged with the gateway and the text
//! codec that turns them into WebSocket messages.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `Request` | Client → Gateway | Method call |
//! | `Response` | Gateway → Client | Method result |
//! | `Event` | Gateway → Client | Unsolicited push |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Envelope, request/response frames, `encode`/`decode` |
//! | `event` | Event frame and typed parsing |
//! | `handshake` | `connect` parameters and `hello-ok` payload |
//! | `chat` | Chat method parameters and reply decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Chat method shapes.
pub mod chat;

/// Event message types.
pub mod event;

/// Envelope frames and codec.
pub mod frame;

/// Handshake message shapes.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use chat::{
    ChatAbortParams, ChatHistory, ChatHistoryParams, ChatMessage, ChatSendParams,
    METHOD_CHAT_ABORT, METHOD_CHAT_HISTORY, METHOD_CHAT_SEND,
};
pub use event::{Event, ParsedEvent};
pub use frame::{Envelope, Request, Response, decode, encode};
pub use handshake::{
    ClientInfo, ConnectAuth, ConnectParams, DeviceInfo, HELLO_OK, HelloOk, METHOD_CONNECT,
    PROTOCOL_VERSION, Policy, ServerInfo,
};
