//! WebSocket transport layer.
//!
//! This module moves frames between the client and the gateway and keeps
//! the bookkeeping that sits directly on top of the socket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                         ┌─────────────────┐
//! │  GatewayClient   │                         │  Gateway        │
//! │                  │        WebSocket        │                 │
//! │  Connection      │◄───────────────────────►│  (ws / wss)     │
//! │  Correlator      │                         │                 │
//! │  EventDispatcher │                         │                 │
//! └──────────────────┘                         └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket dial and I/O loop |
//! | `correlator` | Pending request table |
//! | `dispatcher` | Event subscriptions and fan-out |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and I/O loop.
pub mod connection;

/// Request/response correlation.
pub mod correlator;

/// Event fan-out.
pub mod dispatcher;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, TransportEvent, TransportOptions, TransportSignal};
pub use correlator::{Correlator, ResultSlot};
pub use dispatcher::{EventDispatcher, EventFilter, EventHandler};
