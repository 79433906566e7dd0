//! Agent Gateway - WebSocket client for a personal-agent gateway.
//!
//! This library connects to an agent gateway over WebSocket, performs the
//! challenge/`connect` handshake, correlates requests with responses and
//! fans out server events. A session facade turns it into a simple
//! "send text, get reply" API for chat front-ends.
//!
//! # Architecture
//!
//! - **Transport**: one WebSocket per connection attempt, pumped by a
//!   tokio task
//! - **Client actor**: a single task applies every state transition, in
//!   arrival order
//! - **Correlator**: request IDs mapped to waiting callers
//! - **Dispatcher**: events delivered to filtered subscribers
//!
//! # Quick Start
//!
//! ```no_run
//! use agent_gateway::{Gateway, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let gateway = Gateway::builder()
//!         .url("ws://127.0.0.1:18789")
//!         .token("secret")
//!         .build()?;
//!
//!     let reply = gateway.send("What's on my calendar today?").await?;
//!     println!("{reply}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Connection actor, state machine, builder and options |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire frames and codec |
//! | [`session`] | [`Gateway`] facade |
//! | [`settings`] | Settings store interface |
//! | [`transport`] | WebSocket transport, correlation, event fan-out |

// ============================================================================
// Modules
// ============================================================================

/// Connection client.
///
/// [`GatewayClient`] drives the connection; [`GatewayBuilder`] configures it.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing request IDs, session keys and
/// idempotency keys.
pub mod identifiers;

/// Gateway protocol frames and codec.
pub mod protocol;

/// Session facade.
pub mod session;

/// Persisted settings.
pub mod settings;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientIdentity, ConnectionState, GatewayBuilder, GatewayClient, GatewayOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{IdempotencyKey, RequestId, SessionKey, SubscriptionId};

// Protocol types
pub use protocol::{ChatHistory, ChatMessage, Event, HelloOk, ParsedEvent};

// Session types
pub use session::Gateway;

// Settings types
pub use settings::{MemorySettings, SettingsStore};

// Transport types
pub use transport::EventFilter;
