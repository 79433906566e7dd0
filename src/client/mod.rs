//! Gateway connection client.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`GatewayClient`] | Handle to the connection actor |
//! | [`ConnectionState`] | Observable lifecycle state |
//! | [`GatewayBuilder`] | Fluent configuration builder |
//! | [`GatewayOptions`] | Timeouts, reconnect policy, limits |
//! | [`ClientIdentity`] | Identity announced in the handshake |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for gateway configuration.
pub mod builder;

/// Connection actor and its handle.
pub mod core;

/// Client identity.
pub mod identity;

/// Connection tuning.
pub mod options;

/// Connection state machine.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::GatewayBuilder;
pub use core::GatewayClient;
pub use identity::ClientIdentity;
pub use options::GatewayOptions;
pub use state::ConnectionState;
