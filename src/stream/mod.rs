//! Realtime stream modules.
//!
//! - `config`: immutable connection settings.
//! - `endpoint`: request URL, method, and body selection.
//! - `transport`: transport traits, event sinks, and platform capabilities.
//! - `dispatch`: named event handler registry.
//! - `debounce`: failure streak tracking and warning gate.
//! - `connection`: connection lifecycle and reconnect handling.

/// Stream configuration.
pub mod config;
/// Connection lifecycle and reconnect handling.
pub mod connection;
/// Failure streak tracking.
pub mod debounce;
/// Named event routing.
pub mod dispatch;
/// Endpoint selection.
pub mod endpoint;
/// Transport seam and platform capabilities.
pub mod transport;

pub use config::{ConfigError, StreamConfig};
pub use connection::{ConnectionState, StreamConnection};
pub use dispatch::{EventHandler, HandlerRegistry, StreamEventName};
pub use endpoint::{StreamMethod, StreamRequest};
pub use transport::{
    EventSink, EventTransport, Generation, MessageEvent, Platform, ReadyState, TransportError,
    TransportFactory, TransportOptions,
};
