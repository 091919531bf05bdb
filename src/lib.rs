//! Realtime flag update stream for feature-flag client SDKs.
//!
//! The crate is organized by concern:
//! - `stream`: connection lifecycle, endpoint selection, failure debouncing,
//!   and named event dispatch.
//! - `sse`: built-in HTTP event-source transport used by [`stream::Platform::http`].

/// Built-in HTTP event-source transport.
pub mod sse;
/// Stream connection, configuration, and transport seam.
pub mod stream;
