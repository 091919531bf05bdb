//! Built-in HTTP event-source transport.
//!
//! - `parser`: incremental `text/event-stream` record parser.
//! - `source`: [`HttpEventSource`] factory and its [`HttpEventStream`] handle.

/// Event-stream record parser.
pub mod parser;
/// HTTP transport implementation.
pub mod source;

pub use parser::{EventParser, ParsedEvent};
pub use source::{HttpEventSource, HttpEventStream};
