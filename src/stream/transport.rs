//! Transport seam between the connection manager and a streaming client.
//!
//! A transport is created per connection attempt from a URL plus
//! [`TransportOptions`]. It reports lifecycle and message events through the
//! [`EventSink`] it was created with; each sink is stamped with the
//! [`Generation`] of the attempt so the connection manager can discard events
//! from transports it has already replaced.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::stream::endpoint::StreamMethod;

/// Identifies one transport instance within a [`StreamConnection`](crate::stream::connection::StreamConnection).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Generation(u64);

impl Generation {
    /// Returns the generation that supersedes this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Returns the raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Readiness reported by a transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReadyState {
    /// Request issued, stream not yet established.
    Connecting,
    /// Stream established and delivering events.
    Open,
    /// Closed by either side.
    Closed,
}

/// Request options handed to [`TransportFactory::create`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransportOptions {
    /// Request method.
    pub method: StreamMethod,
    /// Request body, only set for REPORT.
    pub body: Option<String>,
    /// Additional request headers.
    pub headers: Vec<(String, String)>,
}

/// Errors reported by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("unexpected http status {0}")]
    InvalidStatus(StatusCode),

    /// Server answered with something other than `text/event-stream`.
    #[error("unexpected content type: {0}")]
    InvalidContentType(String),

    /// Event stream contained bytes that are not valid UTF-8.
    #[error("malformed event stream: {0}")]
    Malformed(#[from] std::str::Utf8Error),

    /// Server closed the stream.
    #[error("stream ended")]
    StreamEnded,

    /// Failure reported by a third-party transport.
    #[error("{0}")]
    Custom(String),
}

impl TransportError {
    /// Builds a [`TransportError::Custom`] from any displayable message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Named event delivered by a transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageEvent {
    /// Event name (`event:` field of the stream record).
    pub name: String,
    /// Raw payload (`data:` field).
    pub data: String,
}

#[derive(Debug)]
pub(crate) enum Signal {
    Open,
    Error(TransportError),
    Message(MessageEvent),
    ReconnectDue,
}

#[derive(Debug)]
pub(crate) struct Stamped {
    pub(crate) generation: Generation,
    pub(crate) signal: Signal,
}

/// Event callback surface handed to a transport at creation time.
///
/// All methods are fire-and-forget; once the owning connection has been
/// disconnected the events are dropped.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<Stamped>,
}

impl EventSink {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Stamped>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the transport this sink belongs to.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Reports that the stream is established.
    pub fn open(&self) {
        self.emit(Signal::Open);
    }

    /// Reports a transport failure.
    pub fn error(&self, error: TransportError) {
        self.emit(Signal::Error(error));
    }

    /// Delivers a named event.
    pub fn message(&self, name: impl Into<String>, data: impl Into<String>) {
        self.emit(Signal::Message(MessageEvent {
            name: name.into(),
            data: data.into(),
        }));
    }

    pub(crate) fn reconnect_due(&self) {
        self.emit(Signal::ReconnectDue);
    }

    fn emit(&self, signal: Signal) {
        let _ = self.tx.send(Stamped {
            generation: self.generation,
            signal,
        });
    }
}

/// Handle to a live transport.
pub trait EventTransport: Send {
    /// Current readiness of the underlying stream.
    fn ready_state(&self) -> ReadyState;

    /// Closes the stream. Must be idempotent.
    fn close(&mut self);
}

/// Creates transports for connection attempts.
pub trait TransportFactory: Send + Sync {
    /// Opens a transport to `url`. Events are reported through `sink`.
    ///
    /// Creation itself cannot fail; connection failures are reported as
    /// [`EventSink::error`].
    fn create(
        &self,
        url: &str,
        options: TransportOptions,
        sink: EventSink,
    ) -> Box<dyn EventTransport>;
}

/// Platform capabilities consumed by the stream connection.
#[derive(Clone, Default)]
pub struct Platform {
    transport_factory: Option<Arc<dyn TransportFactory>>,
    supports_report: bool,
}

impl Platform {
    /// Platform backed by `factory`. REPORT support defaults to off.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            transport_factory: Some(factory),
            supports_report: false,
        }
    }

    /// Platform with no streaming transport. Connecting is a no-op.
    pub fn without_transport() -> Self {
        Self::default()
    }

    /// Platform using the built-in HTTP event-source transport.
    pub fn http() -> Self {
        Self::new(Arc::new(crate::sse::HttpEventSource::new())).with_report_support(true)
    }

    /// Declares whether the transport can send body-bearing REPORT requests.
    pub fn with_report_support(mut self, supported: bool) -> Self {
        self.supports_report = supported;
        self
    }

    /// Returns the transport factory, if any.
    pub fn transport_factory(&self) -> Option<&Arc<dyn TransportFactory>> {
        self.transport_factory.as_ref()
    }

    /// Whether REPORT requests are supported.
    pub fn supports_report(&self) -> bool {
        self.supports_report
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("transport_factory", &self.transport_factory.is_some())
            .field("supports_report", &self.supports_report)
            .finish()
    }
}
