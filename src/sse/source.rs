//! `reqwest`-backed event-source transport.
//!
//! Each transport issues one request and reads the body until it ends or
//! fails, then reports a single error and stops. Retrying is left to
//! [`StreamConnection`](crate::stream::connection::StreamConnection).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::sse::parser::EventParser;
use crate::stream::endpoint::StreamMethod;
use crate::stream::transport::{
    EventSink, EventTransport, ReadyState, TransportError, TransportFactory, TransportOptions,
};

const EVENT_STREAM_MIME: &str = "text/event-stream";

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

/// Transport factory issuing event-stream requests over HTTP.
#[derive(Clone, Debug, Default)]
pub struct HttpEventSource {
    http: Client,
}

impl HttpEventSource {
    /// Creates a factory with a default `reqwest` client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory sharing an existing client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn build_request(
        &self,
        url: &str,
        options: TransportOptions,
    ) -> Result<RequestBuilder, TransportError> {
        let method = match options.method {
            StreamMethod::Get => Method::GET,
            StreamMethod::Report => Method::from_bytes(StreamMethod::Report.as_str().as_bytes())
                .map_err(|err| TransportError::custom(err.to_string()))?,
        };

        let mut builder = self
            .http
            .request(method, url)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache");
        for (name, value) in options.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = options.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }
        Ok(builder)
    }
}

impl TransportFactory for HttpEventSource {
    fn create(
        &self,
        url: &str,
        options: TransportOptions,
        sink: EventSink,
    ) -> Box<dyn EventTransport> {
        let state = Arc::new(AtomicU8::new(CONNECTING));

        let request = match self.build_request(url, options) {
            Ok(request) => request,
            Err(err) => return Box::new(HttpEventStream::failed(state, sink, err)),
        };
        let Ok(runtime) = Handle::try_current() else {
            let err = TransportError::custom("no tokio runtime available");
            return Box::new(HttpEventStream::failed(state, sink, err));
        };

        let task = runtime.spawn(read_stream(request, Arc::clone(&state), sink));
        Box::new(HttpEventStream {
            state,
            task: Some(task),
        })
    }
}

/// Live HTTP event stream.
#[derive(Debug)]
pub struct HttpEventStream {
    state: Arc<AtomicU8>,
    task: Option<JoinHandle<()>>,
}

impl HttpEventStream {
    fn failed(state: Arc<AtomicU8>, sink: EventSink, err: TransportError) -> Self {
        state.store(CLOSED, Ordering::SeqCst);
        sink.error(err);
        Self { state, task: None }
    }
}

impl EventTransport for HttpEventStream {
    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::SeqCst) {
            CONNECTING => ReadyState::Connecting,
            OPEN => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }

    fn close(&mut self) {
        self.state.store(CLOSED, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HttpEventStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_stream(request: RequestBuilder, state: Arc<AtomicU8>, sink: EventSink) {
    let error = match pump_events(request, &state, &sink).await {
        Ok(()) => TransportError::StreamEnded,
        Err(err) => err,
    };
    state.store(CLOSED, Ordering::SeqCst);
    debug!(
        event = "event_source_closed",
        generation = sink.generation().get(),
        error = %error
    );
    sink.error(error);
}

async fn pump_events(
    request: RequestBuilder,
    state: &AtomicU8,
    sink: &EventSink,
) -> Result<(), TransportError> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::InvalidStatus(status));
    }
    if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
        let content_type = content_type.to_str().unwrap_or_default();
        if !content_type.starts_with(EVENT_STREAM_MIME) {
            return Err(TransportError::InvalidContentType(content_type.to_string()));
        }
    }

    state.store(OPEN, Ordering::SeqCst);
    sink.open();

    let mut parser = EventParser::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        for event in parser.feed(&chunk?)? {
            sink.message(event.name, event.data);
        }
    }
    Ok(())
}
