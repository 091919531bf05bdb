//! Stream connection lifecycle and failure recovery.
//!
//! [`StreamConnection`] owns at most one live transport. Every transport is
//! created with an [`EventSink`] stamped with a fresh [`Generation`]; a single
//! event-loop task per `connect` drains those sinks and drops anything whose
//! generation is no longer current. On error the transport is closed and a
//! replacement is opened after the configured delay, indefinitely, until
//! [`StreamConnection::disconnect`] is called.
//!
//! Handlers run on the event-loop task. A panicking handler is logged and the
//! loop keeps going. `disconnect` and `connect` block until a handler running
//! on another thread returns, so no handler of a torn-down session runs after
//! either call returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::stream::config::{ConfigError, StreamConfig};
use crate::stream::debounce::FailureDebouncer;
use crate::stream::dispatch::HandlerRegistry;
use crate::stream::endpoint::select_endpoint;
use crate::stream::transport::{
    EventSink, EventTransport, Generation, Platform, ReadyState, Signal, Stamped,
    TransportError, TransportFactory, TransportOptions,
};

/// Observable state of a [`StreamConnection`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// `connect` has never opened a transport.
    Idle,
    /// Current transport is establishing the stream.
    Connecting,
    /// Current transport is delivering events.
    Open,
    /// Transport closed by an error (reconnect pending) or by `disconnect`.
    Closed,
}

impl From<ReadyState> for ConnectionState {
    fn from(state: ReadyState) -> Self {
        match state {
            ReadyState::Connecting => Self::Connecting,
            ReadyState::Open => Self::Open,
            ReadyState::Closed => Self::Closed,
        }
    }
}

/// Long-lived flag update stream with automatic reconnects.
///
/// All lifecycle transitions run on one Tokio task per `connect`; `connect`
/// must therefore be called from within a Tokio runtime; outside of one it is
/// a no-op.
#[derive(Debug)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

impl StreamConnection {
    /// Creates an idle connection. No transport is opened until
    /// [`connect`](Self::connect).
    pub fn new(config: StreamConfig, platform: Platform) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                platform,
                shared: Mutex::new(Shared::default()),
                dispatch_done: Condvar::new(),
            }),
        })
    }

    /// Returns the configuration this connection was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }

    /// Opens the stream for `identity`, routing named events to `handlers`.
    ///
    /// Any previous session on this connection is torn down first. When the
    /// platform has no transport factory this does nothing.
    pub fn connect(&self, identity: Value, handlers: HandlerRegistry) {
        let Some(factory) = self.inner.platform.transport_factory() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            debug!(event = "stream_connect_skipped", reason = "no tokio runtime");
            return;
        };

        let mut shared = self.inner.lock();
        shared.teardown();
        let mut shared = self.inner.wait_for_dispatch(shared);

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = shared.issue_generation();
        let driver = runtime.spawn(run_event_loop(Arc::clone(&self.inner), rx, handlers));
        shared.session = Some(Session {
            identity,
            tx,
            runtime,
            driver,
        });
        shared.started = true;

        self.inner.open_transport(&mut shared, factory.as_ref(), generation);
    }

    /// Cancels any pending reconnect and closes the current transport.
    ///
    /// Safe to call at any time, including before `connect` and repeatedly.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        if shared.session.is_some() || shared.transport.is_some() {
            debug!(event = "stream_disconnect");
        }
        shared.teardown();
        drop(self.inner.wait_for_dispatch(shared));
    }

    /// Whether the current transport is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current state, derived from the live transport's readiness.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state()
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        let mut shared = self.inner.lock();
        shared.teardown();
        drop(self.inner.wait_for_dispatch(shared));
    }
}

#[derive(Debug)]
struct Inner {
    config: StreamConfig,
    platform: Platform,
    shared: Mutex<Shared>,
    dispatch_done: Condvar,
}

struct Session {
    identity: Value,
    tx: mpsc::UnboundedSender<Stamped>,
    runtime: Handle,
    driver: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    next_generation: Generation,
    current: Option<Generation>,
    started: bool,
    session: Option<Session>,
    transport: Option<Box<dyn EventTransport>>,
    failures: FailureDebouncer,
    pending_reconnect: Option<JoinHandle<()>>,
    /// Thread running a handler, if any.
    dispatching: Option<ThreadId>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("current", &self.current)
            .field("state", &self.state())
            .field("failure_streak", &self.failures.streak())
            .field("reconnect_pending", &self.pending_reconnect.is_some())
            .field("dispatching", &self.dispatching.is_some())
            .finish()
    }
}

impl Shared {
    fn issue_generation(&mut self) -> Generation {
        let generation = self.next_generation;
        self.next_generation = generation.next();
        self.current = Some(generation);
        generation
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.current == Some(generation)
    }

    fn state(&self) -> ConnectionState {
        match &self.transport {
            Some(transport) => transport.ready_state().into(),
            None if self.started => ConnectionState::Closed,
            None => ConnectionState::Idle,
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.pending_reconnect.take() {
            timer.abort();
        }
    }

    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if transport.ready_state() != ReadyState::Closed {
                transport.close();
            }
        }
    }

    fn teardown(&mut self) {
        self.cancel_reconnect();
        self.current = None;
        if let Some(session) = self.session.take() {
            session.driver.abort();
        }
        self.close_transport();
        self.transport = None;
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until no handler is running on another thread. A handler that
    /// calls back into the connection is not waited for.
    fn wait_for_dispatch<'a>(&'a self, shared: MutexGuard<'a, Shared>) -> MutexGuard<'a, Shared> {
        let current = thread::current().id();
        self.dispatch_done
            .wait_while(shared, |shared| {
                shared.dispatching.is_some_and(|id| id != current)
            })
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks a handler as running when `generation` is still current.
    fn begin_dispatch(&self, generation: Generation) -> bool {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            return false;
        }
        shared.dispatching = Some(thread::current().id());
        true
    }

    fn end_dispatch(&self) {
        self.lock().dispatching = None;
        self.dispatch_done.notify_all();
    }

    fn open_transport(
        &self,
        shared: &mut Shared,
        factory: &dyn TransportFactory,
        generation: Generation,
    ) {
        let Some(session) = shared.session.as_ref() else {
            return;
        };

        let request = select_endpoint(
            &self.config,
            self.platform.supports_report(),
            &session.identity,
        );
        debug!(
            event = "stream_connecting",
            generation = generation.get(),
            method = %request.method,
            path = request.url.path(),
        );

        let options = TransportOptions {
            method: request.method,
            body: request.body,
            headers: self.config.headers.clone(),
        };
        let sink = EventSink::new(generation, session.tx.clone());
        let transport = factory.create(request.url.as_str(), options, sink);

        shared.close_transport();
        shared.transport = Some(transport);
    }

    fn on_open(&self, generation: Generation) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            debug!(event = "stream_stale_signal", signal = "open", generation = generation.get());
            return;
        }
        shared.failures.reset();
        debug!(event = "stream_open", generation = generation.get());
    }

    fn on_error(&self, generation: Generation, error: TransportError) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            debug!(event = "stream_stale_signal", signal = "error", generation = generation.get());
            return;
        }

        shared.close_transport();
        let delay = self.config.reconnect_delay;
        shared.failures.record_failure(&error, delay);

        let Some(session) = shared.session.as_ref() else {
            return;
        };
        let next = shared.next_generation;
        let sink = EventSink::new(next, session.tx.clone());
        let deadline = Instant::now() + delay;
        let timer = session.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sink.reconnect_due();
        });

        shared.cancel_reconnect();
        shared.issue_generation();
        shared.pending_reconnect = Some(timer);
        debug!(
            event = "stream_reconnect_scheduled",
            generation = next.get(),
            delay_ms = delay.as_millis() as u64,
            failure_streak = shared.failures.streak(),
        );
    }

    fn on_reconnect_due(&self, generation: Generation) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            debug!(event = "stream_stale_signal", signal = "reconnect", generation = generation.get());
            return;
        }
        shared.pending_reconnect = None;

        if let Some(factory) = self.platform.transport_factory() {
            self.open_transport(&mut shared, factory.as_ref(), generation);
        }
    }
}

async fn run_event_loop(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<Stamped>,
    mut handlers: HandlerRegistry,
) {
    while let Some(Stamped { generation, signal }) = rx.recv().await {
        match signal {
            Signal::Open => inner.on_open(generation),
            Signal::Error(error) => inner.on_error(generation, error),
            Signal::ReconnectDue => inner.on_reconnect_due(generation),
            Signal::Message(message) => {
                // Handlers run without the lock so they may call back into
                // the connection.
                if !inner.begin_dispatch(generation) {
                    debug!(
                        event = "stream_stale_signal",
                        signal = "message",
                        generation = generation.get()
                    );
                    continue;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    handlers.dispatch(&message.name, &message.data)
                }));
                inner.end_dispatch();

                match outcome {
                    Ok(true) => {}
                    Ok(false) => debug!(event = "stream_event_unhandled", name = %message.name),
                    Err(_) => warn!(
                        event = "stream_handler_panicked",
                        name = %message.name,
                        "stream event handler for {} panicked",
                        message.name
                    ),
                }
            }
        }
    }
}
