//! Resilient server-sent-event client.
//!
//! [`SseClient`] owns one logical subscription at a time. Each call to
//! [`SseClient::reconnect_with`] supersedes the previous connection: it bumps the connection id,
//! aborts the old read task and spawns a new one. A watchdog task restarts the current
//! connection when no event has been seen for longer than the keep-alive tolerance.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::features::Feature;
use crate::http::{stream_request, Transport};
use crate::requests::FeatureRequest;
use crate::sse::events::FeatureEvent;
use crate::sse::parser::SseParser;

/// Delay before retrying after a failed or dropped connection.
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// The connection is considered dead after this many missed keep-alive intervals.
const KEEP_ALIVE_TOLERANCE: u32 = 3;

type EventHandler = Arc<dyn Fn(&FeatureEvent) + Send + Sync>;

struct PendingSnapshot {
    connection_id: u64,
    sender: oneshot::Sender<HashMap<String, Feature>>,
}

struct ConnectionState {
    scope: FeatureRequest,
    task: Option<JoinHandle<()>>,
    pending: Option<PendingSnapshot>,
}

struct SseInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    on_event: EventHandler,
    /// Monotonic id of the current connection. A read task whose id no longer matches has been
    /// superseded and must stop applying events.
    connection_id: AtomicU64,
    connected: AtomicBool,
    last_event: Mutex<Instant>,
    state: Mutex<ConnectionState>,
}

pub struct SseClient {
    inner: Arc<SseInner>,
    watchdog: JoinHandle<()>,
}

impl SseClient {
    /// Create a client. No connection is opened until [`SseClient::reconnect_with`] is called;
    /// `on_event` runs on the read task for every decoded event, before any waiting snapshot
    /// receiver is woken.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        on_event: EventHandler,
    ) -> SseClient {
        let keep_alive = config.cache.keep_alive_interval;
        let inner = Arc::new(SseInner {
            config,
            transport,
            on_event,
            connection_id: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            last_event: Mutex::new(Instant::now()),
            state: Mutex::new(ConnectionState {
                scope: FeatureRequest::new(),
                task: None,
                pending: None,
            }),
        });
        let watchdog = tokio::spawn(Self::watchdog(Arc::downgrade(&inner), keep_alive));
        SseClient { inner, watchdog }
    }

    /// Replace the subscription scope and (re)connect.
    ///
    /// The returned receiver resolves with the first full snapshot delivered on the new
    /// connection. A later call to `reconnect_with` supersedes this one, in which case the
    /// receiver is dropped without a value.
    pub fn reconnect_with(
        &self,
        scope: FeatureRequest,
    ) -> oneshot::Receiver<HashMap<String, Feature>> {
        let id = self.inner.connection_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = oneshot::channel();

        let mut state = self
            .inner
            .state
            .lock()
            .expect("thread holding connection state lock should not panic");
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.scope = scope.clone();
        state.pending = Some(PendingSnapshot {
            connection_id: id,
            sender,
        });
        state.task = Some(tokio::spawn(Self::run_connection(
            Arc::clone(&self.inner),
            id,
            scope,
        )));
        receiver
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Terminate the active connection. Idempotent; the scope is kept, so a later
    /// [`SseClient::reconnect_with`] resubscribes from where it left off.
    pub fn disconnect(&self) {
        self.close();
    }

    /// Drop the current connection without clearing the scope; the watchdog will not reopen it.
    pub fn close(&self) {
        // Invalidate the current id so a task in the middle of a retry loop stops too.
        self.inner.connection_id.fetch_add(1, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        let mut state = self
            .inner
            .state
            .lock()
            .expect("thread holding connection state lock should not panic");
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.pending = None;
    }

    async fn watchdog(inner: Weak<SseInner>, keep_alive: Duration) {
        let tolerance = keep_alive * KEEP_ALIVE_TOLERANCE;
        loop {
            tokio::time::sleep(tolerance).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if !inner.connected.load(Ordering::SeqCst) {
                continue;
            }
            let last_event = *inner
                .last_event
                .lock()
                .expect("thread holding liveness lock should not panic");
            if last_event.elapsed() <= tolerance {
                continue;
            }

            log::warn!(
                target: "flagstream",
                "no event for {:?} on the streaming connection, reconnecting",
                last_event.elapsed(),
            );
            let id = inner.connection_id.fetch_add(1, Ordering::SeqCst) + 1;
            let mut state = inner
                .state
                .lock()
                .expect("thread holding connection state lock should not panic");
            if let Some(task) = state.task.take() {
                task.abort();
            }
            let scope = state.scope.clone();
            state.task = Some(tokio::spawn(Self::run_connection(
                Arc::clone(&inner),
                id,
                scope,
            )));
        }
    }

    async fn run_connection(inner: Arc<SseInner>, id: u64, scope: FeatureRequest) {
        loop {
            if inner.connection_id.load(Ordering::SeqCst) != id {
                return;
            }

            let request = match stream_request(&inner.config, &scope) {
                Ok(request) => request,
                Err(err) => {
                    log::error!(target: "flagstream", "cannot build streaming request: {err}");
                    return;
                }
            };

            let mut lines = match inner.transport.open_stream(request).await {
                Ok(lines) => lines,
                Err(err) => {
                    inner.connected.store(false, Ordering::SeqCst);
                    log::warn!(
                        target: "flagstream",
                        "streaming connection failed ({err}), retrying in {RETRY_DELAY:?}",
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            inner.connected.store(true, Ordering::SeqCst);
            *inner
                .last_event
                .lock()
                .expect("thread holding liveness lock should not panic") = Instant::now();
            log::debug!(target: "flagstream", "streaming connection {id} established");

            let mut parser = SseParser::new();
            while let Some(line) = lines.next().await {
                if inner.connection_id.load(Ordering::SeqCst) != id {
                    return;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        log::warn!(target: "flagstream", "streaming read failed: {err}");
                        break;
                    }
                };
                // Any traffic proves the connection is alive, heartbeats included.
                *inner
                    .last_event
                    .lock()
                    .expect("thread holding liveness lock should not panic") = Instant::now();

                let Some(record) = parser.push_line(&line) else {
                    continue;
                };
                let Some(event) = FeatureEvent::decode(&record) else {
                    continue;
                };

                // The handler applies the event to the cache before any snapshot waiter wakes,
                // so a caller resolving right after the snapshot sees a consistent cache.
                (inner.on_event)(&event);

                if let FeatureEvent::FeatureStates(snapshot) = &event {
                    let pending = {
                        let mut state = inner
                            .state
                            .lock()
                            .expect("thread holding connection state lock should not panic");
                        match &state.pending {
                            Some(p) if p.connection_id == id => state.pending.take(),
                            _ => None,
                        }
                    };
                    if let Some(pending) = pending {
                        let _ = pending.sender.send(snapshot.clone());
                    }
                }
            }

            inner.connected.store(false, Ordering::SeqCst);
            log::warn!(
                target: "flagstream",
                "streaming connection {id} closed, retrying in {RETRY_DELAY:?}",
            );
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        self.watchdog.abort();
        if let Ok(mut state) = self.inner.state.lock() {
            if let Some(task) = state.task.take() {
                task.abort();
            }
        }
    }
}
