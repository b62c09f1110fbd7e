//! The [`Session`] handle and the shared state its workers cooperate over
//! (§3, §4, §5, §7).

mod builder;
pub(crate) mod handshake;
mod state;

pub use builder::SessionBuilder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::{BayeuxError, BuildError};
use crate::protocol::DisconnectRequest;
use crate::subscription::{Callback, Subscriptions};
use crate::transport::BayeuxTransport;
use crate::workers::{self, WorkerHandle};

use state::SharedState;

/// One item on the publish queue: a channel and its already-serialized
/// payload (§4.5).
pub(crate) struct PublishOp {
    pub(crate) channel: String,
    pub(crate) payload: Value,
}

/// The state shared by a [`Session`] handle and every worker task it owns.
///
/// Workers only ever see this through an `Arc`, never the [`Session`]
/// wrapper itself — that keeps the public surface (builder-driven
/// construction, lifecycle methods) separate from the plumbing they share.
pub(crate) struct SessionInner {
    pub(crate) transport: Arc<dyn BayeuxTransport>,
    pub(crate) state: SharedState,
    pub(crate) subscriptions: Subscriptions,
    pub(crate) recovery_in_progress: AtomicBool,
    pub(crate) cancel: CancellationToken,

    pub(crate) successive_timeout_threshold: u32,
    pub(crate) timeout_wait: Duration,

    pub(crate) subscribe_tx: mpsc::UnboundedSender<String>,
    pub(crate) subscribe_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,

    pub(crate) unsubscribe_tx: mpsc::UnboundedSender<String>,
    pub(crate) unsubscribe_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,

    pub(crate) publish_tx: mpsc::UnboundedSender<PublishOp>,
    pub(crate) publish_rx: Mutex<Option<mpsc::UnboundedReceiver<PublishOp>>>,

    pub(crate) inbox_tx: mpsc::UnboundedSender<Vec<crate::protocol::Event>>,
    pub(crate) inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<crate::protocol::Event>>>>,

    started: AtomicBool,
    core_workers: Mutex<Vec<WorkerHandle>>,

    executing: AtomicBool,
    go_called: AtomicBool,
    dispatcher_task_id: Mutex<Option<tokio::task::Id>>,
    dispatcher_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,

    shutdown_started: AtomicBool,
    shutdown_done_flag: AtomicBool,
    shutdown_done_notify: Notify,
    first_error: Mutex<Option<Arc<BayeuxError>>>,
}

/// A live Bayeux session: one handshake, one `clientId`, and the five
/// workers cooperating around it (§3, §4).
///
/// Cloning a `Session` gives another handle to the same underlying workers;
/// the workers themselves stop only once every clone has been dropped (see
/// the `Drop` impl on the inner state) or [`Session::shutdown`] has been
/// called.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start building a [`Session`] against `endpoint`.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(endpoint)
    }

    async fn new(
        transport: Arc<dyn BayeuxTransport>,
        successive_timeout_threshold: u32,
        timeout_wait: Duration,
        auto_start: bool,
        handshake_extra: serde_json::Map<String, Value>,
    ) -> Result<Session, BuildError> {
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::unbounded_channel();
        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(SessionInner {
            transport,
            state: SharedState::new(),
            subscriptions: Subscriptions::new(),
            recovery_in_progress: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            successive_timeout_threshold,
            timeout_wait,
            subscribe_tx,
            subscribe_rx: Mutex::new(Some(subscribe_rx)),
            unsubscribe_tx,
            unsubscribe_rx: Mutex::new(Some(unsubscribe_rx)),
            publish_tx,
            publish_rx: Mutex::new(Some(publish_rx)),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            started: AtomicBool::new(false),
            core_workers: Mutex::new(Vec::new()),
            executing: AtomicBool::new(false),
            go_called: AtomicBool::new(false),
            dispatcher_task_id: Mutex::new(None),
            dispatcher_handle: Mutex::new(None),
            shutdown_started: AtomicBool::new(false),
            shutdown_done_flag: AtomicBool::new(false),
            shutdown_done_notify: Notify::new(),
            first_error: Mutex::new(None),
        });

        handshake::run(&inner, Some(handshake_extra))
            .await
            .map_err(BuildError::Handshake)?;

        let session = Session { inner };
        if auto_start {
            session.start();
        }
        Ok(session)
    }

    /// Start the four core workers (Connector, Subscriber, Unsubscriber,
    /// Publisher). Idempotent: later calls are no-ops.
    ///
    /// Called automatically by [`SessionBuilder::build`] unless
    /// [`SessionBuilder::auto_start`] was set to `false`.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let connector = workers::spawn_worker(
            Arc::clone(&inner),
            "Connector",
            workers::connector::run(Arc::clone(&inner)),
        );
        let subscriber = workers::spawn_worker(
            Arc::clone(&inner),
            "Subscriber",
            workers::subscriber::run(Arc::clone(&inner)),
        );
        let unsubscriber = workers::spawn_worker(
            Arc::clone(&inner),
            "Unsubscriber",
            workers::unsubscriber::run(Arc::clone(&inner)),
        );
        let publisher = workers::spawn_worker(
            Arc::clone(&inner),
            "Publisher",
            workers::publisher::run(Arc::clone(&inner)),
        );

        let mut core_workers = self
            .inner
            .core_workers
            .try_lock()
            .expect("core_workers is only locked here and during shutdown, which cannot race construction");
        core_workers.extend([connector, subscriber, unsubscriber, publisher]);
    }

    /// Register `callback` for `channel`, enqueueing a `/meta/subscribe` the
    /// first time this channel is subscribed (§4.3, invariant 2).
    pub async fn subscribe(&self, channel: impl Into<String>, callback: Callback) {
        enqueue_subscribe(&self.inner, channel.into(), callback).await;
    }

    /// Remove `channel` from the callback table immediately and enqueue a
    /// `/meta/unsubscribe` (§4.4, §9 Open Question 1).
    pub async fn unsubscribe(&self, channel: impl Into<String>) {
        let channel = channel.into();
        self.inner.subscriptions.remove(&channel).await;
        let _ = self.inner.unsubscribe_tx.send(channel);
    }

    /// Enqueue a publish of `payload` on `channel` (§4.5).
    pub fn publish(&self, channel: impl Into<String>, payload: Value) {
        let _ = self.inner.publish_tx.send(PublishOp {
            channel: channel.into(),
            payload,
        });
    }

    /// Start the Dispatcher as a background task if it isn't already running
    /// (either via a prior `go` or an in-progress `block`). Idempotent.
    ///
    /// Returns once the Dispatcher has been handed off, without waiting for
    /// it to finish; pair with [`Session::block`] or [`Session::shutdown`]
    /// elsewhere to observe completion.
    pub async fn go(&self) {
        if self.inner.go_called.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.executing.swap(true, Ordering::AcqRel) {
            // Someone else (a concurrent `block`) already claimed the
            // Dispatcher role; nothing left to spawn.
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            *inner.dispatcher_task_id.lock().await = tokio::task::try_id();
            if let Err(err) = workers::dispatcher::run(Arc::clone(&inner)).await {
                record_fatal(&inner, err).await;
            }
        });
        *self.inner.dispatcher_handle.lock().await = Some(handle);

        tokio::task::yield_now().await;
    }

    /// Run the Dispatcher to completion, either inline (if it isn't running
    /// yet) or by waiting for it and the rest of the session to finish
    /// shutting down.
    ///
    /// # Errors
    ///
    /// Returns the session's first recorded fatal error, if one occurred.
    pub async fn block(&self) -> Result<(), BayeuxError> {
        if !self.inner.executing.swap(true, Ordering::AcqRel) {
            *self.inner.dispatcher_task_id.lock().await = tokio::task::try_id();
            if let Err(err) = workers::dispatcher::run(Arc::clone(&self.inner)).await {
                record_fatal(&self.inner, err).await;
            }
        } else {
            wait_shutdown_done(&self.inner).await;
        }

        match self.inner.first_error.lock().await.as_ref() {
            Some(err) => Err((**err).clone()),
            None => Ok(()),
        }
    }

    /// Force `recovery_in_progress` to `value`, bypassing the Connector.
    /// Test-only seam for exercising the Dispatcher's gating (§4.7) without
    /// racing the real recovery sequence's timing.
    #[cfg(test)]
    pub(crate) fn set_recovery_in_progress_for_test(&self, value: bool) {
        self.inner.recovery_in_progress.store(value, Ordering::Release);
    }

    /// POST `/meta/disconnect` without coordinating with the rest of the
    /// session's lifecycle. [`Session::shutdown`] calls this as its last
    /// step; call it directly for a bare best-effort disconnect.
    ///
    /// # Errors
    ///
    /// Returns any transport error encountered sending the request.
    pub async fn disconnect(&self) -> Result<(), BayeuxError> {
        send_disconnect(&self.inner).await
    }

    /// Cancel every worker, join the four core workers (and the Dispatcher,
    /// unless this is called from inside the Dispatcher's own callback —
    /// joining it there would deadlock), then disconnect.
    ///
    /// Idempotent and safe to call concurrently: only the first caller does
    /// the work, every caller returns once it's done.
    pub async fn shutdown(&self) {
        do_shutdown(&self.inner).await;
        wait_shutdown_done(&self.inner).await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.inner.state.client_id())
            .finish_non_exhaustive()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        // Best-effort: if nobody called `shutdown`, at least stop leaking
        // worker tasks. Mirrors the teacher's `Client` aborting its handler
        // task on drop rather than attempting a graceful async teardown from
        // a sync context.
        self.cancel.cancel();
        if let Ok(mut workers) = self.core_workers.try_lock() {
            for worker in workers.drain(..) {
                worker.handle.abort();
            }
        }
        if let Ok(mut dispatcher) = self.dispatcher_handle.try_lock() {
            if let Some(handle) = dispatcher.take() {
                handle.abort();
            }
        }
    }
}

/// Add `(channel, callback)` to the table, enqueueing a `/meta/subscribe`
/// only the first time this channel is seen. Shared by [`Session::subscribe`]
/// and the Connector's resubscribe routine (§4.6).
pub(crate) async fn enqueue_subscribe(inner: &Arc<SessionInner>, channel: String, callback: Callback) {
    let is_new = inner.subscriptions.add(&channel, callback).await;
    if is_new {
        let _ = inner.subscribe_tx.send(channel);
    }
}

/// Record `err` as the session's first fatal error (first-wins) and spawn
/// the shutdown sequence, unless a shutdown has already started (§7).
pub(crate) async fn record_fatal(inner: &Arc<SessionInner>, err: BayeuxError) {
    if inner.shutdown_started.load(Ordering::Acquire) {
        tracing::debug!(error = %err, "ignoring error, shutdown already in progress");
        return;
    }

    let mut first_error = inner.first_error.lock().await;
    if first_error.is_none() {
        tracing::error!(error = %err, "fatal session error, shutting down");
        *first_error = Some(Arc::new(err));
        drop(first_error);

        let inner = Arc::clone(inner);
        tokio::spawn(async move { do_shutdown(&inner).await });
    }
}

/// The actual shutdown sequence, guarded so only the first caller runs it.
/// Every caller (direct or via [`record_fatal`]) can rely on
/// [`wait_shutdown_done`] resolving once this returns, regardless of who won
/// the race to run it.
async fn do_shutdown(inner: &Arc<SessionInner>) {
    if inner.shutdown_started.swap(true, Ordering::AcqRel) {
        return;
    }

    inner.cancel.cancel();

    let current_task = tokio::task::try_id();
    let dispatcher_task = *inner.dispatcher_task_id.lock().await;
    let called_from_dispatcher = current_task.is_some() && current_task == dispatcher_task;

    let mut core_workers = std::mem::take(&mut *inner.core_workers.lock().await);
    for worker in core_workers.drain(..) {
        let _ = worker.handle.await;
    }

    if !called_from_dispatcher {
        if let Some(handle) = inner.dispatcher_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    if let Err(err) = send_disconnect(inner).await {
        tracing::warn!(error = %err, "disconnect failed during shutdown");
    }

    inner.shutdown_done_flag.store(true, Ordering::Release);
    inner.shutdown_done_notify.notify_waiters();
}

async fn wait_shutdown_done(inner: &SessionInner) {
    if inner.shutdown_done_flag.load(Ordering::Acquire) {
        return;
    }
    let notified = inner.shutdown_done_notify.notified();
    if inner.shutdown_done_flag.load(Ordering::Acquire) {
        return;
    }
    notified.await;
}

async fn send_disconnect(inner: &Arc<SessionInner>) -> Result<(), BayeuxError> {
    let Some(client_id) = inner.state.client_id() else {
        return Ok(());
    };
    let id = inner.state.next_message_id();
    let request = DisconnectRequest {
        channel: "/meta/disconnect",
        client_id: &client_id,
        id,
    };
    let body = serde_json::to_value(&request).expect("DisconnectRequest always serializes");
    inner.transport.post(body, None).await?;
    Ok(())
}
