//! The five independent workers that cooperate over a [`Session`](crate::Session)
//! (§4): Connector, Subscriber, Unsubscriber, Publisher and Dispatcher.
//!
//! Each runs as its own `tokio` task and communicates only through the
//! queues and shared state on [`SessionInner`](crate::session::SessionInner)
//! — never directly with one another.

pub(crate) mod connector;
pub(crate) mod dispatcher;
pub(crate) mod publisher;
pub(crate) mod subscriber;
pub(crate) mod unsubscriber;

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::BayeuxError;
use crate::session::{record_fatal, SessionInner};

/// A handle to one of the four "core" workers started by
/// [`Session::start`](crate::Session::start). The Dispatcher is tracked
/// separately (its identity matters for shutdown-from-callback, §4.7).
pub(crate) struct WorkerHandle {
    pub(crate) name: &'static str,
    pub(crate) handle: JoinHandle<()>,
}

/// Spawn `fut` as a named worker task, routing any error it returns into the
/// session's error-propagation policy (§7): the first worker to fail records
/// itself as the session's first error and triggers a session-wide shutdown.
pub(crate) fn spawn_worker<F>(inner: Arc<SessionInner>, name: &'static str, fut: F) -> WorkerHandle
where
    F: Future<Output = Result<(), BayeuxError>> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        if let Err(err) = fut.await {
            tracing::warn!(worker = name, error = %err, "worker exited with an error");
            record_fatal(&inner, err).await;
        }
    });
    WorkerHandle { name, handle }
}
