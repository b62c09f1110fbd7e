//! The Dispatcher: drains the inbox and invokes user callbacks, holding
//! delivery while a recovery is in progress (§4.7).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BayeuxError;
use crate::session::SessionInner;

/// How often to re-check `recovery_in_progress` while holding delivery.
const RECOVERY_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub(crate) async fn run(inner: Arc<SessionInner>) -> Result<(), BayeuxError> {
    let mut rx = inner
        .inbox_rx
        .lock()
        .await
        .take()
        .expect("Dispatcher started more than once");

    loop {
        // `biased` keeps this polling `rx.recv()` first on every iteration,
        // so any batch already queued before cancellation is still drained
        // before the worker exits.
        let batch = tokio::select! {
            biased;
            batch = rx.recv() => batch,
            () = inner.cancel.cancelled() => None,
        };

        let Some(batch) = batch else {
            return Ok(());
        };

        while inner.recovery_in_progress.load(Ordering::Acquire) {
            tokio::time::sleep(RECOVERY_POLL_INTERVAL).await;
        }

        for event in batch {
            match inner.subscriptions.callbacks_for(&event.channel).await {
                Some(callbacks) => {
                    for callback in callbacks {
                        callback(event.clone());
                    }
                }
                None => {
                    return Err(BayeuxError::ProtocolError(format!(
                        "event pushed on channel {} with no registered callback",
                        event.channel
                    )));
                }
            }
        }
    }
}
