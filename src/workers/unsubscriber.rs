//! The Unsubscriber: drains the unsubscribe queue and POSTs
//! `/meta/unsubscribe`, best-effort (§4.4 — unlike the Subscriber, it does
//! not interpret per-element errors, only timeouts).

use std::sync::Arc;

use crate::error::BayeuxError;
use crate::protocol::UnsubscribeRequest;
use crate::session::SessionInner;

pub(crate) async fn run(inner: Arc<SessionInner>) -> Result<(), BayeuxError> {
    let mut rx = inner
        .unsubscribe_rx
        .lock()
        .await
        .take()
        .expect("Unsubscriber started more than once");
    let mut successive_timeouts: u32 = 0;

    loop {
        let channel = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Ok(()),
            item = rx.recv() => match item {
                Some(channel) => channel,
                None => return Ok(()),
            },
        };

        let client_id = inner
            .state
            .client_id()
            .expect("Unsubscriber only runs after the initial handshake");
        let id = inner.state.next_message_id();
        let request = UnsubscribeRequest {
            channel: "/meta/unsubscribe",
            subscription: &channel,
            client_id: &client_id,
            id,
        };
        let body = serde_json::to_value(&request).expect("UnsubscribeRequest always serializes");

        match inner.transport.post(body, None).await {
            Ok(_response) => {
                successive_timeouts = 0;
            }
            Err(BayeuxError::TransportTimeout(_)) => {
                successive_timeouts += 1;
                if successive_timeouts > inner.successive_timeout_threshold {
                    return Err(BayeuxError::RepeatedTimeout("Unsubscriber"));
                }
                tracing::debug!(channel = %channel, attempt = successive_timeouts, "unsubscribe timed out, retrying");
                tokio::select! {
                    biased;
                    () = inner.cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(inner.timeout_wait) => {}
                }
                let _ = inner.unsubscribe_tx.send(channel);
            }
            Err(err) => return Err(err),
        }
    }
}
