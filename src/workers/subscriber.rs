//! The Subscriber: drains the subscribe queue, POSTs `/meta/subscribe`, and
//! re-enqueues on `403::Unknown client` or timeout (§4.3).

use std::sync::Arc;

use serde_json::Value;

use crate::error::BayeuxError;
use crate::protocol::{ResponseElement, SubscribeRequest};
use crate::session::SessionInner;

pub(crate) async fn run(inner: Arc<SessionInner>) -> Result<(), BayeuxError> {
    let mut rx = inner
        .subscribe_rx
        .lock()
        .await
        .take()
        .expect("Subscriber started more than once");
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
            .expect("Subscriber only runs after the initial handshake");
        let id = inner.state.next_message_id();
        let request = SubscribeRequest {
            channel: "/meta/subscribe",
            subscription: &channel,
            client_id: &client_id,
            id,
        };
        let body = serde_json::to_value(&request).expect("SubscribeRequest always serializes");

        match inner.transport.post(body, None).await {
            Ok(response) => {
                successive_timeouts = 0;
                if let Some(Value::Array(elements)) = response {
                    for raw in elements {
                        let element: ResponseElement = serde_json::from_value(raw)
                            .map_err(|err| {
                                BayeuxError::ProtocolError(format!(
                                    "malformed /meta/subscribe element: {err}"
                                ))
                            })?;
                        if element.is_unknown_client_error() {
                            let _ = inner.subscribe_tx.send(channel.clone());
                        }
                    }
                }
            }
            Err(BayeuxError::TransportTimeout(_)) => {
                successive_timeouts += 1;
                if successive_timeouts > inner.successive_timeout_threshold {
                    return Err(BayeuxError::RepeatedTimeout("Subscriber"));
                }
                tracing::debug!(channel = %channel, attempt = successive_timeouts, "subscribe timed out, retrying");
                tokio::select! {
                    biased;
                    () = inner.cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(inner.timeout_wait) => {}
                }
                let _ = inner.subscribe_tx.send(channel);
            }
            Err(err) => return Err(err),
        }
    }
}
