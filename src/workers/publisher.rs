//! The Publisher: drains the publish queue and POSTs one message per item
//! (§4.5). Unlike the Subscriber and Unsubscriber, nothing here is retried —
//! any failure, including a transport timeout, is surfaced to the caller as
//! the publication's outcome.

use std::sync::Arc;

use crate::error::BayeuxError;
use crate::protocol::PublishRequest;
use crate::session::{PublishOp, SessionInner};

pub(crate) async fn run(inner: Arc<SessionInner>) -> Result<(), BayeuxError> {
    let mut rx = inner
        .publish_rx
        .lock()
        .await
        .take()
        .expect("Publisher started more than once");

    loop {
        let PublishOp { channel, payload } = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Ok(()),
            item = rx.recv() => match item {
                Some(op) => op,
                None => return Ok(()),
            },
        };

        let client_id = inner
            .state
            .client_id()
            .expect("Publisher only runs after the initial handshake");
        let id = inner.state.next_message_id();
        let request = PublishRequest {
            channel: &channel,
            data: payload,
            client_id: &client_id,
            id,
        };
        let body = serde_json::to_value(&request).expect("PublishRequest always serializes");

        inner.transport.post(body, None).await?;
    }
}
