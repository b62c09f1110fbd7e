//! The Connector: the long-polling loop against `/meta/connect`, and the
//! recovery routine it triggers on session loss (§4.2, §4.6).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;

use crate::error::BayeuxError;
use crate::protocol::{ConnectRequest, Event, ResponseElement};
use crate::session::{self, handshake, SessionInner};

pub(crate) async fn run(inner: Arc<SessionInner>) -> Result<(), BayeuxError> {
    loop {
        if inner.cancel.is_cancelled() {
            return Ok(());
        }

        let client_id = inner
            .state
            .client_id()
            .expect("Connector only starts after the initial handshake");
        let timeout = inner.state.connect_timeout();
        let id = inner.state.next_message_id();

        let request = ConnectRequest {
            channel: "/meta/connect",
            connection_type: "long-polling",
            client_id: &client_id,
            id,
        };
        let body = serde_json::to_value(&request).expect("ConnectRequest always serializes");

        let response = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Ok(()),
            result = inner.transport.post(body, timeout) => result,
        };

        let elements = match response {
            Ok(Some(Value::Array(elements))) => elements,
            Ok(Some(other)) => return Err(BayeuxError::UnexpectedConnectResponse(other)),
            Ok(None) => return Err(BayeuxError::UnexpectedConnectResponse(Value::Null)),
            Err(BayeuxError::TransportTimeout(_)) => {
                tracing::debug!("connect timed out, reconnecting");
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut batch = Vec::new();
        let mut session_lost = false;
        for raw in elements {
            let element: ResponseElement = serde_json::from_value(raw).map_err(|err| {
                BayeuxError::ProtocolError(format!("malformed /meta/connect element: {err}"))
            })?;

            if element.channel == "/meta/connect" {
                if element.is_unknown_client() {
                    session_lost = true;
                }
            } else {
                batch.push(Event::from(element));
            }
        }

        if !batch.is_empty() {
            let _ = inner.inbox_tx.send(batch);
        }

        if session_lost {
            tracing::info!("session lost, re-handshaking");
            handshake::run(&inner, None).await?;
            resubscribe(&inner).await?;
            tracing::info!("recovery complete");
        }
    }
}

/// Replay every previously registered `(channel, callback)` pair through
/// [`session::enqueue_subscribe`], gated by `recovery_in_progress` so the
/// Dispatcher holds event delivery until the table is whole again (§4.6,
/// §4.7 step 2).
async fn resubscribe(inner: &Arc<SessionInner>) -> Result<(), BayeuxError> {
    inner.recovery_in_progress.store(true, Ordering::Release);

    let snapshot = inner.subscriptions.snapshot_and_clear().await;
    for (channel, callbacks) in snapshot {
        for callback in callbacks {
            session::enqueue_subscribe(inner, channel.clone(), callback).await;
        }
    }

    inner.recovery_in_progress.store(false, Ordering::Release);
    Ok(())
}
