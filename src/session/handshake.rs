//! `handshake(extra)` and the initial connect that learns `connectTimeout`
//! (§4.1).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::BayeuxError;
use crate::protocol::{ConnectRequest, HandshakeRequest, BAYEUX_VERSION, SUPPORTED_CONNECTION_TYPES};
use crate::session::SessionInner;

/// Run a full handshake: reset the message counter, POST `/meta/handshake`,
/// extract `clientId`, then issue the initial connect (§4.1).
pub(crate) async fn run(
    inner: &Arc<SessionInner>,
    extra: Option<serde_json::Map<String, Value>>,
) -> Result<(), BayeuxError> {
    inner.state.reset_message_counter();

    let request = HandshakeRequest {
        channel: "/meta/handshake",
        supported_connection_types: SUPPORTED_CONNECTION_TYPES,
        version: BAYEUX_VERSION,
        minimum_version: BAYEUX_VERSION,
        extra: extra.unwrap_or_default(),
    };
    let body = serde_json::to_value(&request).expect("HandshakeRequest always serializes");

    let response = inner.transport.post(body, None).await?;
    let elements = match response {
        Some(Value::Array(elements)) if !elements.is_empty() => elements,
        other => {
            return Err(BayeuxError::ProtocolError(format!(
                "handshake response was not a non-empty array: {other:?}"
            )))
        }
    };

    let client_id = elements[0]
        .get("clientId")
        .and_then(Value::as_str)
        .ok_or_else(|| BayeuxError::ProtocolError("handshake response missing clientId".to_owned()))?
        .to_owned();

    inner.state.set_client_id(client_id.clone());
    tracing::info!(client_id = %client_id, "handshake complete");

    initial_connect(inner).await
}

/// The one-off `/meta/connect` issued right after a handshake, with no
/// client-side timeout, whose only job is to learn `connectTimeout` from the
/// server's advice (§4.1, §9 Open Question 4).
async fn initial_connect(inner: &Arc<SessionInner>) -> Result<(), BayeuxError> {
    let client_id = inner.state.client_id().expect("client_id was just set");
    let id = inner.state.next_message_id();

    let request = ConnectRequest {
        channel: "/meta/connect",
        connection_type: "long-polling",
        client_id: &client_id,
        id,
    };
    let body = serde_json::to_value(&request).expect("ConnectRequest always serializes");

    let response = inner.transport.post(body, None).await?;
    let Some(Value::Array(elements)) = response else {
        tracing::warn!(
            "initial connect did not return an array; proceeding without a connect timeout"
        );
        return Ok(());
    };

    let Some(first) = elements.into_iter().next() else {
        return Ok(());
    };

    let successful = first
        .get("successful")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if successful {
        if let Some(timeout_ms) = first
            .get("advice")
            .and_then(|advice| advice.get("timeout"))
            .and_then(Value::as_u64)
        {
            let timeout = Duration::from_millis(timeout_ms);
            inner.state.set_connect_timeout(timeout);
            tracing::debug!(?timeout, "learned connect timeout from server advice");
        }
    }

    Ok(())
}
