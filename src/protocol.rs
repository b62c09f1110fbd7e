//! Bayeux 1.0 wire structs.
//!
//! See <https://docs.cometd.org/current/reference/#_bayeux> for the protocol
//! reference these are modeled on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) const SUPPORTED_CONNECTION_TYPES: &[&str] = &["long-polling"];
pub(crate) const BAYEUX_VERSION: &str = "1.0";
pub(crate) const UNKNOWN_CLIENT: &str = "403::Unknown client";
pub(crate) const RECONNECT_HANDSHAKE: &str = "handshake";

#[derive(Debug, Serialize)]
pub(crate) struct HandshakeRequest {
    pub(crate) channel: &'static str,
    #[serde(rename = "supportedConnectionTypes")]
    pub(crate) supported_connection_types: &'static [&'static str],
    pub(crate) version: &'static str,
    #[serde(rename = "minimumVersion")]
    pub(crate) minimum_version: &'static str,
    #[serde(flatten)]
    pub(crate) extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConnectRequest<'a> {
    pub(crate) channel: &'static str,
    #[serde(rename = "connectionType")]
    pub(crate) connection_type: &'static str,
    #[serde(rename = "clientId")]
    pub(crate) client_id: &'a str,
    pub(crate) id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubscribeRequest<'a> {
    pub(crate) channel: &'static str,
    pub(crate) subscription: &'a str,
    #[serde(rename = "clientId")]
    pub(crate) client_id: &'a str,
    pub(crate) id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnsubscribeRequest<'a> {
    pub(crate) channel: &'static str,
    pub(crate) subscription: &'a str,
    #[serde(rename = "clientId")]
    pub(crate) client_id: &'a str,
    pub(crate) id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishRequest<'a> {
    pub(crate) channel: &'a str,
    pub(crate) data: Value,
    #[serde(rename = "clientId")]
    pub(crate) client_id: &'a str,
    pub(crate) id: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct DisconnectRequest<'a> {
    pub(crate) channel: &'static str,
    #[serde(rename = "clientId")]
    pub(crate) client_id: &'a str,
    pub(crate) id: String,
}

/// A single element of a Bayeux response array.
///
/// Used to parse both `/meta/handshake`, `/meta/connect` and
/// `/meta/subscribe`/`/meta/unsubscribe` responses, and to recognize pushed
/// events (anything whose `channel` isn't a `/meta/...` channel this client
/// cares about).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ResponseElement {
    pub(crate) channel: String,
    #[serde(rename = "clientId")]
    pub(crate) client_id: Option<String>,
    #[serde(default)]
    pub(crate) successful: Option<bool>,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) advice: Option<Advice>,
    #[serde(default)]
    pub(crate) data: Option<Value>,
    #[serde(flatten)]
    pub(crate) rest: serde_json::Map<String, Value>,
}

impl ResponseElement {
    /// `true` if the server reported this element as a failed meta-response
    /// for session loss, per §6/§7 (`403::Unknown client` with reconnect
    /// advice of `handshake`).
    pub(crate) fn is_unknown_client(&self) -> bool {
        self.successful == Some(false)
            && self.error.as_deref() == Some(UNKNOWN_CLIENT)
            && self
                .advice
                .as_ref()
                .and_then(|advice| advice.reconnect.as_deref())
                == Some(RECONNECT_HANDSHAKE)
    }

    /// `true` if this element reports a `403::Unknown client` failure,
    /// ignoring `advice` — the condition the Subscriber/Unsubscriber retry
    /// loops re-enqueue on (§4.3, §4.4), which is looser than
    /// [`ResponseElement::is_unknown_client`].
    pub(crate) fn is_unknown_client_error(&self) -> bool {
        self.successful == Some(false) && self.error.as_deref() == Some(UNKNOWN_CLIENT)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Advice {
    #[serde(default)]
    pub(crate) reconnect: Option<String>,
    /// Milliseconds.
    #[serde(default)]
    pub(crate) timeout: Option<u64>,
}

/// A pushed event as delivered to user callbacks: the `channel` it arrived
/// on, and the event's `data` field unwrapped — the payload the publisher
/// actually sent, not the envelope it arrived in.
#[derive(Debug, Clone)]
pub struct Event {
    /// The channel this event was published on.
    pub channel: String,
    /// The event's `data` field, or `Value::Null` if the push carried none.
    pub payload: Value,
}

impl From<ResponseElement> for Event {
    fn from(element: ResponseElement) -> Self {
        Event {
            channel: element.channel,
            payload: element.data.unwrap_or(Value::Null),
        }
    }
}
