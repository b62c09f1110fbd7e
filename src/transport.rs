//! The HTTP collaborator seam (§6 of the specification).
//!
//! The session core never talks to `reqwest` (or any other HTTP client)
//! directly — it only knows about [`BayeuxTransport`]. This keeps the state
//! machine testable with an in-process double (see the crate's `tests`
//! module) and keeps authentication entirely out of the core's concern: a
//! `BayeuxTransport` implementation is expected to already carry whatever
//! credentials the server requires.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BayeuxError;

/// A single POST to the Bayeux endpoint, with an optional client-side read
/// timeout.
///
/// Implementations translate a timed-out read into
/// [`BayeuxError::TransportTimeout`] and any other transport-level failure
/// into [`BayeuxError::TransportError`]. An empty response body is `Ok(None)`.
#[async_trait]
pub trait BayeuxTransport: Send + Sync {
    /// POST the JSON `body` to the configured endpoint, waiting at most
    /// `timeout` for a response if one is given.
    async fn post(&self, body: Value, timeout: Option<Duration>) -> Result<Option<Value>, BayeuxError>;
}

/// A [`BayeuxTransport`] backed by a configured [`reqwest::Client`].
///
/// This is the default, batteries-included implementation: construct a
/// `reqwest::Client` with whatever authentication headers the server
/// requires (e.g. a bearer token) and wrap it here.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl ReqwestTransport {
    /// Wrap an already-configured [`reqwest::Client`] for use against
    /// `endpoint`.
    ///
    /// The client is expected to already carry whatever authentication the
    /// server requires (e.g. via `reqwest::ClientBuilder::default_headers`).
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: url::Url) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl BayeuxTransport for ReqwestTransport {
    async fn post(&self, body: Value, timeout: Option<Duration>) -> Result<Option<Value>, BayeuxError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let map_err = |err: reqwest::Error| map_reqwest_err(err, timeout);

        let response = request.send().await.map_err(map_err)?;
        let status = response.status();
        let text = response.text().await.map_err(map_err)?;

        if !status.is_success() {
            return Err(BayeuxError::TransportError(format!(
                "server responded with status {status}"
            )));
        }

        if text.is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| BayeuxError::TransportError(format!("invalid JSON response: {err}")))
    }
}

fn map_reqwest_err(err: reqwest::Error, timeout: Option<Duration>) -> BayeuxError {
    if err.is_timeout() {
        BayeuxError::TransportTimeout(timeout.unwrap_or_default())
    } else {
        BayeuxError::TransportError(err.to_string())
    }
}
