use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::BuildError;
use crate::transport::{BayeuxTransport, ReqwestTransport};

use super::Session;

/// A builder for [`Session`].
///
/// Obtained from [`Session::builder`].
#[derive(Debug)]
pub struct SessionBuilder {
    pub(crate) endpoint: String,
    pub(crate) transport: Option<Arc<dyn BayeuxTransport>>,
    pub(crate) successive_timeout_threshold: u32,
    pub(crate) timeout_wait: Duration,
    pub(crate) auto_start: bool,
    pub(crate) handshake_extra: serde_json::Map<String, Value>,
}

impl SessionBuilder {
    pub(super) fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: None,
            successive_timeout_threshold: 20,
            timeout_wait: Duration::from_secs(5),
            auto_start: true,
            handshake_extra: serde_json::Map::new(),
        }
    }

    /// Use a custom [`BayeuxTransport`] instead of the default
    /// [`ReqwestTransport`].
    ///
    /// Use this to point at a test double, or to wrap a `reqwest::Client`
    /// that is already configured with authentication headers under a
    /// different transport shape.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn BayeuxTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// How many consecutive timeouts a worker tolerates before treating its
    /// queue item as a fatal, session-ending failure (§5, §7).
    ///
    /// Default: 20.
    #[must_use]
    pub fn successive_timeout_threshold(mut self, threshold: u32) -> Self {
        self.successive_timeout_threshold = threshold;
        self
    }

    /// How long the Subscriber and Unsubscriber wait before retrying after a
    /// timeout (§4.3, §4.4).
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub fn timeout_wait(mut self, timeout_wait: Duration) -> Self {
        self.timeout_wait = timeout_wait;
        self
    }

    /// Whether [`Session::build`] starts the four core workers automatically
    /// once the initial handshake succeeds.
    ///
    /// Default: `true`. Set to `false` to call [`Session::start`] explicitly,
    /// e.g. to finish registering subscriptions before the Subscriber begins
    /// draining its queue.
    #[must_use]
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Extra fields merged into the `/meta/handshake` request, e.g. an `ext`
    /// object carrying authentication data (§4.1).
    #[must_use]
    pub fn handshake_extra(mut self, extra: serde_json::Map<String, Value>) -> Self {
        self.handshake_extra = extra;
        self
    }

    /// Parse the endpoint, run the synchronous initial handshake (§4.1), and
    /// return a ready-to-use [`Session`].
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidEndpoint`] if the endpoint is not a valid
    /// URL (and no custom transport was given to bypass parsing it), or
    /// [`BuildError::Handshake`] if the initial handshake fails.
    pub async fn build(self) -> Result<Session, BuildError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let url = self
                    .endpoint
                    .parse::<url::Url>()
                    .map_err(BuildError::InvalidEndpoint)?;
                Arc::new(ReqwestTransport::new(reqwest::Client::new(), url))
            }
        };

        Session::new(
            transport,
            self.successive_timeout_threshold,
            self.timeout_wait,
            self.auto_start,
            self.handshake_extra,
        )
        .await
    }
}
