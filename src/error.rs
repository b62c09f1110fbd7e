use std::time::Duration;

/// Errors produced while building a [`Session`](crate::Session).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The given endpoint could not be parsed as a URL.
    #[error("invalid endpoint")]
    InvalidEndpoint(#[source] url::ParseError),

    /// The synchronous initial handshake (§4.1) failed.
    #[error("initial handshake failed")]
    Handshake(#[source] BayeuxError),
}

/// Errors that can occur while a [`Session`](crate::Session) is running.
///
/// Each of these is fatal: the worker that encounters one records it as the
/// session's first error and initiates shutdown. Session loss (a
/// `403::Unknown client` connect response) is not represented here — the
/// Connector handles it entirely in-band, by re-handshaking and replaying
/// subscriptions, and it never surfaces through
/// [`Session::block`](crate::Session::block).
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum BayeuxError {
    /// The underlying HTTP request timed out waiting for a response.
    #[error("transport timeout after {0:?}")]
    TransportTimeout(Duration),

    /// A worker exceeded its consecutive-timeout ceiling.
    #[error("{0} timed out too many times in a row")]
    RepeatedTimeout(&'static str),

    /// `/meta/connect` returned something other than a JSON array.
    #[error("unexpected /meta/connect response: {0}")]
    UnexpectedConnectResponse(serde_json::Value),

    /// A handshake response was missing required fields, or the Dispatcher
    /// found a pushed event for a channel with no registered callback.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A non-timeout transport failure (bad status, connection error, body
    /// that failed to decode as JSON).
    #[error("transport error: {0}")]
    TransportError(String),
}
