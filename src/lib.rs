//! A client for the [Bayeux](https://docs.cometd.org/current/reference/#_bayeux)
//! long-polling protocol used by CometD servers and the Salesforce Streaming
//! API.
//!
//! A [`Session`] performs a synchronous handshake on construction, then runs
//! a small set of cooperating workers: a Connector that keeps `/meta/connect`
//! long-polled, a Subscriber and Unsubscriber that drain their own queues,
//! a Publisher, and an optional Dispatcher that hands pushed events to
//! per-channel callbacks.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use bayeux_client::Session;
//!
//! let session = Session::builder("https://example.com/cometd")
//!     .build()
//!     .await?;
//!
//! session
//!     .subscribe("/topic/news", std::sync::Arc::new(|event| {
//!         println!("{} -> {:?}", event.channel, event.payload);
//!     }))
//!     .await;
//!
//! session.go().await;
//! session.block().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod protocol;
mod session;
mod subscription;
mod transport;
mod workers;

pub use error::{BayeuxError, BuildError};
pub use protocol::Event;
pub use session::{Session, SessionBuilder};
pub use subscription::Callback;
pub use transport::{BayeuxTransport, ReqwestTransport};

#[cfg(test)]
mod tests;
