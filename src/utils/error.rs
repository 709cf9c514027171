//! The `error` module defines the error taxonomy of the client.
//!
//! Every setup step (credential check, certificate loading, dialing, topology
//! declaration) fails with one of these variants and aborts the whole connect
//! operation. Broker-side failures are kept as the `source` so the reason the
//! broker reported is never rewritten.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Boxed error produced by a broker client implementation.
pub type BrokerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The TLS credentials failed the pre-flight shape check.
    #[error("the TLS configuration is invalid")]
    Configuration,

    /// A CA certificate file could not be read.
    #[error("failed to read CA certificate {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The client certificate/key pair could not be loaded.
    #[error("failed to load client credentials: {0}")]
    Credential(String),

    /// The TLS dial or the network connection failed.
    #[error("failed to connect to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: BrokerError,
    },

    /// The broker refused a declare, bind or consume call.
    #[error("topology setup failed while {step}: {source}")]
    Topology {
        step: TopologyStep,
        #[source]
        source: BrokerError,
    },

    /// An acknowledgment could not be delivered to the broker.
    #[error("failed to acknowledge delivery {delivery_tag}: {source}")]
    Ack {
        delivery_tag: u64,
        #[source]
        source: BrokerError,
    },
}

/// The topology step that was running when the broker returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStep {
    OpenChannel,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    Consume,
}

impl fmt::Display for TopologyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            TopologyStep::OpenChannel => "opening a channel",
            TopologyStep::DeclareExchange => "declaring the exchange",
            TopologyStep::DeclareQueue => "declaring the queue",
            TopologyStep::BindQueue => "binding the queue",
            TopologyStep::Consume => "starting the consumer",
        };
        f.write_str(step)
    }
}

impl ClientError {
    pub(crate) fn topology(step: TopologyStep) -> impl FnOnce(BrokerError) -> Self {
        move |source| ClientError::Topology { step, source }
    }
}
