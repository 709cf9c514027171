//! The `transport` module is the boundary to the broker client.
//!
//! The consumer pipeline only talks to the [`Connection`], [`Channel`] and
//! [`Acknowledger`] traits. Two implementations are provided:
//!
//! - `amqp`: a real AMQP 0-9-1 broker reached over mutual TLS, via `lapin`.
//! - `memory`: an in-process fanout broker, brokerless and always available.

pub mod amqp;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::utils::error::BrokerError;

/// Exchange kinds understood by the transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub kind: ExchangeKind,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_local: bool,
    pub no_wait: bool,
}

/// Acknowledges deliveries by tag on the channel they arrived on.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// Non-owning reference to one delivery: its tag plus the channel-wide
/// acknowledger that can settle it.
#[derive(Clone)]
pub struct DeliveryHandle {
    delivery_tag: u64,
    acker: Arc<dyn Acknowledger>,
}

impl DeliveryHandle {
    pub fn new(delivery_tag: u64, acker: Arc<dyn Acknowledger>) -> Self {
        Self { delivery_tag, acker }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker.reject(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("delivery_tag", &self.delivery_tag)
            .finish_non_exhaustive()
    }
}

/// One unacknowledged message as handed over by the broker client.
#[derive(Debug)]
pub struct RawDelivery {
    pub body: Vec<u8>,
    pub handle: DeliveryHandle,
}

impl RawDelivery {
    pub fn delivery_tag(&self) -> u64 {
        self.handle.delivery_tag()
    }
}

/// Raw deliveries in broker order. An `Err` item reports a broker client
/// failure; the stream ends when the subscription or connection goes away.
pub type DeliveryStream = BoxStream<'static, Result<RawDelivery, BrokerError>>;

#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Channel: Channel;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;

    /// Closes the connection; unsettled deliveries go back to their queues.
    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), BrokerError>;

    /// Declares a queue and returns the name the broker assigned to it.
    async fn declare_queue(&self, name: &str, options: &QueueOptions)
    -> Result<String, BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError>;

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, BrokerError>;
}
