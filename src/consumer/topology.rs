//! Declares the exchange, queue and binding the consumer depends on and
//! starts the raw subscription.
//!
//! No reconciliation is attempted: if the broker already holds an exchange or
//! queue with different properties, the declare fails and nothing after it
//! runs.

use crate::transport::{
    Channel, ConsumeOptions, Connection, DeliveryStream, ExchangeKind, ExchangeOptions,
    QueueOptions,
};
use crate::utils::diagnostics::{Diagnostic, DiagnosticSink};
use crate::utils::error::{ClientError, Result, TopologyStep};

/// Key used to bind the queue. Fanout exchanges ignore it for routing, but the
/// bind call still carries it.
pub const BINDING_KEY: &str = "bitballoon.commands";

/// Tag of the consume subscription.
pub const CONSUMER_TAG: &str = "cache-primer";

pub fn exchange_options() -> ExchangeOptions {
    ExchangeOptions {
        kind: ExchangeKind::Fanout,
        durable: true,
        auto_delete: true,
        internal: false,
        no_wait: false,
    }
}

pub fn queue_options() -> QueueOptions {
    QueueOptions {
        durable: true,
        auto_delete: true,
        exclusive: false,
        no_wait: false,
    }
}

pub fn consume_options() -> ConsumeOptions {
    ConsumeOptions {
        consumer_tag: CONSUMER_TAG.to_string(),
        no_ack: false,
        exclusive: false,
        no_local: false,
        no_wait: false,
    }
}

/// The channel a subscription runs on, the broker's name for the queue, and
/// the raw deliveries.
pub struct Subscription<C> {
    pub channel: C,
    pub queue: String,
    pub deliveries: DeliveryStream,
}

/// Declares the queue topology without consuming from it.
pub async fn declare<C: Connection>(
    conn: &C,
    exchange: &str,
    queue: &str,
    sink: &dyn DiagnosticSink,
) -> Result<(C::Channel, String)> {
    let channel = conn
        .open_channel()
        .await
        .map_err(ClientError::topology(TopologyStep::OpenChannel))?;
    sink.emit(Diagnostic::ChannelOpened);

    channel
        .declare_exchange(exchange, &exchange_options())
        .await
        .map_err(ClientError::topology(TopologyStep::DeclareExchange))?;
    sink.emit(Diagnostic::ExchangeDeclared {
        exchange: exchange.to_string(),
    });

    let queue = channel
        .declare_queue(queue, &queue_options())
        .await
        .map_err(ClientError::topology(TopologyStep::DeclareQueue))?;
    sink.emit(Diagnostic::QueueDeclared {
        queue: queue.clone(),
    });

    channel
        .bind_queue(&queue, exchange, BINDING_KEY)
        .await
        .map_err(ClientError::topology(TopologyStep::BindQueue))?;
    sink.emit(Diagnostic::QueueBound {
        queue: queue.clone(),
        exchange: exchange.to_string(),
        binding_key: BINDING_KEY.to_string(),
    });

    Ok((channel, queue))
}

/// Declares the topology and starts consuming with manual acknowledgment.
pub async fn connect<C: Connection>(
    conn: &C,
    exchange: &str,
    queue: &str,
    sink: &dyn DiagnosticSink,
) -> Result<Subscription<C::Channel>> {
    let (channel, queue) = declare(conn, exchange, queue, sink).await?;

    let options = consume_options();
    let deliveries = channel
        .consume(&queue, &options)
        .await
        .map_err(ClientError::topology(TopologyStep::Consume))?;
    sink.emit(Diagnostic::ConsumerStarted {
        queue: queue.clone(),
        consumer_tag: options.consumer_tag,
    });

    Ok(Subscription {
        channel,
        queue,
        deliveries,
    })
}
