//! Diagnostic events emitted by the dialer, the topology binder and the
//! delivery translator.
//!
//! The pipeline never logs directly. It hands a [`Diagnostic`] to a
//! [`DiagnosticSink`]; the default [`TracingSink`] turns events into `tracing`
//! records, and [`RecordingSink`] keeps them in memory so callers can count
//! dropped deliveries or assert on what happened.

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// About to open a TLS connection to the broker.
    Dialing { url: String },
    /// A channel was opened on the connection.
    ChannelOpened,
    ExchangeDeclared { exchange: String },
    QueueDeclared { queue: String },
    QueueBound {
        queue: String,
        exchange: String,
        binding_key: String,
    },
    ConsumerStarted { queue: String, consumer_tag: String },
    /// A delivery whose body did not decode; it was dropped unacknowledged.
    MalformedDelivery {
        delivery_tag: u64,
        body: Vec<u8>,
        reason: String,
    },
    /// The broker client reported an error on the delivery stream.
    DeliveryStreamFailed { reason: String },
    /// The caller dropped the message stream.
    ReceiverGone,
    /// The translator closed the message stream.
    StreamClosed { forwarded: u64, dropped: u64 },
}

pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: Diagnostic);
}

/// Forwards every diagnostic to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, event: Diagnostic) {
        match event {
            Diagnostic::Dialing { url } => info!("Connecting to AMQP broker: {url}"),
            Diagnostic::ChannelOpened => info!("Connected to broker, channel open"),
            Diagnostic::ExchangeDeclared { exchange } => {
                info!("Declared fanout exchange {exchange}")
            }
            Diagnostic::QueueDeclared { queue } => info!("Declared queue {queue}"),
            Diagnostic::QueueBound {
                queue,
                exchange,
                binding_key,
            } => info!("Queue {queue} bound to exchange {exchange} with key {binding_key}"),
            Diagnostic::ConsumerStarted {
                queue,
                consumer_tag,
            } => info!("Consumer {consumer_tag} started on queue {queue}"),
            Diagnostic::MalformedDelivery {
                delivery_tag,
                body,
                reason,
            } => warn!(
                delivery_tag,
                "Failed to parse message: {} ({reason})",
                String::from_utf8_lossy(&body)
            ),
            Diagnostic::DeliveryStreamFailed { reason } => {
                error!("Delivery stream failed: {reason}")
            }
            Diagnostic::ReceiverGone => warn!("Message receiver dropped, stopping translation"),
            Diagnostic::StreamClosed { forwarded, dropped } => {
                info!(forwarded, dropped, "Delivery stream exhausted, message stream closed")
            }
        }
    }
}

/// Keeps every diagnostic in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Number of deliveries dropped because their body did not decode.
    pub fn malformed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Diagnostic::MalformedDelivery { .. }))
            .count()
    }
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, event: Diagnostic) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
