//! The consumer pipeline.
//!
//! ```text
//! dial (TLS) -> declare exchange/queue/binding -> consume
//!     -> raw deliveries -> translator task -> MessageStream -> caller
//! ```
//!
//! Setup runs on the caller's task and fails fast. Once it succeeds, a single
//! background task translates deliveries and owns the connection and channel
//! for as long as deliveries keep coming. Dropping the stream stops that task
//! and closes the connection. The caller reads messages from the
//! returned [`MessageStream`] and settles each one through [`Message::ack`].

pub mod message;
pub mod topology;
mod translate;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::config::{BrokerConfig, ConsumerSettings, Settings};
use crate::transport::Connection;
use crate::transport::amqp;
use crate::utils::diagnostics::{DiagnosticSink, TracingSink};
use crate::utils::error::Result;
use translate::Ending;

pub use message::{Envelope, Message};
pub use topology::{BINDING_KEY, CONSUMER_TAG, Subscription};

/// Messages waiting between the translator and the caller. One slot keeps
/// the translator at most a single message ahead of the caller.
const HANDOFF_CAPACITY: usize = 1;

/// Ordered stream of decoded messages. It ends when the broker side of the
/// subscription goes away.
#[derive(Debug)]
pub struct MessageStream {
    receiver: mpsc::Receiver<Message>,
    queue: String,
}

impl MessageStream {
    /// Waits for the next message; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// The queue name as reported by the broker.
    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl Stream for MessageStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}

/// Returns a connected consumer that the caller can immediately start
/// taking messages from. Diagnostics go to `tracing`.
pub async fn new_consumer(settings: &Settings) -> Result<MessageStream> {
    new_consumer_with_sink(&settings.amqp, &settings.consumer, Arc::new(TracingSink)).await
}

/// Like [`new_consumer`], with diagnostics sent to `sink`.
pub async fn new_consumer_with_sink(
    config: &BrokerConfig,
    consumer: &ConsumerSettings,
    sink: Arc<dyn DiagnosticSink>,
) -> Result<MessageStream> {
    let conn = amqp::dial(&config.url, &config.tls, sink.as_ref()).await?;
    start(conn, config, consumer, sink).await
}

/// Declares the topology on an already open connection and starts the
/// translator. The connection is moved into the pipeline.
pub async fn start<C: Connection>(
    conn: C,
    config: &BrokerConfig,
    consumer: &ConsumerSettings,
    sink: Arc<dyn DiagnosticSink>,
) -> Result<MessageStream> {
    let Subscription {
        channel,
        queue,
        deliveries,
    } = topology::connect(&conn, &config.exchange, &config.queue, sink.as_ref()).await?;

    let (sender, receiver) = mpsc::channel(HANDOFF_CAPACITY);
    let requeue_on_reject = consumer.requeue_on_reject;
    tokio::spawn(async move {
        let ending = translate::translate(deliveries, sender, sink, requeue_on_reject).await;
        if ending == Ending::ReceiverGone {
            // unsettled deliveries go back to the queue
            let _ = conn.close().await;
        }
        drop(channel);
    });

    Ok(MessageStream { receiver, queue })
}
