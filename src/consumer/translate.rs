//! Turns raw deliveries into typed messages.
//!
//! Exactly one delivery is in flight at a time, so messages reach the caller
//! in broker order. A body that does not decode is reported to the diagnostic
//! sink and dropped without being settled; the broker keeps it unacked.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use super::message::{Envelope, Message};
use crate::transport::DeliveryStream;
use crate::utils::diagnostics::{Diagnostic, DiagnosticSink};

/// Why the translator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ending {
    /// The broker side ended the delivery stream.
    Exhausted,
    /// The broker client reported an error on the delivery stream.
    Failed,
    /// The caller dropped the message stream.
    ReceiverGone,
}

pub(crate) async fn translate(
    mut deliveries: DeliveryStream,
    messages: mpsc::Sender<Message>,
    sink: Arc<dyn DiagnosticSink>,
    requeue_on_reject: bool,
) -> Ending {
    let mut forwarded = 0u64;
    let mut dropped = 0u64;

    let ending = loop {
        let item = tokio::select! {
            item = deliveries.next() => item,
            // the caller may leave while no delivery is in flight
            _ = messages.closed() => break Ending::ReceiverGone,
        };
        let Some(item) = item else {
            break Ending::Exhausted;
        };

        let delivery = match item {
            Ok(delivery) => delivery,
            Err(e) => {
                sink.emit(Diagnostic::DeliveryStreamFailed {
                    reason: e.to_string(),
                });
                break Ending::Failed;
            }
        };

        match Envelope::decode(&delivery.body) {
            Ok(envelope) => {
                let message = Message::new(envelope, delivery.handle, requeue_on_reject);
                // waits for the caller to take the previous message
                if messages.send(message).await.is_err() {
                    break Ending::ReceiverGone;
                }
                forwarded += 1;
            }
            Err(e) => {
                dropped += 1;
                sink.emit(Diagnostic::MalformedDelivery {
                    delivery_tag: delivery.delivery_tag(),
                    body: delivery.body,
                    reason: e.to_string(),
                });
            }
        }
    };

    if ending == Ending::ReceiverGone {
        sink.emit(Diagnostic::ReceiverGone);
    }
    sink.emit(Diagnostic::StreamClosed { forwarded, dropped });
    // the producer owns the close: dropping the last sender ends the caller's stream
    drop(messages);
    ending
}
