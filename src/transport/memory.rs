//! In-process broker implementing the transport traits.
//!
//! The broker keeps exchanges, queues and bindings behind one lock and models
//! the parts of AMQP the consumer relies on:
//! - redeclaring an exchange or queue with different properties fails with
//!   `PRECONDITION_FAILED` and closes the channel, like a real broker
//! - fanout exchanges route to every bound queue whatever the routing key;
//!   direct exchanges route on exact binding key
//! - a queue declared with an empty name gets a server-generated name
//! - every consumer gets per-channel delivery tags starting at 1, and
//!   deliveries stay unacked until settled
//! - closing a connection ends its consumer streams and requeues what it left
//!   unacked; auto-delete queues go away with their last consumer and
//!   auto-delete exchanges with their last binding
//!
//! It is meant for local runs and tests, not for durability: "durable" is
//! only compared on redeclare.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

use super::{
    Acknowledger, Channel, ConsumeOptions, Connection, DeliveryHandle, DeliveryStream,
    ExchangeKind, ExchangeOptions, QueueOptions, RawDelivery,
};
use crate::utils::error::BrokerError;

type ChannelId = u64;
type ConnectionId = u64;

/// How a delivery was settled by a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack {
        channel: ChannelId,
        delivery_tag: u64,
    },
    Reject {
        channel: ChannelId,
        delivery_tag: u64,
        requeue: bool,
    },
}

#[derive(Debug)]
struct Exchange {
    options: ExchangeOptions,
    bindings: Vec<Binding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    key: String,
}

#[derive(Debug)]
struct Queue {
    options: QueueOptions,
    ready: VecDeque<Vec<u8>>,
    consumers: Vec<ConsumerSlot>,
    next_consumer: usize,
}

#[derive(Debug)]
struct ConsumerSlot {
    tag: String,
    channel: ChannelId,
    connection: ConnectionId,
    no_ack: bool,
    sender: UnboundedSender<Result<RawDelivery, BrokerError>>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    unacked: HashMap<(ChannelId, u64), Unacked>,
    channel_tags: HashMap<ChannelId, u64>,
    closed_channels: HashSet<ChannelId>,
    closed_connections: HashSet<ConnectionId>,
    settlements: Vec<Settlement>,
    next_connection: ConnectionId,
    next_channel: ChannelId,
}

/// Shared handle to an in-process broker; clones address the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a new client connection to this broker.
    pub fn connect(&self) -> MemoryConnection {
        let mut state = self.state();
        state.next_connection += 1;
        MemoryConnection {
            broker: self.clone(),
            id: state.next_connection,
        }
    }

    /// Publishes `body` to `exchange`, returning how many queues it was routed to.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<usize, BrokerError> {
        let body = body.into();
        let mut state = self.state();

        let targets: Vec<String> = {
            let Some(ex) = state.exchanges.get(exchange) else {
                return Err(format!("NOT_FOUND - no exchange '{exchange}' in vhost '/'").into());
            };
            let mut targets = Vec::new();
            for binding in &ex.bindings {
                let routed = match ex.options.kind {
                    ExchangeKind::Fanout => true,
                    ExchangeKind::Direct => binding.key == routing_key,
                };
                if routed && !targets.contains(&binding.queue) {
                    targets.push(binding.queue.clone());
                }
            }
            targets
        };

        for queue in &targets {
            if let Some(q) = state.queues.get_mut(queue) {
                q.ready.push_back(body.clone());
            }
            state.dispatch(queue, self);
        }

        debug!("Published to {exchange} ({routing_key}), routed to {} queue(s)", targets.len());
        Ok(targets.len())
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.state().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    /// Queues bound to `exchange`, with their binding keys.
    pub fn bindings(&self, exchange: &str) -> Vec<(String, String)> {
        self.state()
            .exchanges
            .get(exchange)
            .map(|ex| {
                ex.bindings
                    .iter()
                    .map(|b| (b.queue.clone(), b.key.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Messages waiting in `queue` that no consumer holds.
    pub fn ready_count(&self, queue: &str) -> Option<usize> {
        self.state().queues.get(queue).map(|q| q.ready.len())
    }

    /// Deliveries handed to consumers and not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.state().unacked.len()
    }

    /// Every ack and reject received, in order.
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state().settlements.clone()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or_default()
    }
}

impl BrokerState {
    fn check_channel(&self, connection: ConnectionId, channel: ChannelId) -> Result<(), BrokerError> {
        if self.closed_connections.contains(&connection) {
            return Err("CONNECTION_FORCED - connection is closed".into());
        }
        if self.closed_channels.contains(&channel) {
            return Err(format!("CHANNEL_ERROR - channel {channel} is closed").into());
        }
        Ok(())
    }

    /// Hands ready messages of `queue` to its consumers, round robin.
    fn dispatch(&mut self, queue: &str, broker: &MemoryBroker) {
        loop {
            let Some(q) = self.queues.get_mut(queue) else {
                return;
            };
            if q.consumers.is_empty() {
                return;
            }
            let Some(body) = q.ready.pop_front() else {
                return;
            };

            let slot_index = q.next_consumer % q.consumers.len();
            q.next_consumer = slot_index + 1;
            let channel = q.consumers[slot_index].channel;
            let no_ack = q.consumers[slot_index].no_ack;

            let tag = self.channel_tags.entry(channel).or_insert(0);
            *tag += 1;
            let delivery_tag = *tag;

            let acker: Arc<dyn Acknowledger> = Arc::new(MemoryAcker {
                broker: broker.clone(),
                channel,
            });
            let delivery = RawDelivery {
                body: body.clone(),
                handle: DeliveryHandle::new(delivery_tag, acker),
            };

            let Some(q) = self.queues.get_mut(queue) else {
                return;
            };
            if q.consumers[slot_index].sender.send(Ok(delivery)).is_err() {
                // receiver dropped: the consumer is gone, try the next one
                let gone = q.consumers.remove(slot_index);
                q.ready.push_front(body);
                debug!("Consumer {} on {queue} went away", gone.tag);
                if q.consumers.is_empty() {
                    self.consumer_left(queue);
                    return;
                }
                continue;
            }

            if !no_ack {
                self.unacked.insert(
                    (channel, delivery_tag),
                    Unacked {
                        queue: queue.to_string(),
                        body,
                    },
                );
            }
        }
    }

    /// Deletes an auto-delete queue that just lost its last consumer.
    fn consumer_left(&mut self, queue: &str) {
        let auto_delete = self
            .queues
            .get(queue)
            .is_some_and(|q| q.options.auto_delete && q.consumers.is_empty());
        if !auto_delete {
            return;
        }

        self.queues.remove(queue);
        debug!("Auto-deleted queue {queue}");

        let mut emptied = Vec::new();
        for (name, exchange) in self.exchanges.iter_mut() {
            let before = exchange.bindings.len();
            exchange.bindings.retain(|b| b.queue != queue);
            if before > 0 && exchange.bindings.is_empty() && exchange.options.auto_delete {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            self.exchanges.remove(&name);
            debug!("Auto-deleted exchange {name}");
        }
    }

    fn settle(&mut self, channel: ChannelId, delivery_tag: u64) -> Result<Unacked, BrokerError> {
        self.unacked.remove(&(channel, delivery_tag)).ok_or_else(|| {
            format!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}").into()
        })
    }
}

/// A client connection. Clones share the connection: closing one closes all.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: ConnectionId,
}

impl MemoryConnection {
    /// Closes the connection: its consumer streams end and its unacked
    /// deliveries go back to their queues.
    pub fn close(&self) {
        let mut state = self.broker.state();
        if !state.closed_connections.insert(self.id) {
            return;
        }

        let mut touched = Vec::new();
        let mut channels = HashSet::new();
        for (name, queue) in state.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| {
                if c.connection == self.id {
                    channels.insert(c.channel);
                    false
                } else {
                    true
                }
            });
            if queue.consumers.len() != before {
                touched.push(name.clone());
            }
        }

        let mut requeue: Vec<((ChannelId, u64), Unacked)> = Vec::new();
        let keys: Vec<(ChannelId, u64)> = state
            .unacked
            .keys()
            .filter(|(channel, _)| channels.contains(channel))
            .copied()
            .collect();
        for key in keys {
            if let Some(unacked) = state.unacked.remove(&key) {
                requeue.push((key, unacked));
            }
        }
        // newest first so push_front restores delivery order
        requeue.sort_by(|a, b| b.0.1.cmp(&a.0.1));
        for (_, unacked) in requeue {
            if let Some(q) = state.queues.get_mut(&unacked.queue) {
                q.ready.push_front(unacked.body);
            }
        }

        for name in touched {
            state.consumer_left(&name);
            state.dispatch(&name, &self.broker);
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> Result<MemoryChannel, BrokerError> {
        let mut state = self.broker.state();
        if state.closed_connections.contains(&self.id) {
            return Err("CONNECTION_FORCED - connection is closed".into());
        }
        state.next_channel += 1;
        Ok(MemoryChannel {
            broker: self.broker.clone(),
            connection: self.id,
            id: state.next_channel,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        MemoryConnection::close(self);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryChannel {
    broker: MemoryBroker,
    connection: ConnectionId,
    id: ChannelId,
}

impl MemoryChannel {
    fn fail(&self, state: &mut BrokerState, reason: String) -> BrokerError {
        state.closed_channels.insert(self.id);
        reason.into()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        state.check_channel(self.connection, self.id)?;

        if let Some(existing) = state.exchanges.get(name) {
            if let Some(reason) = exchange_mismatch(name, &existing.options, options) {
                return Err(self.fail(&mut state, reason));
            }
            return Ok(());
        }

        state.exchanges.insert(
            name.to_string(),
            Exchange {
                options: options.clone(),
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, BrokerError> {
        let mut state = self.broker.state();
        state.check_channel(self.connection, self.id)?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4().simple())
        } else {
            name.to_string()
        };

        if let Some(existing) = state.queues.get(&name) {
            if let Some(reason) = queue_mismatch(&name, &existing.options, options) {
                return Err(self.fail(&mut state, reason));
            }
            return Ok(name);
        }

        state.queues.insert(
            name.clone(),
            Queue {
                options: options.clone(),
                ready: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            },
        );
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        state.check_channel(self.connection, self.id)?;

        if !state.queues.contains_key(queue) {
            let reason = format!("NOT_FOUND - no queue '{queue}' in vhost '/'");
            return Err(self.fail(&mut state, reason));
        }
        let Some(ex) = state.exchanges.get_mut(exchange) else {
            let reason = format!("NOT_FOUND - no exchange '{exchange}' in vhost '/'");
            return Err(self.fail(&mut state, reason));
        };

        let binding = Binding {
            queue: queue.to_string(),
            key: binding_key.to_string(),
        };
        if !ex.bindings.contains(&binding) {
            ex.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, options: &ConsumeOptions) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.broker.state();
        state.check_channel(self.connection, self.id)?;

        let Some(q) = state.queues.get(queue) else {
            let reason = format!("NOT_FOUND - no queue '{queue}' in vhost '/'");
            return Err(self.fail(&mut state, reason));
        };
        if q
            .consumers
            .iter()
            .any(|c| c.channel == self.id && c.tag == options.consumer_tag)
        {
            let reason = format!(
                "NOT_ALLOWED - attempt to reuse consumer tag '{}'",
                options.consumer_tag
            );
            return Err(self.fail(&mut state, reason));
        }
        if options.exclusive && !q.consumers.is_empty() {
            let reason = format!("ACCESS_REFUSED - queue '{queue}' in vhost '/' in exclusive use");
            return Err(self.fail(&mut state, reason));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(q) = state.queues.get_mut(queue) {
            q.consumers.push(ConsumerSlot {
                tag: options.consumer_tag.clone(),
                channel: self.id,
                connection: self.connection,
                no_ack: options.no_ack,
                sender,
            });
        }
        state.dispatch(queue, &self.broker);

        let deliveries = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        });
        Ok(deliveries.boxed())
    }
}

struct MemoryAcker {
    broker: MemoryBroker,
    channel: ChannelId,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        state.settle(self.channel, delivery_tag)?;
        state.settlements.push(Settlement::Ack {
            channel: self.channel,
            delivery_tag,
        });
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.broker.state();
        let unacked = state.settle(self.channel, delivery_tag)?;
        state.settlements.push(Settlement::Reject {
            channel: self.channel,
            delivery_tag,
            requeue,
        });
        if requeue {
            if let Some(q) = state.queues.get_mut(&unacked.queue) {
                q.ready.push_front(unacked.body);
            }
            state.dispatch(&unacked.queue, &self.broker);
        }
        Ok(())
    }
}

fn exchange_mismatch(name: &str, current: &ExchangeOptions, received: &ExchangeOptions) -> Option<String> {
    let (arg, got, have) = if current.kind != received.kind {
        ("type", received.kind.to_string(), current.kind.to_string())
    } else if current.durable != received.durable {
        ("durable", received.durable.to_string(), current.durable.to_string())
    } else if current.auto_delete != received.auto_delete {
        ("auto_delete", received.auto_delete.to_string(), current.auto_delete.to_string())
    } else if current.internal != received.internal {
        ("internal", received.internal.to_string(), current.internal.to_string())
    } else {
        return None;
    };
    Some(format!(
        "PRECONDITION_FAILED - inequivalent arg '{arg}' for exchange '{name}' in vhost '/': received '{got}' but current is '{have}'"
    ))
}

fn queue_mismatch(name: &str, current: &QueueOptions, received: &QueueOptions) -> Option<String> {
    let (arg, got, have) = if current.durable != received.durable {
        ("durable", received.durable, current.durable)
    } else if current.auto_delete != received.auto_delete {
        ("auto_delete", received.auto_delete, current.auto_delete)
    } else if current.exclusive != received.exclusive {
        ("exclusive", received.exclusive, current.exclusive)
    } else {
        return None;
    };
    Some(format!(
        "PRECONDITION_FAILED - inequivalent arg '{arg}' for queue '{name}' in vhost '/': received '{got}' but current is '{have}'"
    ))
}
