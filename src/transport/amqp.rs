//! AMQP 0-9-1 transport backed by `lapin`.
//!
//! `dial` validates the credentials, builds the trust store and client
//! identity, and only then opens the TLS connection. The TLS session is set up
//! by a rustls connector built from that context, so the broker is verified
//! against the configured CAs and nothing else. Deliveries are settled by tag
//! on the channel that carried them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicRejectOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::tcp::{HandshakeResult, RustlsConnector, TcpStream};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::ConnectionProperties;

use super::{
    Acknowledger, Channel, ConsumeOptions, Connection, DeliveryHandle, DeliveryStream,
    ExchangeKind, ExchangeOptions, QueueOptions, RawDelivery,
};
use crate::tls::{TlsContext, TlsCredentials};
use crate::utils::diagnostics::{Diagnostic, DiagnosticSink};
use crate::utils::error::{BrokerError, ClientError, Result};

/// Opens a mutually authenticated TLS connection to `url`.
///
/// Credentials are checked and loaded before any network activity; no retry
/// is attempted here.
pub async fn dial(
    url: &str,
    creds: &TlsCredentials,
    sink: &dyn DiagnosticSink,
) -> Result<AmqpConnection> {
    let context = TlsContext::from_credentials(creds)?;
    let connection_error = |source: BrokerError| ClientError::Connection {
        url: url.to_string(),
        source,
    };

    let uri: AMQPUri = url.parse().map_err(|e: String| connection_error(e.into()))?;

    sink.emit(Diagnostic::Dialing {
        url: url.to_string(),
    });

    let connector = tls_connector(&context);
    let inner = lapin::Connection::connector(
        uri,
        Box::new(move |uri: &AMQPUri| connect_tls(uri, &connector)),
        ConnectionProperties::default(),
    )
    .await
    .map_err(|e| connection_error(e.into()))?;

    Ok(AmqpConnection { inner })
}

fn tls_connector(context: &TlsContext) -> RustlsConnector {
    RustlsConnector::from(context.client_config())
}

/// Runs on lapin's blocking pool: TCP connect, then the TLS handshake with the
/// broker host as server name.
fn connect_tls(uri: &AMQPUri, connector: &RustlsConnector) -> HandshakeResult {
    let host = uri.authority.host.as_str();
    let addr = (host, uri.authority.port);
    let stream = match uri.query.connection_timeout {
        Some(millis) => TcpStream::connect_timeout(addr, Duration::from_millis(millis)),
        None => TcpStream::connect(addr),
    }?;
    let stream = stream.into_rustls(connector, host)?;
    stream.set_nonblocking(true)?;
    Ok(stream)
}

pub struct AmqpConnection {
    inner: lapin::Connection,
}

impl AmqpConnection {
    pub async fn close(&self) -> Result<()> {
        self.inner
            .close(200, "client closing")
            .await
            .map_err(|e| ClientError::Connection {
                url: String::from("<open connection>"),
                source: e.into(),
            })
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    type Channel = AmqpChannel;

    async fn open_channel(&self) -> std::result::Result<AmqpChannel, BrokerError> {
        let inner = self.inner.create_channel().await?;
        Ok(AmqpChannel { inner })
    }

    async fn close(&self) -> std::result::Result<(), BrokerError> {
        self.inner.close(200, "client closing").await?;
        Ok(())
    }
}

pub struct AmqpChannel {
    inner: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> std::result::Result<(), BrokerError> {
        let declare = ExchangeDeclareOptions {
            passive: false,
            durable: options.durable,
            auto_delete: options.auto_delete,
            internal: options.internal,
            nowait: options.no_wait,
        };
        self.inner
            .exchange_declare(name, lapin_kind(options.kind), declare, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn declare_queue(
        &self,
        name: &str,
        options: &QueueOptions,
    ) -> std::result::Result<String, BrokerError> {
        let declare = QueueDeclareOptions {
            passive: false,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: options.no_wait,
        };
        let queue = self
            .inner
            .queue_declare(name, declare, FieldTable::default())
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> std::result::Result<(), BrokerError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                binding_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> std::result::Result<DeliveryStream, BrokerError> {
        let consume = BasicConsumeOptions {
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            nowait: options.no_wait,
        };
        let consumer = self
            .inner
            .basic_consume(queue, &options.consumer_tag, consume, FieldTable::default())
            .await?;

        let acker: Arc<dyn Acknowledger> = Arc::new(AmqpAcker {
            channel: self.inner.clone(),
        });
        let deliveries = consumer.map(move |item| {
            item.map(|delivery| RawDelivery {
                handle: DeliveryHandle::new(delivery.delivery_tag, acker.clone()),
                body: delivery.data,
            })
            .map_err(BrokerError::from)
        });
        Ok(deliveries.boxed())
    }
}

struct AmqpAcker {
    channel: lapin::Channel,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self, delivery_tag: u64) -> std::result::Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> std::result::Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await?;
        Ok(())
    }
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}
