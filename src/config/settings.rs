use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tls::TlsCredentials;

/// Top-level configuration settings for the application.
///
/// Includes the broker connection, consumer behavior and log level.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub amqp: BrokerConfig,
    pub consumer: ConsumerSettings,
    pub log_level: String,
}

/// Where to connect and which exchange and queue to consume from.
///
/// Read-only for the pipeline: it is borrowed during setup and never mutated.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BrokerConfig {
    pub url: String,
    pub exchange: String,
    /// An empty name lets the broker generate one.
    pub queue: String,
    #[serde(alias = "tls_config")]
    pub tls: TlsCredentials,
}

/// How settled messages are handed back to the broker.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Whether `ack(false)` puts the delivery back on the queue.
    pub requeue_on_reject: bool,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub amqp: Option<PartialBrokerConfig>,
    pub consumer: Option<PartialConsumerSettings>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerConfig {
    pub url: Option<String>,
    pub exchange: Option<String>,
    pub queue: Option<String>,
    #[serde(alias = "tls_config")]
    pub tls: Option<PartialTlsCredentials>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialTlsCredentials {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca_cert: Option<Vec<PathBuf>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialConsumerSettings {
    pub requeue_on_reject: Option<bool>,
}

/// Defaults point at a local development broker and its certificates.
impl Default for Settings {
    fn default() -> Self {
        Self {
            amqp: BrokerConfig {
                url: "amqps://rabbit.lo:5671".to_string(),
                exchange: String::new(),
                queue: String::new(),
                tls: TlsCredentials::new(
                    "/usr/local/etc/certs/test.pem",
                    "/usr/local/etc/certs/test-key.pem",
                    ["/usr/local/etc/certs/ca.pem"],
                ),
            },
            consumer: ConsumerSettings {
                requeue_on_reject: true,
            },
            log_level: "info".to_string(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let amqp = self.amqp.unwrap_or_default();
        let tls = amqp.tls.unwrap_or_default();
        let consumer = self.consumer.unwrap_or_default();

        Settings {
            amqp: BrokerConfig {
                url: amqp.url.unwrap_or(defaults.amqp.url),
                exchange: amqp.exchange.unwrap_or(defaults.amqp.exchange),
                queue: amqp.queue.unwrap_or(defaults.amqp.queue),
                tls: TlsCredentials {
                    cert: tls.cert.unwrap_or(defaults.amqp.tls.cert),
                    key: tls.key.unwrap_or(defaults.amqp.tls.key),
                    ca_cert: tls.ca_cert.or(defaults.amqp.tls.ca_cert),
                },
            },
            consumer: ConsumerSettings {
                requeue_on_reject: consumer
                    .requeue_on_reject
                    .unwrap_or(defaults.consumer.requeue_on_reject),
            },
            log_level: self.log_level.unwrap_or(defaults.log_level),
        }
    }
}
