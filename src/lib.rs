//! # rabbit-client
//!
//! `rabbit-client` is a consumer for a fanout exchange on an AMQP broker. It
//! connects over mutual TLS, declares the exchange, queue and binding it
//! needs, and hands the caller an ordered stream of typed messages, each of
//! which the caller acknowledges or rejects explicitly.
//!
//! ## Core Modules
//!
//! - `config`: Loads the broker, TLS and consumer settings.
//! - `consumer`: The pipeline: topology declaration, delivery translation and
//!   the `MessageStream` handed to callers.
//! - `tls`: Credential checks and the trust store / client identity used to dial.
//! - `transport`: The broker client boundary, with a `lapin` implementation and
//!   an in-process fanout broker.
//! - `utils`: Error types, logging setup and diagnostic events.
//!
//! ```no_run
//! # async fn run() -> rabbit_client::utils::Result<()> {
//! let settings = rabbit_client::config::load_config().expect("configuration");
//! let mut messages = rabbit_client::consumer::new_consumer(&settings).await?;
//! while let Some(message) = messages.recv().await {
//!     println!("{}: {}", message.command, message.payload);
//!     message.ack(true).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod tls;
pub mod transport;
pub mod utils;

pub use consumer::{Message, MessageStream, new_consumer};
