//! The typed message handed to callers.
//!
//! On the wire a message is a JSON object with two string fields:
//!
//! ```json
//! { "command": "build", "payload": "site-123" }
//! ```
//!
//! Field names match case-insensitively and a missing or `null` field is an
//! empty string. Unknown fields are ignored so producers can add fields
//! without breaking older consumers. Anything that is not an object, or a
//! known field holding something other than a string, is malformed.

use std::fmt;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::transport::DeliveryHandle;
use crate::utils::error::{ClientError, Result};

/// Decoded body of a delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub command: String,
    pub payload: String,
}

impl Envelope {
    pub fn decode(body: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(EnvelopeVisitor)
    }
}

struct EnvelopeVisitor;

impl<'de> Visitor<'de> for EnvelopeVisitor {
    type Value = Envelope;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object with string fields command and payload")
    }

    // a bare `null` body leaves every field empty
    fn visit_unit<E: de::Error>(self) -> std::result::Result<Envelope, E> {
        Ok(Envelope::default())
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Envelope, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut envelope = Envelope::default();
        // later keys win, in document order
        while let Some(key) = map.next_key::<String>()? {
            if key.eq_ignore_ascii_case("command") {
                if let Some(command) = map.next_value::<Option<String>>()? {
                    envelope.command = command;
                }
            } else if key.eq_ignore_ascii_case("payload") {
                if let Some(payload) = map.next_value::<Option<String>>()? {
                    envelope.payload = payload;
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(envelope)
    }
}

/// A container for the command and payload of one delivery, plus the
/// capability to settle that delivery with the broker.
#[derive(Debug)]
pub struct Message {
    pub command: String,
    pub payload: String,
    delivery: DeliveryHandle,
    requeue_on_reject: bool,
}

impl Message {
    pub(crate) fn new(envelope: Envelope, delivery: DeliveryHandle, requeue_on_reject: bool) -> Self {
        Self {
            command: envelope.command,
            payload: envelope.payload,
            delivery,
            requeue_on_reject,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag()
    }

    /// Passes the success/failure decision through to the originating delivery.
    ///
    /// `true` acknowledges it; `false` rejects it, requeueing unless the
    /// consumer was configured otherwise. Settling the same delivery twice is
    /// left to the broker to refuse.
    pub async fn ack(&self, positive: bool) -> Result<()> {
        let outcome = if positive {
            self.delivery.ack().await
        } else {
            self.delivery.reject(self.requeue_on_reject).await
        };
        outcome.map_err(|source| ClientError::Ack {
            delivery_tag: self.delivery_tag(),
            source,
        })
    }
}
