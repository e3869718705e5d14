//! Inbound packet routing.
//!
//! The dispatcher peeks at the first byte of each frame: JSON envelopes are
//! decoded and delivered to the typed handler registered for their packet
//! type; anything else is handed to the binary sink (the server's relay
//! table). Handlers run synchronously on the poll loop and must not block.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::envelope::{is_envelope_frame, Envelope, EnvelopeError, PacketType};
use crate::transport::{DeliveryChannel, PeerConnection};

/// Which side of the wire this dispatcher serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Server,
    Client,
}

/// Context handed to every handler invocation.
pub struct PacketContext {
    pub connection: Arc<dyn PeerConnection>,
    pub channel: DeliveryChannel,
    pub role: EndpointRole,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("a handler is already registered for {0}")]
    HandlerExists(PacketType),
    #[error("envelope decode failed: {0}")]
    Decode(#[from] EnvelopeError),
}

type EnvelopeHandler =
    Box<dyn Fn(serde_json::Value, &PacketContext) -> anyhow::Result<()> + Send + Sync>;
type BinarySink = Box<dyn Fn(&[u8], &PacketContext) + Send + Sync>;

/// Routes inbound frames to typed handlers by packet type.
#[derive(Default)]
pub struct PacketDispatcher {
    handlers: RwLock<HashMap<PacketType, EnvelopeHandler>>,
    binary_sink: RwLock<Option<BinarySink>>,
}

impl PacketDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw-JSON handler. Registering twice for one type fails.
    pub fn register<F>(&self, packet_type: PacketType, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(serde_json::Value, &PacketContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if handlers.contains_key(&packet_type) {
            return Err(DispatchError::HandlerExists(packet_type));
        }
        handlers.insert(packet_type, Box::new(handler));
        Ok(())
    }

    /// Register a handler that receives the payload deserialized into `T`.
    pub fn register_typed<T, F>(
        &self,
        packet_type: PacketType,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        T: serde::de::DeserializeOwned + 'static,
        F: Fn(T, &PacketContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(packet_type, move |payload, ctx| {
            let typed: T = serde_json::from_value(payload)?;
            handler(typed, ctx)
        })
    }

    /// Install the sink that receives every non-envelope frame.
    pub fn set_binary_sink<F>(&self, sink: F)
    where
        F: Fn(&[u8], &PacketContext) + Send + Sync + 'static,
    {
        *self
            .binary_sink
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Box::new(sink));
    }

    /// Route one inbound frame.
    ///
    /// Returns `Ok(true)` when a handler or the binary sink consumed the
    /// frame, `Ok(false)` for unknown/unhandled types, and `Err` only for a
    /// malformed envelope. Handler failures are isolated per packet: they are
    /// logged and the frame still counts as consumed.
    pub fn dispatch(&self, frame: &[u8], ctx: &PacketContext) -> Result<bool, DispatchError> {
        if frame.is_empty() {
            return Ok(false);
        }

        if !is_envelope_frame(frame) {
            let sink = self
                .binary_sink
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            return Ok(match sink.as_ref() {
                Some(sink) => {
                    sink(frame, ctx);
                    true
                }
                None => false,
            });
        }

        let envelope = match Envelope::from_slice(frame) {
            Ok(envelope) => envelope,
            // Unknown type is a non-event, not an error.
            Err(EnvelopeError::UnknownType(value)) => {
                tracing::debug!(packet_type = %value, "Ignoring envelope with unknown packet type");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(handler) = handlers.get(&envelope.packet_type) else {
            return Ok(false);
        };

        if let Err(err) = handler(envelope.payload, ctx) {
            tracing::warn!(
                packet_type = %envelope.packet_type,
                connection_id = ctx.connection.id(),
                error = %err,
                "Packet handler failed"
            );
        }
        Ok(true)
    }
}
