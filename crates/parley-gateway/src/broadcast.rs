use std::collections::HashSet;

use bytes::Bytes;
use tracing::{debug, error, warn};

use parley_types::UserId;
use parley_types::events::ServerMessage;

use crate::registry::{ConnectionRegistry, SendFailure};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Not connected, or connection already gone. Expected, not an error.
    pub offline: usize,
    /// Connected but not draining its queue.
    pub dropped: usize,
}

/// Pushes encoded envelopes to whichever recipients are connected.
#[derive(Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
}

impl Broadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Sends `message` to every connected recipient. Never waits on a
    /// recipient: a full queue drops the frame for that recipient only.
    pub fn broadcast<I>(&self, recipients: I, message: &ServerMessage) -> Delivery
    where
        I: IntoIterator<Item = UserId>,
    {
        let frame = match message.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!("Skipping {} broadcast: {}", message.kind, e);
                return Delivery::default();
            }
        };

        let mut seen = HashSet::new();
        let mut delivery = Delivery::default();

        for user_id in recipients {
            if !seen.insert(user_id) {
                continue;
            }

            let Some(handle) = self.registry.lookup(user_id) else {
                delivery.offline += 1;
                continue;
            };

            match handle.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(SendFailure::Closed) => delivery.offline += 1,
                Err(SendFailure::Full) => {
                    warn!("{} is not draining its queue, dropped {} frame", user_id, message.kind);
                    delivery.dropped += 1;
                }
            }
        }

        debug!(
            "{} broadcast: {} delivered, {} offline, {} dropped",
            message.kind, delivery.delivered, delivery.offline, delivery.dropped
        );
        delivery
    }

    pub fn send_to(&self, user_id: UserId, message: &ServerMessage) -> Delivery {
        self.broadcast([user_id], message)
    }
}
