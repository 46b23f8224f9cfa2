//! The message collaborator: what the relay does with an inbound text frame.
//!
//! The event loop calls [`MessageHandler::on_message`] once per text frame,
//! in arrival order, with a [`RelayContext`] that borrows the registry for
//! the duration of that one event.  The default [`BroadcastHandler`] simply
//! relays the frame under the configured origin policy, which gives
//! chat-like behaviour.
//!
//! Custom handlers can filter, transform, or answer privately with
//! [`RelayContext::send_to`].  They run on the event loop task, so they must
//! not block.

use relay_core::{
    BroadcastRelay, ClientRegistry, DeliveryReport, RelayError, SlotIndex, Transport,
};

/// Borrowed view of the relay for one event.
pub struct RelayContext<'a, T> {
    registry: &'a mut ClientRegistry<T>,
    relay: &'a BroadcastRelay,
}

impl<'a, T: Transport> RelayContext<'a, T> {
    pub fn new(registry: &'a mut ClientRegistry<T>, relay: &'a BroadcastRelay) -> Self {
        Self { registry, relay }
    }

    /// Relays `text` from `origin` to every other open slot, or to all of
    /// them when the origin policy is `Include`.
    pub fn relay(&mut self, origin: SlotIndex, text: &str) -> DeliveryReport {
        self.relay.broadcast(self.registry, origin, text)
    }

    /// Sends `text` to a single slot.
    ///
    /// # Errors
    ///
    /// See [`BroadcastRelay::send_to`].
    pub fn send_to(&mut self, slot: SlotIndex, text: &str) -> Result<(), RelayError> {
        self.relay.send_to(self.registry, slot, text)
    }

    /// Sends `text` to every open slot.
    pub fn send_all(&mut self, text: &str) -> DeliveryReport {
        self.relay.send_all(self.registry, text)
    }

    /// Currently occupied slots in ascending order.
    pub fn occupied_slots(&self) -> Vec<SlotIndex> {
        self.registry.occupied_slots()
    }
}

/// Reacts to session lifecycle and inbound text frames.
pub trait MessageHandler<T: Transport>: Send {
    /// Called for every text frame received from the session in `slot`.
    fn on_message(&mut self, ctx: &mut RelayContext<'_, T>, slot: SlotIndex, text: &str);

    /// Called right after a session has been registered.
    fn on_open(&mut self, _ctx: &mut RelayContext<'_, T>, _slot: SlotIndex) {}

    /// Called after a session's slot has been released.
    fn on_close(&mut self, _slot: SlotIndex) {}
}

/// Relays every frame to the other sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastHandler;

impl<T: Transport> MessageHandler<T> for BroadcastHandler {
    fn on_message(&mut self, ctx: &mut RelayContext<'_, T>, slot: SlotIndex, text: &str) {
        let report = ctx.relay(slot, text);
        tracing::trace!(
            "slot {slot}: relayed {} bytes to {} peer(s), {} failed",
            text.len(),
            report.delivered.len(),
            report.failed.len()
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
