//! BroadcastRelay: fan-out of one text message to registry sessions.
//!
//! The relay never aborts a fan-out because one peer misbehaves.  Each target
//! is attempted independently; a failed target is logged and released from
//! the registry right away, and delivery continues with the next one.
//!
//! Every target in the snapshot ends up in exactly one of
//! [`DeliveryReport::delivered`] or [`DeliveryReport::failed`].

use thiserror::Error;
use tracing::{debug, warn};

use super::registry::ClientRegistry;
use super::session::{CloseReason, DeliveryError, SlotIndex, Transport};

/// Whether a broadcast is echoed back to the slot that sent it.
///
/// The default is [`OriginPolicy::Exclude`]: a message from slot `a` reaches
/// every other open slot but not `a` itself, as in a chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    #[default]
    Exclude,
    Include,
}

/// Errors from single-target sends.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RelayError {
    /// Nothing is registered at this slot.
    #[error("no open session in slot {0}")]
    NoSuchSlot(SlotIndex),

    /// The transport rejected the message; the slot has been released.
    #[error("delivery to slot {slot} failed: {source}")]
    Delivery {
        slot: SlotIndex,
        #[source]
        source: DeliveryError,
    },
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Slots that accepted the message.
    pub delivered: Vec<SlotIndex>,
    /// Slots whose transport failed.  These have been released.
    pub failed: Vec<SlotIndex>,
}

impl DeliveryReport {
    /// Total number of targets attempted.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Delivers messages to sessions held in a [`ClientRegistry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastRelay {
    policy: OriginPolicy,
}

impl BroadcastRelay {
    pub fn new(policy: OriginPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> OriginPolicy {
        self.policy
    }

    /// Relays `text` received from `origin` to the policy-defined target set.
    pub fn broadcast<T: Transport>(
        &self,
        registry: &mut ClientRegistry<T>,
        origin: SlotIndex,
        text: &str,
    ) -> DeliveryReport {
        let skip = match self.policy {
            OriginPolicy::Exclude => Some(origin),
            OriginPolicy::Include => None,
        };
        fan_out(registry, skip, text)
    }

    /// Delivers `text` to every open slot.
    pub fn send_all<T: Transport>(
        &self,
        registry: &mut ClientRegistry<T>,
        text: &str,
    ) -> DeliveryReport {
        fan_out(registry, None, text)
    }

    /// Delivers `text` to one slot.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NoSuchSlot`] when the slot is empty or not open,
    /// and [`RelayError::Delivery`] when the transport fails.  In the latter
    /// case the slot has already been released.
    pub fn send_to<T: Transport>(
        &self,
        registry: &mut ClientRegistry<T>,
        slot: SlotIndex,
        text: &str,
    ) -> Result<(), RelayError> {
        if !registry.get(slot).is_some_and(|s| s.is_open()) {
            return Err(RelayError::NoSuchSlot(slot));
        }
        deliver(registry, slot, text)
    }
}

/// Sends to every open slot except `skip`, isolating failures.
fn fan_out<T: Transport>(
    registry: &mut ClientRegistry<T>,
    skip: Option<SlotIndex>,
    text: &str,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    registry.for_each_occupied(|reg, slot| {
        if Some(slot) == skip {
            return;
        }
        if !reg.get(slot).is_some_and(|s| s.is_open()) {
            return;
        }
        match deliver(reg, slot, text) {
            Ok(()) => report.delivered.push(slot),
            Err(_) => report.failed.push(slot),
        }
    });

    debug!(
        delivered = report.delivered.len(),
        failed = report.failed.len(),
        "fan-out complete"
    );
    report
}

/// Sends to an open slot; on failure releases it with [`CloseReason::Error`].
fn deliver<T: Transport>(
    registry: &mut ClientRegistry<T>,
    slot: SlotIndex,
    text: &str,
) -> Result<(), RelayError> {
    let Some(session) = registry.get_mut(slot) else {
        return Err(RelayError::NoSuchSlot(slot));
    };

    match session.send_text(text) {
        Ok(()) => Ok(()),
        Err(source) => {
            warn!(%slot, error = %source, "delivery failed; releasing slot");
            registry.release_with(slot, CloseReason::Error);
            Err(RelayError::Delivery { slot, source })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::MockTransport;
    use mockall::predicate::eq;

    fn accepting(times: usize) -> MockTransport {
        let mut t = MockTransport::new();
        t.expect_send_text().times(times).returning(|_| Ok(()));
        t.expect_close().return_const(());
        t
    }

    fn failing() -> MockTransport {
        let mut t = MockTransport::new();
        t.expect_send_text()
            .times(1)
            .returning(|_| Err(DeliveryError::Disconnected));
        t.expect_close()
            .with(eq(CloseReason::Error))
            .times(1)
            .return_const(());
        t
    }

    #[test]
    fn test_default_policy_excludes_origin() {
        assert_eq!(OriginPolicy::default(), OriginPolicy::Exclude);
        assert_eq!(BroadcastRelay::default().policy(), OriginPolicy::Exclude);
    }

    #[test]
    fn test_broadcast_exclude_origin_skips_sender() {
        // Arrange: origin transport must never be written to.
        let mut registry = ClientRegistry::new(3);
        registry.acquire(accepting(0)).unwrap();
        registry.acquire(accepting(1)).unwrap();
        registry.acquire(accepting(1)).unwrap();
        let relay = BroadcastRelay::new(OriginPolicy::Exclude);

        // Act
        let report = relay.broadcast(&mut registry, SlotIndex(0), "hello");

        // Assert
        assert_eq!(report.delivered, vec![SlotIndex(1), SlotIndex(2)]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_broadcast_include_origin_echoes_to_sender() {
        let mut registry = ClientRegistry::new(2);
        registry.acquire(accepting(1)).unwrap();
        registry.acquire(accepting(1)).unwrap();
        let relay = BroadcastRelay::new(OriginPolicy::Include);

        let report = relay.broadcast(&mut registry, SlotIndex(0), "echo");

        assert_eq!(report.delivered, vec![SlotIndex(0), SlotIndex(1)]);
    }

    #[test]
    fn test_broadcast_failure_releases_target_and_continues() {
        // Arrange: slot 1 fails; slots 2 and 3 must still receive.
        let mut registry = ClientRegistry::new(4);
        registry.acquire(accepting(0)).unwrap();
        registry.acquire(failing()).unwrap();
        registry.acquire(accepting(1)).unwrap();
        registry.acquire(accepting(1)).unwrap();
        let relay = BroadcastRelay::default();

        // Act
        let report = relay.broadcast(&mut registry, SlotIndex(0), "M");

        // Assert
        assert_eq!(report.delivered, vec![SlotIndex(2), SlotIndex(3)]);
        assert_eq!(report.failed, vec![SlotIndex(1)]);
        assert_eq!(report.attempted(), 3);
        assert!(registry.get(SlotIndex(1)).is_none());
    }

    #[test]
    fn test_send_all_reaches_every_open_slot() {
        let mut registry = ClientRegistry::new(3);
        registry.acquire(accepting(1)).unwrap();
        registry.acquire(accepting(1)).unwrap();
        let relay = BroadcastRelay::default();

        let report = relay.send_all(&mut registry, "all");

        assert_eq!(report.delivered, vec![SlotIndex(0), SlotIndex(1)]);
    }

    #[test]
    fn test_send_to_single_slot() {
        let mut registry = ClientRegistry::new(2);
        registry.acquire(accepting(0)).unwrap();
        let mut target = MockTransport::new();
        target
            .expect_send_text()
            .with(eq("direct"))
            .times(1)
            .returning(|_| Ok(()));
        target.expect_close().return_const(());
        registry.acquire(target).unwrap();

        let result = BroadcastRelay::default().send_to(&mut registry, SlotIndex(1), "direct");

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_send_to_empty_slot_is_no_such_slot() {
        let mut registry: ClientRegistry<MockTransport> = ClientRegistry::new(2);
        let result = BroadcastRelay::default().send_to(&mut registry, SlotIndex(1), "x");
        assert_eq!(result, Err(RelayError::NoSuchSlot(SlotIndex(1))));
    }

    #[test]
    fn test_send_to_failing_slot_releases_it() {
        let mut registry = ClientRegistry::new(1);
        registry.acquire(failing()).unwrap();

        let result = BroadcastRelay::default().send_to(&mut registry, SlotIndex(0), "x");

        assert_eq!(
            result,
            Err(RelayError::Delivery {
                slot: SlotIndex(0),
                source: DeliveryError::Disconnected
            })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_broadcast_on_empty_registry_is_empty_report() {
        let mut registry: ClientRegistry<MockTransport> = ClientRegistry::new(3);
        let report = BroadcastRelay::default().broadcast(&mut registry, SlotIndex(0), "x");
        assert_eq!(report, DeliveryReport::default());
    }
}
