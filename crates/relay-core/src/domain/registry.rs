//! ClientRegistry: bounded slot table of active sessions.
//!
//! The registry is a fixed-size array of slots.  Each slot is either empty or
//! holds exactly one [`Session`].  It is the only owner of sessions: other
//! components look sessions up by [`SlotIndex`] for the duration of one call
//! and never keep references across calls.
//!
//! # Slot allocation (for beginners)
//!
//! New sessions get the *lowest-numbered* free slot ("first-fit").  With a
//! capacity of 3:
//!
//! ```text
//! acquire → 0     [A][ ][ ]
//! acquire → 1     [A][B][ ]
//! acquire → 2     [A][B][C]
//! release(1)      [A][ ][C]
//! acquire → 1     [A][D][C]     ← lowest free slot is reused
//! acquire → Err   CapacityExceeded
//! ```
//!
//! # Invariants
//!
//! - Capacity is fixed at construction and never grows.
//! - Each occupied slot holds exactly one session, and a session occupies
//!   exactly one slot.
//! - Slot indices are stable for a session's lifetime and are only reused
//!   after an explicit release.

use thiserror::Error;

use super::session::{CloseReason, Session, SessionId, SessionTicket, SlotIndex, Transport};

/// Errors returned by [`ClientRegistry`] operations.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot is occupied.  Existing sessions are unaffected.
    #[error("relay is at capacity ({capacity} clients)")]
    CapacityExceeded { capacity: usize },
}

/// Fixed-capacity table mapping slot indices to sessions.
#[derive(Debug)]
pub struct ClientRegistry<T> {
    slots: Vec<Option<Session<T>>>,
    next_id: u64,
}

impl<T: Transport> ClientRegistry<T> {
    /// Creates a registry with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, next_id: 0 }
    }

    /// Maximum number of concurrent sessions.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Commits a handshaken connection to the lowest free slot.
    ///
    /// The new session is `Open` when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when every slot is taken.
    /// The transport is dropped before returning; no session is created.
    pub fn acquire(&mut self, transport: T) -> Result<SessionTicket, RegistryError> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity(),
            });
        };

        let slot = SlotIndex(index);
        let id = SessionId(self.next_id);
        self.next_id += 1;

        let mut session = Session::new(slot, id, transport);
        session.open();
        self.slots[index] = Some(session);

        Ok(SessionTicket { slot, id })
    }

    /// Frees `slot`, closing its session with [`CloseReason::Normal`].
    ///
    /// Releasing an empty or out-of-range slot is a no-op and returns `None`.
    pub fn release(&mut self, slot: SlotIndex) -> Option<Session<T>> {
        self.release_with(slot, CloseReason::Normal)
    }

    /// Frees `slot` with an explicit close reason.
    pub fn release_with(&mut self, slot: SlotIndex, reason: CloseReason) -> Option<Session<T>> {
        let mut session = self.slots.get_mut(slot.get())?.take()?;
        session.close(reason);
        Some(session)
    }

    /// Frees `ticket.slot` only if it still holds session `ticket.id`.
    ///
    /// Returns `true` if a session was released.  A stale ticket for a slot
    /// that has since been reused leaves the new occupant in place.
    pub fn release_session(&mut self, ticket: SessionTicket) -> bool {
        if !self.holds(ticket) {
            return false;
        }
        self.release(ticket.slot).is_some()
    }

    /// Returns `true` if `ticket.slot` currently holds session `ticket.id`.
    pub fn holds(&self, ticket: SessionTicket) -> bool {
        self.get(ticket.slot).is_some_and(|s| s.id() == ticket.id)
    }

    pub fn get(&self, slot: SlotIndex) -> Option<&Session<T>> {
        self.slots.get(slot.get())?.as_ref()
    }

    pub fn get_mut(&mut self, slot: SlotIndex) -> Option<&mut Session<T>> {
        self.slots.get_mut(slot.get())?.as_mut()
    }

    /// Occupied slot indices in ascending order.
    pub fn occupied_slots(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| SlotIndex(i))
            .collect()
    }

    /// Tickets of all occupied slots in ascending slot order.
    pub fn tickets(&self) -> Vec<SessionTicket> {
        self.slots.iter().flatten().map(Session::ticket).collect()
    }

    /// Visits every occupied slot in ascending order.
    ///
    /// The set of slots is snapshotted before the first call.  `f` receives
    /// the registry mutably and may release any slot.  A slot released (or
    /// reassigned) before it is reached is skipped; no slot is visited twice.
    pub fn for_each_occupied<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Self, SlotIndex),
    {
        for ticket in self.tickets() {
            if self.holds(ticket) {
                f(self, ticket.slot);
            }
        }
    }

    /// Releases every session with `reason`.
    pub fn clear(&mut self, reason: CloseReason) {
        for index in 0..self.slots.len() {
            self.release_with(SlotIndex(index), reason);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
