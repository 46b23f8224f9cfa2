//! Session entity and the transport seam.
//!
//! A [`Session`] represents one upgraded WebSocket peer.  It is created by the
//! [`ClientRegistry`](super::registry::ClientRegistry) only after the upgrade
//! handshake succeeded *and* a slot was acquired, and it lives inside that
//! slot until it is released.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! Connecting ──►  Open  ──►  Closing  ──►  Closed
//!                  │                         ▲
//!                  └── frames (no change) ───┘ (release)
//! ```
//!
//! - `Connecting`: the session object exists but has not been committed to a slot.
//! - `Open`: the session holds a slot and is a broadcast target.
//! - `Closing`: the registry is releasing it; the transport has been asked to close.
//! - `Closed`: terminal.  The registry drops the session in the same call.
//!
//! The session never owns a socket directly.  It owns a [`Transport`], which is
//! the narrow interface the core uses to push text to the peer.  In the server
//! this is a bounded channel feeding a writer task; in tests it is a mock.

use std::fmt;

use thiserror::Error;

// ── Identity types ────────────────────────────────────────────────────────────

/// Stable index of a slot in the client registry.
///
/// A slot index is valid for the whole lifetime of the session that holds it
/// and is only handed to a new session after an explicit release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    /// Returns the raw index.
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-unique identifier of a session.
///
/// Slot indices are reused; session ids are not.  Pairing the two lets a
/// late close report for a recycled slot be recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The `(slot, id)` pair handed back to a connection after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionTicket {
    pub slot: SlotIndex,
    pub id: SessionId,
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a session is being closed.
///
/// Each reason maps to an RFC 6455 close code sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly shutdown or peer-initiated close.
    Normal,
    /// The relay is full; the peer may retry later.
    PolicyViolation,
    /// A delivery to the peer failed.
    Error,
}

impl CloseReason {
    /// RFC 6455 close status code for this reason.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::PolicyViolation => 1008,
            CloseReason::Error => 1011,
        }
    }
}

// ── Transport seam ────────────────────────────────────────────────────────────

/// Failure to hand a message to a peer's transport.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer's connection is gone.
    #[error("peer disconnected")]
    Disconnected,

    /// The peer's outbound queue is full; it is not keeping up.
    #[error("peer outbound queue is full")]
    Backpressure,
}

/// Outbound half of a peer connection, as seen by the core.
///
/// Implementations must never block: a peer that cannot accept a message
/// right now reports [`DeliveryError::Backpressure`] instead of waiting.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Queues a UTF-8 text message for the peer.
    fn send_text(&mut self, text: &str) -> Result<(), DeliveryError>;

    /// Asks the peer connection to close.  Best effort.
    fn close(&mut self, reason: CloseReason);
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One upgraded WebSocket peer held by a registry slot.
#[derive(Debug)]
pub struct Session<T> {
    slot: SlotIndex,
    id: SessionId,
    state: SessionState,
    transport: T,
}

impl<T: Transport> Session<T> {
    /// Creates a session in the `Connecting` state.
    pub(crate) fn new(slot: SlotIndex, id: SessionId, transport: T) -> Self {
        Self {
            slot,
            id,
            state: SessionState::Connecting,
            transport,
        }
    }

    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ticket(&self) -> SessionTicket {
        SessionTicket {
            slot: self.slot,
            id: self.id,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns `true` if the session is a valid broadcast target.
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Marks the session as committed to its slot.
    pub(crate) fn open(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Open;
        }
    }

    /// Sends a text message to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Disconnected`] if the session is not open, or
    /// whatever the transport reports.
    pub fn send_text(&mut self, text: &str) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Disconnected);
        }
        self.transport.send_text(text)
    }

    /// Runs the close transition and tells the transport to close.
    ///
    /// Calling this on an already closed session does nothing.
    pub(crate) fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closing;
        self.transport.close(reason);
        self.state = SessionState::Closed;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
