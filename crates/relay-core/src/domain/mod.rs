//! Domain layer: sessions, the client registry, and broadcast fan-out.
//!
//! Nothing in here performs I/O.  Peers are reached only through the
//! [`Transport`] trait, so the whole layer can be driven from unit tests.

pub mod broadcast;
pub mod registry;
pub mod session;

pub use broadcast::{BroadcastRelay, DeliveryReport, OriginPolicy, RelayError};
pub use registry::{ClientRegistry, RegistryError};
pub use session::{
    CloseReason, DeliveryError, Session, SessionId, SessionState, SessionTicket, SlotIndex,
    Transport,
};
