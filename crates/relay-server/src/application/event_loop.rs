//! The relay event loop: the single owner of the client registry.
//!
//! # How it works (for beginners)
//!
//! Every connection runs in its own Tokio task, but none of those tasks can
//! touch the registry.  Instead they send [`RelayEvent`]s through a
//! [`RelayHandle`] into one bounded queue, and one task (the event loop)
//! pulls them off one at a time:
//!
//! ```text
//!  connection task ─┐
//!  connection task ─┼─► mpsc queue ─► EventLoop::handle ─► ClientRegistry
//!  connection task ─┘                      │
//!                                          └─► MessageHandler ─► Outbox queues
//! ```
//!
//! Because exactly one task mutates the registry, it needs no lock, and each
//! event is handled to completion before the next one starts.  A slot freed
//! by a `Closed` event is therefore reusable by the very next `Register`.
//!
//! Outbound delivery never blocks the loop: each session's transport is a
//! bounded channel, and a full channel counts as a failed delivery.

use relay_core::{
    BroadcastRelay, ClientRegistry, CloseReason, OriginPolicy, RegistryError, SessionTicket,
    SlotIndex, Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::handler::{MessageHandler, RelayContext};

/// Depth of the event queue shared by all connection tasks.
pub const EVENT_QUEUE_DEPTH: usize = 1024;

// ── Events ────────────────────────────────────────────────────────────────────

/// One unit of work for the event loop.
#[derive(Debug)]
pub enum RelayEvent<T> {
    /// A connection completed its upgrade and wants a slot.
    Register {
        transport: T,
        reply: oneshot::Sender<Result<SessionTicket, RegistryError>>,
    },
    /// A text frame arrived on a registered session.
    Frame { ticket: SessionTicket, text: String },
    /// The connection behind `ticket` has gone away.
    Closed { ticket: SessionTicket },
    /// Asks for the currently occupied slots.
    Occupancy { reply: oneshot::Sender<Vec<SlotIndex>> },
    /// Closes every session and stops the loop.
    Shutdown,
}

/// Whether the loop keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

// ── EventLoop ─────────────────────────────────────────────────────────────────

/// Owns the registry and applies [`RelayEvent`]s to it in order.
pub struct EventLoop<T, H> {
    registry: ClientRegistry<T>,
    relay: BroadcastRelay,
    handler: H,
    events: mpsc::Receiver<RelayEvent<T>>,
}

impl<T, H> EventLoop<T, H>
where
    T: Transport,
    H: MessageHandler<T>,
{
    /// Creates a loop with `capacity` slots and the handle used to feed it.
    pub fn new(capacity: usize, policy: OriginPolicy, handler: H) -> (Self, RelayHandle<T>) {
        let (tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let event_loop = Self {
            registry: ClientRegistry::new(capacity),
            relay: BroadcastRelay::new(policy),
            handler,
            events,
        };
        (event_loop, RelayHandle { tx })
    }

    pub fn registry(&self) -> &ClientRegistry<T> {
        &self.registry
    }

    /// Handles one event to completion.
    pub fn handle(&mut self, event: RelayEvent<T>) -> Flow {
        match event {
            RelayEvent::Register { transport, reply } => self.on_register(transport, reply),
            RelayEvent::Frame { ticket, text } => self.on_frame(ticket, &text),
            RelayEvent::Closed { ticket } => self.on_closed(ticket),
            RelayEvent::Occupancy { reply } => {
                let _ = reply.send(self.registry.occupied_slots());
            }
            RelayEvent::Shutdown => {
                info!("event loop shutting down; closing {} session(s)", self.registry.len());
                self.registry.clear(CloseReason::Normal);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Pulls events until a `Shutdown` arrives or every handle is dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if self.handle(event) == Flow::Stop {
                return;
            }
        }
        debug!("all relay handles dropped; stopping event loop");
        self.registry.clear(CloseReason::Normal);
    }

    // ── Event handlers ────────────────────────────────────────────────────────

    fn on_register(
        &mut self,
        transport: T,
        reply: oneshot::Sender<Result<SessionTicket, RegistryError>>,
    ) {
        let ticket = match self.registry.acquire(transport) {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!("rejecting connection: {e}");
                let _ = reply.send(Err(e));
                return;
            }
        };

        info!(
            "session {} registered in slot {} ({}/{} in use)",
            ticket.id,
            ticket.slot,
            self.registry.len(),
            self.registry.capacity()
        );

        if reply.send(Ok(ticket)).is_err() {
            // The connection task went away before it learnt its slot.
            debug!("session {} abandoned during registration", ticket.id);
            self.registry.release_session(ticket);
            return;
        }

        let mut ctx = RelayContext::new(&mut self.registry, &self.relay);
        self.handler.on_open(&mut ctx, ticket.slot);
    }

    fn on_frame(&mut self, ticket: SessionTicket, text: &str) {
        if !self.registry.holds(ticket) {
            debug!(
                "dropping frame from session {} (slot {} no longer held)",
                ticket.id, ticket.slot
            );
            return;
        }
        let mut ctx = RelayContext::new(&mut self.registry, &self.relay);
        self.handler.on_message(&mut ctx, ticket.slot, text);
    }

    fn on_closed(&mut self, ticket: SessionTicket) {
        if self.registry.release_session(ticket) {
            info!(
                "session {} left slot {} ({}/{} in use)",
                ticket.id,
                ticket.slot,
                self.registry.len(),
                self.registry.capacity()
            );
            self.handler.on_close(ticket.slot);
        } else {
            debug!("session {} already released", ticket.id);
        }
    }
}

// ── RelayHandle ───────────────────────────────────────────────────────────────

/// Error returned by [`RelayHandle`] calls.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("relay event loop has stopped")]
    Stopped,
}

/// Cloneable sender side of the event loop.
pub struct RelayHandle<T> {
    tx: mpsc::Sender<RelayEvent<T>>,
}

// Manual impl: `T` itself does not need to be `Clone`.
impl<T> Clone for RelayHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> RelayHandle<T> {
    /// Registers a new session and waits for its slot.
    ///
    /// # Errors
    ///
    /// [`HandleError::Registry`] when every slot is taken, and
    /// [`HandleError::Stopped`] when the loop is gone.
    pub async fn register(&self, transport: T) -> Result<SessionTicket, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayEvent::Register { transport, reply }).await?;
        Ok(rx.await.map_err(|_| HandleError::Stopped)??)
    }

    /// Forwards a text frame from `ticket`'s session.
    pub async fn frame(&self, ticket: SessionTicket, text: String) -> Result<(), HandleError> {
        self.send(RelayEvent::Frame { ticket, text }).await
    }

    /// Reports that `ticket`'s connection has ended.
    pub async fn closed(&self, ticket: SessionTicket) -> Result<(), HandleError> {
        self.send(RelayEvent::Closed { ticket }).await
    }

    /// Returns the currently occupied slots.
    pub async fn occupancy(&self) -> Result<Vec<SlotIndex>, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayEvent::Occupancy { reply }).await?;
        rx.await.map_err(|_| HandleError::Stopped)
    }

    /// Asks the loop to close every session and stop.
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        self.send(RelayEvent::Shutdown).await
    }

    async fn send(&self, event: RelayEvent<T>) -> Result<(), HandleError> {
        self.tx.send(event).await.map_err(|_| HandleError::Stopped)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::BroadcastHandler;
    use relay_core::DeliveryError;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Peer {
        inbox: Vec<String>,
        closed_with: Option<CloseReason>,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeTransport(Arc<Mutex<Peer>>);

    impl FakeTransport {
        fn inbox(&self) -> Vec<String> {
            self.0.lock().unwrap().inbox.clone()
        }

        fn closed_with(&self) -> Option<CloseReason> {
            self.0.lock().unwrap().closed_with
        }
    }

    impl Transport for FakeTransport {
        fn send_text(&mut self, text: &str) -> Result<(), DeliveryError> {
            self.0.lock().unwrap().inbox.push(text.to_string());
            Ok(())
        }

        fn close(&mut self, reason: CloseReason) {
            self.0.lock().unwrap().closed_with = Some(reason);
        }
    }

    type TestLoop = EventLoop<FakeTransport, BroadcastHandler>;

    fn new_loop(capacity: usize) -> TestLoop {
        EventLoop::new(capacity, OriginPolicy::Exclude, BroadcastHandler).0
    }

    /// Registers a transport by driving one tick and returns the reply.
    fn register(
        event_loop: &mut TestLoop,
        transport: FakeTransport,
    ) -> Result<SessionTicket, RegistryError> {
        let (reply, mut rx) = oneshot::channel();
        event_loop.handle(RelayEvent::Register { transport, reply });
        rx.try_recv().expect("register always replies")
    }

    #[test]
    fn test_register_assigns_lowest_free_slot() {
        let mut event_loop = new_loop(2);

        let a = register(&mut event_loop, FakeTransport::default()).unwrap();
        let b = register(&mut event_loop, FakeTransport::default()).unwrap();

        assert_eq!(a.slot, SlotIndex(0));
        assert_eq!(b.slot, SlotIndex(1));
    }

    #[test]
    fn test_register_beyond_capacity_replies_with_error() {
        let mut event_loop = new_loop(1);
        register(&mut event_loop, FakeTransport::default()).unwrap();

        let result = register(&mut event_loop, FakeTransport::default());

        assert_eq!(result, Err(RegistryError::CapacityExceeded { capacity: 1 }));
        assert_eq!(event_loop.registry().len(), 1);
    }

    #[test]
    fn test_abandoned_registration_frees_slot() {
        // Arrange: the reply receiver is dropped before the loop answers.
        let mut event_loop = new_loop(1);
        let transport = FakeTransport::default();
        let (reply, rx) = oneshot::channel();
        drop(rx);

        // Act
        event_loop.handle(RelayEvent::Register {
            transport: transport.clone(),
            reply,
        });

        // Assert
        assert!(event_loop.registry().is_empty());
        assert_eq!(transport.closed_with(), Some(CloseReason::Normal));
    }

    #[test]
    fn test_frame_is_relayed_to_other_sessions() {
        let mut event_loop = new_loop(3);
        let peers: Vec<FakeTransport> = (0..3).map(|_| FakeTransport::default()).collect();
        let tickets: Vec<SessionTicket> = peers
            .iter()
            .map(|p| register(&mut event_loop, p.clone()).unwrap())
            .collect();

        let flow = event_loop.handle(RelayEvent::Frame {
            ticket: tickets[1],
            text: "ping".to_string(),
        });

        assert_eq!(flow, Flow::Continue);
        assert_eq!(peers[0].inbox(), vec!["ping"]);
        assert!(peers[1].inbox().is_empty());
        assert_eq!(peers[2].inbox(), vec!["ping"]);
    }

    #[test]
    fn test_closed_reclaims_slot_in_same_tick() {
        let mut event_loop = new_loop(1);
        let ticket = register(&mut event_loop, FakeTransport::default()).unwrap();

        event_loop.handle(RelayEvent::Closed { ticket });
        let next = register(&mut event_loop, FakeTransport::default());

        assert_eq!(next.map(|t| t.slot), Ok(SlotIndex(0)));
    }

    #[test]
    fn test_stale_frame_and_close_are_ignored() {
        // Arrange: slot 0 is recycled for a new session.
        let mut event_loop = new_loop(2);
        let old = register(&mut event_loop, FakeTransport::default()).unwrap();
        let listener = FakeTransport::default();
        register(&mut event_loop, listener.clone()).unwrap();
        event_loop.handle(RelayEvent::Closed { ticket: old });
        let new = register(&mut event_loop, FakeTransport::default()).unwrap();
        assert_eq!(new.slot, old.slot);

        // Act
        event_loop.handle(RelayEvent::Frame {
            ticket: old,
            text: "ghost".to_string(),
        });
        event_loop.handle(RelayEvent::Closed { ticket: old });

        // Assert
        assert!(listener.inbox().is_empty());
        assert!(event_loop.registry().holds(new));
    }

    #[test]
    fn test_occupancy_reports_slots() {
        let mut event_loop = new_loop(3);
        register(&mut event_loop, FakeTransport::default()).unwrap();
        register(&mut event_loop, FakeTransport::default()).unwrap();
        let (reply, mut rx) = oneshot::channel();

        event_loop.handle(RelayEvent::Occupancy { reply });

        assert_eq!(rx.try_recv().unwrap(), vec![SlotIndex(0), SlotIndex(1)]);
    }

    #[test]
    fn test_shutdown_closes_all_sessions_and_stops() {
        let mut event_loop = new_loop(2);
        let a = FakeTransport::default();
        let b = FakeTransport::default();
        register(&mut event_loop, a.clone()).unwrap();
        register(&mut event_loop, b.clone()).unwrap();

        let flow = event_loop.handle(RelayEvent::Shutdown);

        assert_eq!(flow, Flow::Stop);
        assert!(event_loop.registry().is_empty());
        assert_eq!(a.closed_with(), Some(CloseReason::Normal));
        assert_eq!(b.closed_with(), Some(CloseReason::Normal));
    }

    #[tokio::test]
    async fn test_handle_drives_running_loop() {
        // Arrange
        let (event_loop, handle) =
            EventLoop::<FakeTransport, _>::new(1, OriginPolicy::Exclude, BroadcastHandler);
        let task = tokio::spawn(event_loop.run());

        // Act
        let ticket = handle.register(FakeTransport::default()).await.unwrap();
        let rejected = handle.register(FakeTransport::default()).await;
        let occupied = handle.occupancy().await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        // Assert
        assert_eq!(ticket.slot, SlotIndex(0));
        assert_eq!(
            rejected,
            Err(HandleError::Registry(RegistryError::CapacityExceeded {
                capacity: 1
            }))
        );
        assert_eq!(occupied, vec![SlotIndex(0)]);
        assert_eq!(handle.occupancy().await, Err(HandleError::Stopped));
    }
}
