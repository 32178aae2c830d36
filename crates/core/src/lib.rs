//! # Conduit Core
//!
//! Domain types, capability traits, and error definitions for the Conduit
//! event runtime. This crate carries **no runtime logic**: it defines the
//! vocabulary that the hub, router, and gateway crates are written against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the runtime talks to is a narrow trait defined here:
//! - [`EventHandler`]: subscribers on the event hub
//! - [`MessageHandler`]: route targets selected by the router
//! - [`Transport`]: platform adapters exchanging [`Packet`]s with the gateway
//!
//! Implementations live outside the core, so every subsystem can be tested
//! with in-process mocks.

pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod packet;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use error::{
    DispatchError, Error, GatewayError, HandlerError, HandlerErrorKind, HubError, Result,
    RoutingError, SessionError, TransportError,
};
pub use event::{Event, EventId, EventSelector, EventType};
pub use handler::{
    EventHandler, HandlerStatus, InvocationContext, MessageHandler, handler_fn,
};
pub use message::Message;
pub use packet::Packet;
pub use transport::Transport;
