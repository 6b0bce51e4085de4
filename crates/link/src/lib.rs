//! Protocol session factory for Chatwire.
//!
//! [`driver`] defines the socket seam (the external protocol client),
//! [`connector`] drives one session's reconnection state machine over it,
//! and [`sim`] is an in-process loopback driver for local development and
//! tests.

pub mod connector;
pub mod driver;
pub mod sim;

pub use connector::{Connector, LinkEvent};
pub use driver::{
    CloseReason, Presence, SharedAuthState, SocketDriver, SocketEvent, SocketHandle,
};
pub use sim::SimDriver;
