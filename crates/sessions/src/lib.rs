//! Session registry and lifecycle management for Chatwire.
//!
//! [`SessionRegistry`] is the orchestrator: an in-memory map from instance
//! id to session record, arbitrating concurrent create-or-resume calls,
//! racing connector events against caller-facing timeouts, and exposing the
//! status/send/delete/list surface the HTTP layer consumes.

pub mod pairing;
pub mod registry;

pub use registry::{CreateOutcome, InstanceStatus, SessionRegistry};
