// src/connection/mod.rs

//! Manages the lifecycle of a single gateway connection: the websocket
//! session, the concurrent heartbeat loop, and payload dispatch.

// Declare the private sub-modules of the `connection` module.
mod dispatcher;
mod handler;
mod heartbeat;
mod session;

// Publicly re-export the primary types from the sub-modules.
// This creates a clean public API for the `connection` module, hiding the
// internal file structure from the rest of the crate.
pub use dispatcher::{DispatchOutcome, dispatch};
pub use handler::ConnectionHandler;
pub use heartbeat::HeartbeatScheduler;
pub use session::Session;
