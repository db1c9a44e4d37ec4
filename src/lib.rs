//! Real-time sync core for a collaborative task board.
//!
//! A [`session::Session`] keeps a local cache of one project's board in step
//! with a STOMP-over-websocket broker and a REST API: it owns the connection,
//! routes broadcasts into the store, tracks who is online and reconciles
//! optimistic writes with the server's answers.

pub mod api;
pub mod config;
pub mod error;
pub mod presence;
pub mod reconciler;
pub mod room;
pub mod router;
pub mod session;
pub mod store;
pub mod subscriptions;
pub mod transport;
