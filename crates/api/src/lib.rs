//! Waypoint gateway server library.
//!
//! Exposes the building blocks (config, state, error handling, stores,
//! routes, WebSocket infrastructure and the per-connection gateway) so
//! integration tests and the binary entrypoint can both access them.

pub mod background;
pub mod config;
pub mod error;
pub mod gateway;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
