//! Waypoint eventing primitives.
//!
//! - [`Evented`] -- typed listener registry whose `subscribe` returns a
//!   disposer.
//! - [`ExternalStore`] -- state container with change detection exposing
//!   `subscribe` / `get_snapshot` to rendering layers.
//! - [`EventBus`] -- in-process publish/subscribe hub for
//!   [`GatewayEvent`]s, backed by `tokio::sync::broadcast`.

pub mod bus;
pub mod evented;
pub mod store;

pub use bus::{EventBus, GatewayEvent, GatewayEventKind};
pub use evented::{Evented, Subscription};
pub use store::ExternalStore;
