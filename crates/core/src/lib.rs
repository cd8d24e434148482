//! Waypoint domain core.
//!
//! Pure logic with zero internal dependencies: the attribute model, URL
//! pattern matching, the rules-condition tree and its evaluator, element
//! selector resolution, content sessions, and the WebSocket protocol DTOs
//! shared by the gateway (`waypoint-api`) and the embedded client
//! (`waypoint-sdk`).

pub mod attributes;
pub mod client_data;
pub mod conditions;
pub mod element;
pub mod error;
pub mod hashing;
pub mod protocol;
pub mod session;
pub mod types;
pub mod url_pattern;
