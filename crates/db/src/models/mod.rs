//! Database row types.

pub mod biz;
pub mod client_data;
pub mod content;
pub mod environment;
pub mod event;
pub mod lock;
