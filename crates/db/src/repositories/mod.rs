//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod biz_event_repo;
pub mod biz_repo;
pub mod client_data_repo;
pub mod content_repo;
pub mod environment_repo;
pub mod lock_repo;

pub use biz_event_repo::BizEventRepo;
pub use biz_repo::BizRepo;
pub use client_data_repo::ClientDataRepo;
pub use content_repo::ContentRepo;
pub use environment_repo::EnvironmentRepo;
pub use lock_repo::LockRepo;
