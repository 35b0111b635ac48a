//! Data types exchanged with clients and upstream services.
//!
//! Nothing here is persisted; records serialize as JSON via `serde`.

pub mod asset;
pub mod build;
