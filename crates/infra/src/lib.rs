//! soundpath-infra: platform-facing implementations of the core
//! collaborator traits
//!
//! Provides stub/recording backends for bring-up and tests, the file-backed
//! calibration store, thermal clients, and the silence keep-alive worker.
//! Real vendor integrations implement the same `soundpath_core::domain::hal`
//! traits.

pub mod hal;
pub mod keepalive;

pub use hal::*;
pub use keepalive::KeepAlive;
