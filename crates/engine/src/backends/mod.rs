//! Bundled backend implementations
//!
//! | Backend | Storage | Bridge | Use |
//! |---------|---------|--------|-----|
//! | InMemory | Hash maps | Optional | Tests, prototyping |
//!
//! Production backends implement [`strata_core::Backend`] in their own
//! crates and are registered with the manager builder.

mod inmemory;

pub use inmemory::InMemoryBackend;
