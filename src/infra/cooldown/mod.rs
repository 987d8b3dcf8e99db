//! Cooldown store backends.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryCooldownStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCooldownStore;
