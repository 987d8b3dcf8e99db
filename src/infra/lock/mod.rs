//! Lock store backends.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryLockStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLockStore;
