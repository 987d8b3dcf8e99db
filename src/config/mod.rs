//! Configuration models for backends, cancellation, locks and cooldowns.

pub mod coordination;

pub use coordination::{
    CancelConfig, CoordinationConfig, CooldownConfig, LockConfig, StoreBackendConfig,
};
