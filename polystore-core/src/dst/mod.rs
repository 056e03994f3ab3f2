//! DST - Deterministic Simulation Testing
//!
//! Seeded randomness and probabilistic fault injection for simulated
//! backends. Same seed, same faults, same failure.
//!
//! # Usage
//!
//! ```rust
//! use polystore_core::dst::{DeterministicRng, FaultConfig, FaultInjectorBuilder, FaultType};
//!
//! let injector = FaultInjectorBuilder::new(DeterministicRng::new(42))
//!     .with_fault(FaultConfig::new(FaultType::StorageWriteFail, 1.0).with_filter("create"))
//!     .build();
//!
//! assert_eq!(injector.should_inject("create"), Some(FaultType::StorageWriteFail));
//! assert_eq!(injector.should_inject("read"), None);
//! ```
//!
//! Run with explicit seed for reproducibility:
//! ```bash
//! DST_SEED=12345 cargo test
//! ```

mod fault;
mod rng;

pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use rng::DeterministicRng;

/// Seed taken from `DST_SEED`, or the given fallback.
///
/// The chosen seed is logged so a failing run can be replayed.
#[must_use]
pub fn seed_from_env(fallback: u64) -> u64 {
    let seed = std::env::var("DST_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback);
    tracing::info!(seed, "DST seed");
    seed
}
