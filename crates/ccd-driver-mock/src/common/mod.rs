//! Shared infrastructure for the simulated camera.
//!
//! - **mode**: operational modes (Instant, Realistic, Chaos)
//! - **errors**: error injection for resilience testing
//! - **rng**: seeded RNG for reproducible failures and noise

pub mod errors;
pub mod mode;
pub mod rng;

pub use errors::{ErrorConfig, ErrorScenario, InjectedFault};
pub use mode::MockMode;
pub use rng::MockRng;
