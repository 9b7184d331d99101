//! Itinerary Selector Fuzz Harness
//!
//! Property-based testing infrastructure for the selector: strategies for
//! itinerary shapes, quota configurations and offer streams, invariant checks
//! over the engine and the driver, and a seeded runner with report export.
//!
//! # Usage
//!
//! ```rust,no_run
//! use fuzz_harness::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn search_keeps_invariants(s in scenario(3, 4, 6)) {
//!         prop_assert_eq!(check_search(&s), Ok(()));
//!     }
//! }
//! ```

pub mod generators;
pub mod invariants;
pub mod reports;
pub mod runner;

pub mod prelude {
    pub use crate::generators::*;
    pub use crate::invariants::{check_enumerator, check_offer_stream, check_search};
    pub use crate::runner::{FuzzConfig, FuzzResult, FuzzRunner};
    pub use proptest::prelude::*;
}

// Re-export proptest for convenience
pub use proptest;
