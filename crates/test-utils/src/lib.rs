//! Shared test utilities for graphvault crates.
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`CrashInjector`] - Deterministic crash points for commit-sequence tests
//! - [`strategies`] - Proptest generators for quads, patterns and change sequences

#![deny(unsafe_code)]

mod test_dir;
pub use test_dir::{STORE_EXTENSION, TestDir};

mod crash_injector;
pub use crash_injector::{CrashInjector, CrashPoint};

pub mod strategies;
