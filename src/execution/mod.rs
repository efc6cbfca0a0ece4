//! Order placement and exit-intent translation (SPEC_FULL §4.7, C7).

pub mod executor;

pub use executor::Executor;
