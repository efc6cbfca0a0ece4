//! Confluence scoring, signal emission, and signal persistence (SPEC_FULL
//! §4.5, C5).

pub mod evaluator;
pub mod signal_store;
pub mod zone;

pub use evaluator::{ConfluenceEvaluator, TimeframeWindows};
pub use signal_store::SignalStore;
pub use zone::BuyZone;
