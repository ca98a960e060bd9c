//! Report content: numbered items and item-level refinement

pub mod items;
pub mod refiner;

pub use items::{parse, render, MarkerGrammar, ParsedReport, ReportItem};
pub use refiner::{GranularRefiner, LockState, RefineOutcome};
