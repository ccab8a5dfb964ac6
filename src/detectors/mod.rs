//! Trailing-window detectors, leaf-first
//!
//! - **volatility**: true range and ATR
//! - **consolidation**: rolling box and the tight-range flag
//! - **breakdown**: the breakdown→reclaim state machine
//! - **summary**: flattening and date filtering of reclaim events
//! - **momentum**: MA slope screen, grouping and capacity reduction
//!
//! Every rolling value at bar `t` reads bars `..=t` only.

pub mod helpers;

pub mod breakdown;
pub mod consolidation;
pub mod momentum;
pub mod summary;
pub mod volatility;

// Re-export all detectors for convenience
pub use breakdown::*;
pub use consolidation::*;
pub use helpers::*;
pub use momentum::*;
pub use summary::*;
pub use volatility::*;
