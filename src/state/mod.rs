//! State module for tracking harvest progress
//!
//! # Components
//!
//! - `PageState`: the per-page state machine driven by the orchestrator
//! - `ScrapeState`: the durable per-source record of completed and failed pages

mod page_state;
mod scrape_state;

// Re-export main types
pub use page_state::PageState;
pub use scrape_state::{FailedPage, ScrapeState};
