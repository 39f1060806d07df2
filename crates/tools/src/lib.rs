//! Built-in tools and the dispatch layer for Orion.
//!
//! The worker model sees a fixed catalog of tools; every invocation goes
//! through [`ToolDispatcher`], which consults the [`ResponseCache`] before
//! executing anything.

pub mod cache;
pub mod calculator;
pub mod clock;
pub mod dispatcher;

use std::sync::Arc;

pub use cache::ResponseCache;
pub use calculator::CalculatorTool;
pub use clock::CurrentTimeTool;
pub use dispatcher::{Dispatched, ToolDispatcher};

/// Dispatcher over all built-in tools, without a cache.
pub fn default_dispatcher() -> ToolDispatcher {
    ToolDispatcher::new(vec![
        Arc::new(CalculatorTool::new()),
        Arc::new(CurrentTimeTool::new()),
    ])
}
