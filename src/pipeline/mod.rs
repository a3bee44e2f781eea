//! Pipeline module - extraction, prompting, research and aggregation.

mod aggregator;
mod batch;
mod extract;
mod prompt;
mod research;

pub use aggregator::*;
pub use batch::*;
pub use extract::*;
pub use prompt::*;
pub use research::*;
