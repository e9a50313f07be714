//! Run orchestration: drives every configured table through
//! watermark → plan → extract → partition → deliver → audit.

mod locks;
mod orchestrator;
mod report;
mod state;

pub use locks::TableLocks;
pub use orchestrator::{Engine, capture_now};
pub use report::{RunReport, TableReport};
pub use state::{RunState, TableRun};
