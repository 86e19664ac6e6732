mod driver;
mod executor;
mod loader;
mod progress;

pub use driver::{FillReport, ItemFailure, ParallelFillDriver};
pub use executor::{FillExecutor, OrderSink};
pub use loader::OrderLoader;
pub use progress::{ProgressReporter, ProgressTracker};

use filler_core::FillerError;
use filler_db::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] FillerError),

    #[error("{failed} of {total} work items failed")]
    ItemsFailed { failed: usize, total: usize },

    #[error("Worker task failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, DriverError>;
