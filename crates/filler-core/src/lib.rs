pub mod config;
pub mod error;
pub mod generator;
pub mod orders_file;
pub mod sizing;
pub mod types;

pub use config::{DriverConfig, GeneratorConfig, LoaderConfig, RetryConfig};
pub use error::{FillerError, Result};
pub use generator::OrderGenerator;
pub use sizing::{FillPlan, FillSizer, RandomFillSizer};
pub use types::{Fill, FillOutcome, NewFill, Order, SkipReason, WorkItem};
