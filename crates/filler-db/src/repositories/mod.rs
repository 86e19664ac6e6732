mod fill;
mod order;

pub use fill::FillRepository;
pub use order::OrderRepository;
