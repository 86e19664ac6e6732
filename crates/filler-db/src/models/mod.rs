mod fill;
mod order;

pub use fill::DbFill;
pub use order::DbOrder;
