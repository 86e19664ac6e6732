use crate::error::Result;
use crate::orders_file::OrdersFileWriter;
use crate::types::Order;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

const PROGRESS_EVERY: usize = 100_000;

/// Produces random orders that all share one symbol.
///
/// The symbol is picked once per generator, so every order written by one
/// generate run trades the same instrument.
pub struct OrderGenerator {
    symbol: String,
    rng: StdRng,
}

impl OrderGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let symbol = (&mut rng)
            .sample_iter(Alphanumeric)
            .map(char::from)
            .filter(char::is_ascii_lowercase)
            .take(3)
            .collect();
        Self { symbol, rng }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn generate(&mut self) -> Order {
        Order {
            account_id: self.rng.gen_range(1..=1_000_000_000),
            order_id: Uuid::new_v4(),
            symbol: self.symbol.clone(),
            order_started: Utc::now(),
            order_completed: None,
            total_shares_purchased: self.rng.gen_range(1..=1000),
            total_cost_of_order: Decimal::new(self.rng.gen_range(100..10_000), 2),
            attr_0: "foo".to_string(),
            attr_1: "bar".to_string(),
            attr_2: "baz".to_string(),
        }
    }

    /// Write `count` fresh orders to `path`, replacing any existing file
    pub fn write_orders_file(&mut self, path: &Path, count: usize) -> Result<usize> {
        info!(count, path = %path.display(), symbol = %self.symbol, "Generating orders");

        let mut writer = OrdersFileWriter::create(path)?;
        for _ in 0..count {
            let order = self.generate();
            writer.write(&order)?;
            if writer.rows() % PROGRESS_EVERY == 0 {
                info!(generated = writer.rows(), "Generating orders");
            }
        }
        let written = writer.finish()?;

        info!(written, path = %path.display(), "Orders file created");
        Ok(written)
    }
}

impl Default for OrderGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders_file::read_orders;

    #[test]
    fn test_symbol_is_three_lowercase_letters() {
        let generator = OrderGenerator::seeded(1);
        assert_eq!(generator.symbol().len(), 3);
        assert!(generator.symbol().chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_generated_orders_are_within_ranges() {
        let mut generator = OrderGenerator::seeded(9);
        for _ in 0..500 {
            let order = generator.generate();
            assert!((1..=1_000_000_000).contains(&order.account_id));
            assert!((1..=1000).contains(&order.total_shares_purchased));
            assert!(order.total_cost_of_order >= Decimal::new(100, 2));
            assert!(order.total_cost_of_order <= Decimal::new(9999, 2));
            assert_eq!(order.symbol, generator.symbol());
            assert!(order.order_completed.is_none());
        }
    }

    #[test]
    fn test_write_orders_file() {
        let path = std::env::temp_dir().join(format!("orders-{}.csv", Uuid::new_v4()));
        let mut generator = OrderGenerator::seeded(3);

        let written = generator.write_orders_file(&path, 25).unwrap();
        let orders = read_orders(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(written, 25);
        assert_eq!(orders.len(), 25);
        assert!(orders.iter().all(|o| o.symbol == generator.symbol()));
    }
}
