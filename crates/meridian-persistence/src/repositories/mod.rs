//! Repository implementations for database operations

mod index_prices;
mod market_indices;
mod regime_history;

pub use index_prices::IndexPriceRepository;
pub use market_indices::MarketIndexRepository;
pub use regime_history::RegimeHistoryRepository;
