//! Meridian Persistence
//!
//! SQLite persistence for regime history, the market index registry, and
//! daily index closing prices.

mod database;
mod error;
mod models;
mod price_store;
mod regime_store;
mod repositories;

pub use database::Database;
pub use error::{PersistenceError, Result};
pub use models::*;
pub use price_store::SqlitePriceHistory;
pub use regime_store::RegimePersistence;
pub use repositories::*;
