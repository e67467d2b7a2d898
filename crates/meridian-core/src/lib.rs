//! Meridian Core
//!
//! Core types, configuration, and capability traits for the Meridian
//! regime-aware risk and position-sizing engine.

pub mod catalog;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use catalog::*;
pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;
