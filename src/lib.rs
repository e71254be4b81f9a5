//! # Electric Bot Cache
//!
//! 电力运维机器人的缓存层核心库

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod testing;

// Re-export commonly used types
pub use cache::{CacheFactory, CacheManager, CacheType};
pub use config::AppConfig;
pub use error::{CacheError, Result};
