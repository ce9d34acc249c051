//! Haven Core Library
//!
//! This library provides core functionality for the Haven gateway including:
//! - Configuration management
//! - Service registry
//! - Shared types and utilities

pub mod config;
pub mod registry;

// Re-export commonly used types
pub use config::loader::{load_config, load_config_from_path, load_config_from_str};
pub use config::model::{
    BalanceSettings, CircuitBreakerConfig, GatewayConfig, LoadBalanceStrategy, ServiceInfo,
};
pub use registry::ServiceRegistry;
