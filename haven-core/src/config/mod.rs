pub mod loader;
pub mod model;


pub use loader::{get_config_path, load_config, load_config_from_path, load_config_from_str};
pub use model::{
    BalanceSettings, CircuitBreakerConfig, GatewayConfig, LoadBalanceStrategy, ServiceInfo,
};
