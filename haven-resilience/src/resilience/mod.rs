pub mod breaker;
pub mod manager;
pub mod metrics;
pub mod service;
pub mod strategy;
pub mod traits;


pub use breaker::{
    BreakerSettings, CallPermit, CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitState,
};
pub use manager::{CircuitBreakerManager, ServiceHealthEntry};
pub use metrics::{ServiceMetrics, ServiceMetricsRegistry};
pub use service::{RequestClass, ResilienceService, RoutedCall, SelectionError};
pub use strategy::{
    create_load_balancer, create_load_balancer_with_metrics, HealthBasedBalancer,
    LeastConnectionsBalancer, LoadBalancer, RoundRobinBalancer, TherapeuticPriorityBalancer,
    WeightedRoundRobinBalancer,
};
pub use traits::ServiceRouter;
