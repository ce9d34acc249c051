//! Haven Resilience Library
//!
//! This library provides the resilience core for the Haven gateway including:
//! - Per-service circuit breaking with crisis bypass
//! - Pluggable load balancing strategies
//! - Service metrics collection
//! - Routed call orchestration

pub mod resilience;

// Re-export commonly used types
pub use resilience::{
    create_load_balancer, create_load_balancer_with_metrics, BreakerSettings, CallPermit,
    CircuitBreaker, CircuitBreakerError, CircuitBreakerManager, CircuitBreakerMetrics,
    CircuitState, HealthBasedBalancer, LeastConnectionsBalancer, LoadBalancer, RequestClass,
    ResilienceService, RoundRobinBalancer, RoutedCall, SelectionError, ServiceHealthEntry,
    ServiceMetrics, ServiceMetricsRegistry, ServiceRouter, TherapeuticPriorityBalancer,
    WeightedRoundRobinBalancer,
};
