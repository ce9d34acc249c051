use crate::resilience::breaker::{BreakerSettings, CircuitBreaker, CircuitState};
use haven_core::config::model::{CircuitBreakerConfig, ServiceInfo};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 单个服务的健康概要，可直接序列化供运维输出
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthEntry {
    pub service_name: String,
    pub state: CircuitState,
    pub is_healthy: bool,
    pub total_requests: u64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub seconds_since_last_failure: Option<f64>,
    pub seconds_since_last_success: Option<f64>,
}

/// 断路器管理器
///
/// 按服务id持有断路器，首次访问时惰性创建。同一服务在并发下
/// 也只会得到同一个断路器实例。
pub struct CircuitBreakerManager {
    settings: BreakerSettings,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl CircuitBreakerManager {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self::with_settings(BreakerSettings::from(config))
    }

    pub fn with_settings(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// 获取服务对应的断路器，不存在则创建
    pub async fn breaker_for(&self, service: &ServiceInfo) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(&service.id) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service.id.clone())
            .or_insert_with(|| {
                tracing::debug!("Created circuit breaker for service {}", service.id);
                Arc::new(CircuitBreaker::new(service, self.settings))
            })
            .clone()
    }

    /// 以断路器保护执行一次对指定服务的调用
    pub async fn call_service<T, F, Fut>(
        &self,
        service: &ServiceInfo,
        therapeutic_request: bool,
        crisis_mode: bool,
        operation: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let breaker = self.breaker_for(service).await;
        breaker
            .call(therapeutic_request, crisis_mode, operation)
            .await
    }

    /// 过滤出断路器视角下健康的服务
    ///
    /// 尚未建立断路器的服务视为健康
    pub async fn get_healthy_services(&self, services: &[ServiceInfo]) -> Vec<ServiceInfo> {
        let breakers = self.breakers.read().await;
        services
            .iter()
            .filter(|s| breakers.get(&s.id).map(|b| b.is_healthy()).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// 汇总所有断路器的健康概要
    pub async fn get_service_health_summary(&self) -> HashMap<String, ServiceHealthEntry> {
        let breakers = self.breakers.read().await;
        let mut summary = HashMap::new();

        for (service_id, breaker) in breakers.iter() {
            let metrics = breaker.metrics();
            summary.insert(
                service_id.clone(),
                ServiceHealthEntry {
                    service_name: breaker.service_name().to_string(),
                    state: breaker.state(),
                    is_healthy: breaker.is_healthy(),
                    total_requests: metrics.total_requests,
                    success_rate: metrics.success_rate(),
                    consecutive_failures: metrics.consecutive_failures,
                    consecutive_successes: metrics.consecutive_successes,
                    seconds_since_last_failure: metrics
                        .last_failure_at
                        .map(|at| at.elapsed().as_secs_f64()),
                    seconds_since_last_success: metrics
                        .last_success_at
                        .map(|at| at.elapsed().as_secs_f64()),
                },
            );
        }

        summary
    }

    /// 重置指定服务的断路器，服务不存在时返回false
    pub async fn reset_service(&self, service_id: &str) -> bool {
        let breakers = self.breakers.read().await;
        if let Some(breaker) = breakers.get(service_id) {
            breaker.reset();
            true
        } else {
            tracing::warn!("No circuit breaker found for service {}", service_id);
            false
        }
    }

    pub async fn breaker_count(&self) -> usize {
        self.breakers.read().await.len()
    }
}
