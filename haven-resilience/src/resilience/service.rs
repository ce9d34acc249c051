use crate::resilience::manager::{CircuitBreakerManager, ServiceHealthEntry};
use crate::resilience::metrics::ServiceMetricsRegistry;
use crate::resilience::strategy::{create_load_balancer_with_metrics, LoadBalancer};
use crate::resilience::traits::ServiceRouter;
use async_trait::async_trait;
use haven_core::config::model::{GatewayConfig, LoadBalanceStrategy, ServiceInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 请求类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestClass {
    pub therapeutic: bool,
    pub crisis: bool,
}

impl RequestClass {
    /// 普通流量
    pub fn standard() -> Self {
        Self {
            therapeutic: false,
            crisis: false,
        }
    }

    /// 治疗会话流量
    pub fn therapeutic() -> Self {
        Self {
            therapeutic: true,
            crisis: false,
        }
    }

    /// 危机干预流量，同时按治疗流量处理
    pub fn crisis() -> Self {
        Self {
            therapeutic: true,
            crisis: true,
        }
    }
}

/// 路由选择失败
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No available service to route request (strategy: {strategy:?})")]
    NoAvailableService { strategy: LoadBalanceStrategy },
}

/// 一次成功路由调用的结果
#[derive(Debug)]
pub struct RoutedCall<T> {
    pub service: ServiceInfo,
    pub elapsed: Duration,
    pub value: T,
}

/// 连接计数守卫，构造时占用一个连接，析构时归还
///
/// 路由调用的 Future 在 await 点被调用方丢弃时同样会归还计数。
struct ConnectionGuard<'a> {
    metrics: &'a ServiceMetricsRegistry,
    service_id: &'a str,
}

impl<'a> ConnectionGuard<'a> {
    fn new(metrics: &'a ServiceMetricsRegistry, service_id: &'a str) -> Self {
        metrics.increment_connections(service_id);
        Self {
            metrics,
            service_id,
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.metrics.decrement_connections(self.service_id);
    }
}

/// 弹性路由门面
///
/// 把负载均衡策略、断路器管理器和服务指标注册表组合成一个入口，
/// 三者共享配置并在请求全程协同记账。
pub struct ResilienceService {
    config: GatewayConfig,
    breakers: Arc<CircuitBreakerManager>,
    balancer: Box<dyn LoadBalancer>,
    metrics: Arc<ServiceMetricsRegistry>,
}

impl ResilienceService {
    /// 校验配置并组装各组件
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let metrics = Arc::new(ServiceMetricsRegistry::new());
        let balancer = create_load_balancer_with_metrics(config.balance.strategy, metrics.clone());
        let breakers = Arc::new(CircuitBreakerManager::new(&config.circuit_breaker));

        tracing::info!(
            "Resilience service initialized with {} services, strategy {:?}",
            config.services.len(),
            config.balance.strategy
        );

        Ok(Self {
            config,
            breakers,
            balancer,
            metrics,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.balancer.strategy()
    }

    pub fn metrics(&self) -> &Arc<ServiceMetricsRegistry> {
        &self.metrics
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    /// 为一次请求挑选目标服务
    ///
    /// 危机请求跳过断路器健康预筛，熔断中的服务交由旁通逻辑处理；
    /// 其余请求先剔除断路器判定不健康的服务，再交给均衡策略。
    pub async fn select_service(
        &self,
        services: &[ServiceInfo],
        request: RequestClass,
    ) -> Option<ServiceInfo> {
        if request.crisis {
            return self
                .balancer
                .select_service(services, request.therapeutic, request.crisis);
        }

        let healthy = self.breakers.get_healthy_services(services).await;
        self.balancer
            .select_service(&healthy, request.therapeutic, request.crisis)
    }

    /// 路由并执行一次调用
    ///
    /// 选中服务后增加其连接计数，经断路器执行操作，结束时无论成败
    /// 都减回连接数并上报指标。操作自身的错误原样向上传递。
    pub async fn route_call<T, F, Fut>(
        &self,
        services: &[ServiceInfo],
        request: RequestClass,
        operation: F,
    ) -> anyhow::Result<RoutedCall<T>>
    where
        F: FnOnce(ServiceInfo) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let service = match self.select_service(services, request).await {
            Some(service) => service,
            None => {
                tracing::warn!(
                    "No available service for request routing (strategy: {:?}, candidates: {})",
                    self.balancer.strategy(),
                    services.len()
                );
                return Err(SelectionError::NoAvailableService {
                    strategy: self.balancer.strategy(),
                }
                .into());
            }
        };

        let connection = ConnectionGuard::new(&self.metrics, &service.id);
        let started = Instant::now();
        let result = self
            .breakers
            .call_service(&service, request.therapeutic, request.crisis, || {
                operation(service.clone())
            })
            .await;
        let elapsed = started.elapsed();
        drop(connection);
        self.metrics.update(
            &service.id,
            elapsed.as_secs_f64(),
            result.is_ok(),
            request.therapeutic,
            request.crisis,
        );

        match result {
            Ok(value) => Ok(RoutedCall {
                service,
                elapsed,
                value,
            }),
            Err(e) => Err(e),
        }
    }

    /// 上报一次在门面之外完成的调用结果
    pub fn report_outcome(
        &self,
        service_id: &str,
        request: RequestClass,
        success: bool,
        elapsed: Duration,
    ) {
        self.metrics.update(
            service_id,
            elapsed.as_secs_f64(),
            success,
            request.therapeutic,
            request.crisis,
        );
    }

    /// 所有断路器的健康概要
    pub async fn health_summary(&self) -> HashMap<String, ServiceHealthEntry> {
        self.breakers.get_service_health_summary().await
    }

    /// 断路器视角下健康的服务
    pub async fn healthy_services(&self, services: &[ServiceInfo]) -> Vec<ServiceInfo> {
        self.breakers.get_healthy_services(services).await
    }
}

#[async_trait]
impl ServiceRouter for ResilienceService {
    async fn select(
        &self,
        services: &[ServiceInfo],
        request: RequestClass,
    ) -> Option<ServiceInfo> {
        self.select_service(services, request).await
    }

    async fn report(
        &self,
        service_id: &str,
        request: RequestClass,
        success: bool,
        elapsed: Duration,
    ) {
        self.report_outcome(service_id, request, success, elapsed);
    }

    async fn health_summary(&self) -> HashMap<String, ServiceHealthEntry> {
        self.breakers.get_service_health_summary().await
    }
}
