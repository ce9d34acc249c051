use crate::resilience::manager::ServiceHealthEntry;
use crate::resilience::service::RequestClass;
use async_trait::async_trait;
use haven_core::config::model::ServiceInfo;
use std::collections::HashMap;
use std::time::Duration;

/// 请求路由能力的统一接口
///
/// 上层以trait对象持有路由器，便于在测试中替换实现。
/// 默认实现是ResilienceService。
#[async_trait]
pub trait ServiceRouter: Send + Sync {
    /// 为一次请求选择目标服务
    async fn select(&self, services: &[ServiceInfo], request: RequestClass)
        -> Option<ServiceInfo>;

    /// 上报一次在路由层之外完成的调用结果
    async fn report(
        &self,
        service_id: &str,
        request: RequestClass,
        success: bool,
        elapsed: Duration,
    );

    /// 当前所有断路器的健康概要
    async fn health_summary(&self) -> HashMap<String, ServiceHealthEntry>;
}
