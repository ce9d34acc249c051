use haven_core::config::model::ServiceInfo;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// 健康评分低于该值的服务不参与选择
pub const MIN_HEALTH_SCORE: f64 = 0.3;

/// 平均响应时间的EMA平滑系数
const RESPONSE_TIME_SMOOTHING: f64 = 0.1;

/// 响应时间惩罚在该秒数处封顶
const RESPONSE_TIME_PENALTY_CAP: f64 = 5.0;

/// 单个服务的运行指标
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub service_id: String,
    pub active_connections: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// 指数移动平均响应时间（秒）
    pub average_response_time: f64,
    /// 综合健康评分，范围[0,1]，1.0为完全健康
    pub health_score: f64,
    pub therapeutic_load: u64,
    pub crisis_load: u64,
    pub last_updated: Option<Instant>,
}

impl ServiceMetrics {
    pub fn new(service_id: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            active_connections: 0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time: 0.0,
            health_score: 1.0,
            therapeutic_load: 0,
            crisis_load: 0,
            last_updated: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.successful_requests as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }

    /// 记录一次请求结果并重算派生指标
    ///
    /// 健康评分始终整体重算，不做增量漂移
    fn record(&mut self, response_time: f64, success: bool, therapeutic: bool, crisis: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }

        self.average_response_time = RESPONSE_TIME_SMOOTHING * response_time
            + (1.0 - RESPONSE_TIME_SMOOTHING) * self.average_response_time;

        let penalty = (response_time / RESPONSE_TIME_PENALTY_CAP).min(1.0) * 0.5;
        self.health_score = self.success_rate() * (1.0 - penalty);

        if therapeutic {
            self.therapeutic_load += 1;
        }
        if crisis {
            self.crisis_load += 1;
        }

        self.last_updated = Some(Instant::now());
    }
}

/// 服务指标注册表
///
/// 所有负载均衡策略共享同一个注册表实例，条目在首次写入时惰性创建，
/// 进程生命周期内保留，只能通过显式的reset接口清理。
pub struct ServiceMetricsRegistry {
    metrics: Arc<std::sync::RwLock<HashMap<String, ServiceMetrics>>>,
}

impl ServiceMetricsRegistry {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(std::sync::RwLock::new(HashMap::new())),
        }
    }

    /// 记录一次请求结果
    pub fn update(
        &self,
        service_id: &str,
        response_time: f64,
        success: bool,
        therapeutic: bool,
        crisis: bool,
    ) {
        if let Ok(mut metrics) = self.metrics.write() {
            let entry = metrics
                .entry(service_id.to_string())
                .or_insert_with(|| ServiceMetrics::new(service_id));
            entry.record(response_time, success, therapeutic, crisis);

            tracing::debug!(
                "Recorded request for service {}: success={}, response_time={:.3}s, health_score={:.3}",
                service_id,
                success,
                response_time,
                entry.health_score
            );
        }
    }

    /// 增加活跃连接计数
    pub fn increment_connections(&self, service_id: &str) {
        if let Ok(mut metrics) = self.metrics.write() {
            let entry = metrics
                .entry(service_id.to_string())
                .or_insert_with(|| ServiceMetrics::new(service_id));
            entry.active_connections += 1;
        }
    }

    /// 减少活跃连接计数，下限为0
    pub fn decrement_connections(&self, service_id: &str) {
        if let Ok(mut metrics) = self.metrics.write() {
            if let Some(entry) = metrics.get_mut(service_id) {
                entry.active_connections = entry.active_connections.saturating_sub(1);
            }
        }
    }

    /// 获取指定服务的指标快照
    pub fn get(&self, service_id: &str) -> Option<ServiceMetrics> {
        if let Ok(metrics) = self.metrics.read() {
            metrics.get(service_id).cloned()
        } else {
            None
        }
    }

    /// 获取所有服务的指标快照
    pub fn get_all(&self) -> HashMap<String, ServiceMetrics> {
        if let Ok(metrics) = self.metrics.read() {
            metrics.clone()
        } else {
            HashMap::new()
        }
    }

    pub fn active_connections(&self, service_id: &str) -> u32 {
        if let Ok(metrics) = self.metrics.read() {
            metrics
                .get(service_id)
                .map(|m| m.active_connections)
                .unwrap_or(0)
        } else {
            0
        }
    }

    pub fn crisis_load(&self, service_id: &str) -> u64 {
        if let Ok(metrics) = self.metrics.read() {
            metrics.get(service_id).map(|m| m.crisis_load).unwrap_or(0)
        } else {
            0
        }
    }

    /// 过滤出可参与选择的服务
    ///
    /// 条件：存活标记为true，且（尚无指标记录，或健康评分达标）
    pub fn filter_available(&self, services: &[ServiceInfo]) -> Vec<ServiceInfo> {
        if let Ok(metrics) = self.metrics.read() {
            services
                .iter()
                .filter(|s| {
                    s.healthy
                        && metrics
                            .get(&s.id)
                            .is_none_or(|m| m.health_score >= MIN_HEALTH_SCORE)
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        }
    }

    /// 清除指定服务的指标
    pub fn reset(&self, service_id: &str) -> bool {
        if let Ok(mut metrics) = self.metrics.write() {
            let removed = metrics.remove(service_id).is_some();
            if removed {
                tracing::info!("Reset metrics for service {}", service_id);
            }
            removed
        } else {
            false
        }
    }

    /// 清除所有服务的指标
    pub fn reset_all(&self) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.clear();
            tracing::info!("Reset all service metrics");
        }
    }
}

impl Default for ServiceMetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
