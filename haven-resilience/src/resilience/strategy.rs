use crate::resilience::metrics::ServiceMetricsRegistry;
use haven_core::config::model::{LoadBalanceStrategy, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 治疗流量对治疗优先服务的权重加成
const THERAPEUTIC_WEIGHT_BOOST: f64 = 1.5;

/// 危机流量对治疗优先服务的权重加成，与治疗加成叠乘
const CRISIS_WEIGHT_BOOST: f64 = 2.0;

/// 最少连接策略下治疗流量对治疗优先服务的连接数折扣
const THERAPEUTIC_CONNECTION_DISCOUNT: f64 = 0.7;

/// 最少连接策略下危机流量对治疗优先服务的连接数折扣
const CRISIS_CONNECTION_DISCOUNT: f64 = 0.5;

/// 负载均衡策略的统一接口
///
/// 所有策略共享同一个指标注册表，选择本身不产生指标，
/// 指标由调用方在请求完成后上报。
pub trait LoadBalancer: Send + Sync {
    fn strategy(&self) -> LoadBalanceStrategy;

    fn metrics(&self) -> &Arc<ServiceMetricsRegistry>;

    /// 从候选服务中选出一个目标
    fn select_service(
        &self,
        services: &[ServiceInfo],
        therapeutic_priority: bool,
        crisis_mode: bool,
    ) -> Option<ServiceInfo>;

    /// 上报一次请求结果
    fn update_metrics(
        &self,
        service_id: &str,
        response_time: f64,
        success: bool,
        therapeutic: bool,
        crisis: bool,
    ) {
        self.metrics()
            .update(service_id, response_time, success, therapeutic, crisis);
    }

    fn increment_connections(&self, service_id: &str) {
        self.metrics().increment_connections(service_id);
    }

    fn decrement_connections(&self, service_id: &str) {
        self.metrics().decrement_connections(service_id);
    }
}

/// 服务在当前请求类别下的有效权重
fn effective_weight(service: &ServiceInfo, therapeutic_priority: bool, crisis_mode: bool) -> f64 {
    let mut weight = service.weight as f64;
    if therapeutic_priority && service.therapeutic_priority {
        weight *= THERAPEUTIC_WEIGHT_BOOST;
    }
    if crisis_mode && service.therapeutic_priority {
        weight *= CRISIS_WEIGHT_BOOST;
    }
    weight
}

/// 轮询策略，按列表顺序依次分发，不区分请求类别
pub struct RoundRobinBalancer {
    metrics: Arc<ServiceMetricsRegistry>,
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new(metrics: Arc<ServiceMetricsRegistry>) -> Self {
        Self {
            metrics,
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn strategy(&self) -> LoadBalanceStrategy {
        LoadBalanceStrategy::RoundRobin
    }

    fn metrics(&self) -> &Arc<ServiceMetricsRegistry> {
        &self.metrics
    }

    fn select_service(
        &self,
        services: &[ServiceInfo],
        _therapeutic_priority: bool,
        _crisis_mode: bool,
    ) -> Option<ServiceInfo> {
        let available = self.metrics.filter_available(services);
        if available.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % available.len();
        Some(available[index].clone())
    }
}

/// 平滑加权轮询策略
///
/// 每个服务维护一个当前计数：每轮选中计数最高者，选中者减去本轮
/// 总有效权重，随后所有候选各加回自身有效权重。权重相同时分发
/// 均匀交错而不是连续命中同一服务。
pub struct WeightedRoundRobinBalancer {
    metrics: Arc<ServiceMetricsRegistry>,
    current_weights: Mutex<HashMap<String, f64>>,
}

impl WeightedRoundRobinBalancer {
    pub fn new(metrics: Arc<ServiceMetricsRegistry>) -> Self {
        Self {
            metrics,
            current_weights: Mutex::new(HashMap::new()),
        }
    }
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn strategy(&self) -> LoadBalanceStrategy {
        LoadBalanceStrategy::WeightedRoundRobin
    }

    fn metrics(&self) -> &Arc<ServiceMetricsRegistry> {
        &self.metrics
    }

    fn select_service(
        &self,
        services: &[ServiceInfo],
        therapeutic_priority: bool,
        crisis_mode: bool,
    ) -> Option<ServiceInfo> {
        let available = self.metrics.filter_available(services);
        if available.is_empty() {
            return None;
        }

        let mut current = self.current_weights.lock();

        let mut total_weight = 0.0;
        let mut weights = Vec::with_capacity(available.len());
        for service in &available {
            let weight = effective_weight(service, therapeutic_priority, crisis_mode);
            total_weight += weight;
            weights.push(weight);
        }

        // 计数并列时取列表中靠前的服务
        let mut best_index = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (index, service) in available.iter().enumerate() {
            let value = current.get(&service.id).copied().unwrap_or(0.0);
            if value > best_value {
                best_value = value;
                best_index = index;
            }
        }

        let selected = available[best_index].clone();
        *current.entry(selected.id.clone()).or_insert(0.0) -= total_weight;
        for (index, service) in available.iter().enumerate() {
            *current.entry(service.id.clone()).or_insert(0.0) += weights[index];
        }

        Some(selected)
    }
}

/// 最少连接策略
///
/// 治疗优先服务在治疗或危机流量下按折扣连接数参与比较
pub struct LeastConnectionsBalancer {
    metrics: Arc<ServiceMetricsRegistry>,
}

impl LeastConnectionsBalancer {
    pub fn new(metrics: Arc<ServiceMetricsRegistry>) -> Self {
        Self { metrics }
    }
}

impl LoadBalancer for LeastConnectionsBalancer {
    fn strategy(&self) -> LoadBalanceStrategy {
        LoadBalanceStrategy::LeastConnections
    }

    fn metrics(&self) -> &Arc<ServiceMetricsRegistry> {
        &self.metrics
    }

    fn select_service(
        &self,
        services: &[ServiceInfo],
        therapeutic_priority: bool,
        crisis_mode: bool,
    ) -> Option<ServiceInfo> {
        let available = self.metrics.filter_available(services);
        if available.is_empty() {
            return None;
        }

        let mut selected: Option<ServiceInfo> = None;
        let mut lowest = f64::INFINITY;
        for service in available {
            let mut load = self.metrics.active_connections(&service.id) as f64;
            if therapeutic_priority && service.therapeutic_priority {
                load *= THERAPEUTIC_CONNECTION_DISCOUNT;
            }
            if crisis_mode && service.therapeutic_priority {
                load *= CRISIS_CONNECTION_DISCOUNT;
            }

            // 严格小于，负载并列时保留先遍历到的服务
            if load < lowest {
                lowest = load;
                selected = Some(service);
            }
        }

        selected
    }
}

/// 健康度加权随机策略
///
/// 综合健康评分、平均响应时间和活跃连接数计算每个服务的得分，
/// 再按得分加权随机选择。
pub struct HealthBasedBalancer {
    metrics: Arc<ServiceMetricsRegistry>,
}

impl HealthBasedBalancer {
    pub fn new(metrics: Arc<ServiceMetricsRegistry>) -> Self {
        Self { metrics }
    }

    fn score(&self, service: &ServiceInfo, therapeutic_priority: bool, crisis_mode: bool) -> f64 {
        let mut score = match self.metrics.get(&service.id) {
            Some(m) => {
                let response_factor = 1.0 / (1.0 + m.average_response_time);
                let connection_factor = (1.0 - 0.1 * m.active_connections as f64).max(0.1);
                m.health_score * response_factor * connection_factor
            }
            // 没有指标的新服务按满分参与
            None => 1.0,
        };

        if therapeutic_priority && service.therapeutic_priority {
            score *= THERAPEUTIC_WEIGHT_BOOST;
        }
        if crisis_mode && service.therapeutic_priority {
            score *= CRISIS_WEIGHT_BOOST;
        }
        score
    }
}

impl LoadBalancer for HealthBasedBalancer {
    fn strategy(&self) -> LoadBalanceStrategy {
        LoadBalanceStrategy::HealthBased
    }

    fn metrics(&self) -> &Arc<ServiceMetricsRegistry> {
        &self.metrics
    }

    fn select_service(
        &self,
        services: &[ServiceInfo],
        therapeutic_priority: bool,
        crisis_mode: bool,
    ) -> Option<ServiceInfo> {
        let available = self.metrics.filter_available(services);
        if available.is_empty() {
            return None;
        }

        let scores: Vec<f64> = available
            .iter()
            .map(|s| self.score(s, therapeutic_priority, crisis_mode))
            .collect();
        let total: f64 = scores.iter().sum();
        if total <= 0.0 {
            return available.first().cloned();
        }

        let mut random_value = rand::random::<f64>() * total;
        for (index, service) in available.iter().enumerate() {
            random_value -= scores[index];
            if random_value <= 0.0 {
                return Some(service.clone());
            }
        }

        // 浮点累减的兜底
        available.first().cloned()
    }
}

/// 治疗优先策略
///
/// 危机流量只落在治疗优先服务上并按危机负载均摊；治疗流量在
/// 治疗优先子集内按健康度选择；普通流量在全部候选内按健康度选择。
pub struct TherapeuticPriorityBalancer {
    metrics: Arc<ServiceMetricsRegistry>,
    inner: HealthBasedBalancer,
}

impl TherapeuticPriorityBalancer {
    pub fn new(metrics: Arc<ServiceMetricsRegistry>) -> Self {
        Self {
            inner: HealthBasedBalancer::new(metrics.clone()),
            metrics,
        }
    }
}

impl LoadBalancer for TherapeuticPriorityBalancer {
    fn strategy(&self) -> LoadBalanceStrategy {
        LoadBalanceStrategy::TherapeuticPriority
    }

    fn metrics(&self) -> &Arc<ServiceMetricsRegistry> {
        &self.metrics
    }

    fn select_service(
        &self,
        services: &[ServiceInfo],
        therapeutic_priority: bool,
        crisis_mode: bool,
    ) -> Option<ServiceInfo> {
        let available = self.metrics.filter_available(services);
        if available.is_empty() {
            return None;
        }

        let therapeutic: Vec<ServiceInfo> = available
            .iter()
            .filter(|s| s.therapeutic_priority)
            .cloned()
            .collect();

        if crisis_mode && !therapeutic.is_empty() {
            // 危机请求摊到危机负载最低的治疗优先服务
            let mut selected: Option<ServiceInfo> = None;
            let mut lowest = u64::MAX;
            for service in therapeutic {
                let load = self.metrics.crisis_load(&service.id);
                if selected.is_none() || load < lowest {
                    lowest = load;
                    selected = Some(service);
                }
            }
            if let Some(service) = &selected {
                tracing::debug!(
                    "Crisis request routed to therapeutic service {} (crisis_load: {})",
                    service.id,
                    lowest
                );
            }
            return selected;
        }

        if therapeutic_priority && !therapeutic.is_empty() {
            return self
                .inner
                .select_service(&therapeutic, therapeutic_priority, crisis_mode);
        }

        self.inner
            .select_service(&available, therapeutic_priority, crisis_mode)
    }
}

/// 创建指定策略的负载均衡器，使用独立的指标注册表
pub fn create_load_balancer(strategy: LoadBalanceStrategy) -> Box<dyn LoadBalancer> {
    create_load_balancer_with_metrics(strategy, Arc::new(ServiceMetricsRegistry::new()))
}

/// 创建指定策略的负载均衡器，复用给定的指标注册表
pub fn create_load_balancer_with_metrics(
    strategy: LoadBalanceStrategy,
    metrics: Arc<ServiceMetricsRegistry>,
) -> Box<dyn LoadBalancer> {
    match strategy {
        LoadBalanceStrategy::RoundRobin => Box::new(RoundRobinBalancer::new(metrics)),
        LoadBalanceStrategy::WeightedRoundRobin => {
            Box::new(WeightedRoundRobinBalancer::new(metrics))
        }
        LoadBalanceStrategy::LeastConnections => Box::new(LeastConnectionsBalancer::new(metrics)),
        LoadBalanceStrategy::HealthBased => Box::new(HealthBasedBalancer::new(metrics)),
        LoadBalanceStrategy::TherapeuticPriority => {
            Box::new(TherapeuticPriorityBalancer::new(metrics))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service(id: &str, weight: u32, therapeutic_priority: bool) -> ServiceInfo {
        ServiceInfo {
            id: id.to_string(),
            name: format!("Service {id}"),
            weight,
            healthy: true,
            therapeutic_priority,
        }
    }

    fn create_test_services() -> Vec<ServiceInfo> {
        vec![
            create_test_service("s1", 1, false),
            create_test_service("s2", 1, false),
            create_test_service("s3", 1, false),
        ]
    }

    fn select_ids(
        balancer: &dyn LoadBalancer,
        services: &[ServiceInfo],
        therapeutic: bool,
        crisis: bool,
        count: usize,
    ) -> Vec<String> {
        (0..count)
            .map(|_| {
                balancer
                    .select_service(services, therapeutic, crisis)
                    .unwrap()
                    .id
            })
            .collect()
    }

    fn count_selections(ids: &[String]) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for id in ids {
            *counts.entry(id.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let balancer = RoundRobinBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = create_test_services();

        let ids = select_ids(&balancer, &services, false, false, 6);
        assert_eq!(ids, vec!["s1", "s2", "s3", "s1", "s2", "s3"]);
    }

    #[test]
    fn test_round_robin_skips_unhealthy() {
        let balancer = RoundRobinBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let mut services = create_test_services();
        services[1].healthy = false;

        let ids = select_ids(&balancer, &services, false, false, 4);
        assert_eq!(ids, vec!["s1", "s3", "s1", "s3"]);
    }

    #[test]
    fn test_round_robin_empty_returns_none() {
        let balancer = RoundRobinBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        assert!(balancer.select_service(&[], false, false).is_none());

        let mut services = create_test_services();
        for service in &mut services {
            service.healthy = false;
        }
        assert!(balancer.select_service(&services, false, false).is_none());
    }

    #[test]
    fn test_weighted_round_robin_distribution() {
        let balancer = WeightedRoundRobinBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = vec![
            create_test_service("light", 1, false),
            create_test_service("heavy", 3, false),
        ];

        // 权重1:3，10次选择精确命中3:7且交错分布
        let ids = select_ids(&balancer, &services, false, false, 10);
        assert_eq!(
            ids,
            vec![
                "light", "heavy", "heavy", "heavy", "light", "heavy", "heavy", "heavy", "light",
                "heavy"
            ]
        );
    }

    #[test]
    fn test_weighted_round_robin_crisis_boost() {
        let balancer = WeightedRoundRobinBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = vec![
            create_test_service("std", 2, false),
            create_test_service("thr", 1, true),
        ];

        // 危机流量下thr有效权重1*1.5*2.0=3，反超std的2
        let ids = select_ids(&balancer, &services, true, true, 10);
        let counts = count_selections(&ids);
        assert_eq!(counts.get("std"), Some(&4));
        assert_eq!(counts.get("thr"), Some(&6));
    }

    #[test]
    fn test_weighted_round_robin_equal_weights_interleave() {
        let balancer = WeightedRoundRobinBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = create_test_services();

        let ids = select_ids(&balancer, &services, false, false, 6);
        assert_eq!(ids, vec!["s1", "s2", "s3", "s1", "s2", "s3"]);
    }

    #[test]
    fn test_least_connections_picks_lowest() {
        let registry = Arc::new(ServiceMetricsRegistry::new());
        let balancer = LeastConnectionsBalancer::new(registry.clone());
        let services = create_test_services();

        for _ in 0..2 {
            registry.increment_connections("s1");
        }
        for _ in 0..5 {
            registry.increment_connections("s3");
        }

        let selected = balancer.select_service(&services, false, false).unwrap();
        assert_eq!(selected.id, "s2");
    }

    #[test]
    fn test_least_connections_ties_go_to_first() {
        let balancer = LeastConnectionsBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = create_test_services();

        let selected = balancer.select_service(&services, false, false).unwrap();
        assert_eq!(selected.id, "s1");
    }

    #[test]
    fn test_least_connections_therapeutic_scaling() {
        let registry = Arc::new(ServiceMetricsRegistry::new());
        let balancer = LeastConnectionsBalancer::new(registry.clone());
        let services = vec![
            create_test_service("std", 1, false),
            create_test_service("thr", 1, true),
        ];

        for _ in 0..2 {
            registry.increment_connections("std");
        }
        for _ in 0..4 {
            registry.increment_connections("thr");
        }

        // 治疗流量：thr折算4*0.7=2.8，仍高于std的2
        let selected = balancer.select_service(&services, true, false).unwrap();
        assert_eq!(selected.id, "std");

        // 危机流量：thr折算4*0.7*0.5=1.4，低于std的2
        let selected = balancer.select_service(&services, true, true).unwrap();
        assert_eq!(selected.id, "thr");
    }

    #[test]
    fn test_health_based_prefers_higher_scores() {
        let registry = Arc::new(ServiceMetricsRegistry::new());
        let balancer = HealthBasedBalancer::new(registry.clone());
        let services = vec![
            create_test_service("degraded", 1, false),
            create_test_service("strong", 1, false),
        ];

        // degraded评分压到阈值附近但仍可用
        registry.update("degraded", 3.0, true, false, false);
        registry.update("degraded", 3.0, false, false, false);
        registry.update("strong", 0.1, true, false, false);

        let ids = select_ids(&balancer, &services, false, false, 1000);
        let counts = count_selections(&ids);
        let degraded = counts.get("degraded").copied().unwrap_or(0);
        let strong = counts.get("strong").copied().unwrap_or(0);

        assert!(strong > degraded);
        assert!(degraded > 0);
    }

    #[test]
    fn test_health_based_crisis_boost_without_metrics() {
        let balancer = HealthBasedBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = vec![
            create_test_service("std", 1, false),
            create_test_service("thr", 1, true),
        ];

        // 无指标时基础分都是1.0，危机加成使thr得3.0
        let ids = select_ids(&balancer, &services, true, true, 1000);
        let counts = count_selections(&ids);
        let std_count = counts.get("std").copied().unwrap_or(0);
        let thr_count = counts.get("thr").copied().unwrap_or(0);

        assert!(thr_count > std_count);
        assert!(std_count > 0);
    }

    #[test]
    fn test_health_based_fresh_services_all_selectable() {
        let balancer = HealthBasedBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = vec![
            create_test_service("a", 1, false),
            create_test_service("b", 1, false),
        ];

        let ids = select_ids(&balancer, &services, false, false, 200);
        let counts = count_selections(&ids);
        assert!(counts.get("a").copied().unwrap_or(0) > 0);
        assert!(counts.get("b").copied().unwrap_or(0) > 0);
    }

    #[test]
    fn test_therapeutic_priority_crisis_spreads_by_crisis_load() {
        let registry = Arc::new(ServiceMetricsRegistry::new());
        let balancer = TherapeuticPriorityBalancer::new(registry.clone());
        let services = vec![
            create_test_service("std", 1, false),
            create_test_service("thr-1", 1, true),
            create_test_service("thr-2", 1, true),
        ];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            let selected = balancer.select_service(&services, true, true).unwrap();
            assert_ne!(selected.id, "std");
            registry.update(&selected.id, 0.1, true, true, true);
            *counts.entry(selected.id).or_insert(0) += 1;
        }

        // 危机负载记账使两台治疗优先服务轮流接收
        assert_eq!(counts.get("thr-1"), Some(&5));
        assert_eq!(counts.get("thr-2"), Some(&5));
    }

    #[test]
    fn test_therapeutic_priority_crisis_without_therapeutic_services() {
        let balancer = TherapeuticPriorityBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = create_test_services();

        // 没有治疗优先服务时危机流量退回全量健康度选择
        let selected = balancer.select_service(&services, true, true);
        assert!(selected.is_some());
    }

    #[test]
    fn test_therapeutic_priority_keeps_therapeutic_subset() {
        let registry = Arc::new(ServiceMetricsRegistry::new());
        let balancer = TherapeuticPriorityBalancer::new(registry.clone());
        let services = vec![
            create_test_service("std", 1, false),
            create_test_service("thr", 1, true),
        ];

        // std指标更好，但治疗请求仍只在治疗优先子集内选择
        registry.update("std", 0.1, true, false, false);
        registry.update("thr", 3.0, true, false, false);

        let ids = select_ids(&balancer, &services, true, false, 100);
        assert!(ids.iter().all(|id| id == "thr"));
    }

    #[test]
    fn test_therapeutic_priority_normal_traffic_uses_all() {
        let balancer = TherapeuticPriorityBalancer::new(Arc::new(ServiceMetricsRegistry::new()));
        let services = vec![
            create_test_service("std", 1, false),
            create_test_service("thr", 1, true),
        ];

        let ids = select_ids(&balancer, &services, false, false, 500);
        let counts = count_selections(&ids);
        assert!(counts.get("std").copied().unwrap_or(0) > 0);
        assert!(counts.get("thr").copied().unwrap_or(0) > 0);
    }

    #[test]
    fn test_factory_creates_each_strategy() {
        let strategies = [
            LoadBalanceStrategy::RoundRobin,
            LoadBalanceStrategy::WeightedRoundRobin,
            LoadBalanceStrategy::LeastConnections,
            LoadBalanceStrategy::HealthBased,
            LoadBalanceStrategy::TherapeuticPriority,
        ];

        for strategy in strategies {
            let balancer = create_load_balancer(strategy);
            assert_eq!(balancer.strategy(), strategy);
        }
    }

    #[test]
    fn test_factory_shares_registry() {
        let registry = Arc::new(ServiceMetricsRegistry::new());
        let balancer = create_load_balancer_with_metrics(
            LoadBalanceStrategy::LeastConnections,
            registry.clone(),
        );

        balancer.update_metrics("s1", 0.5, true, false, false);
        balancer.increment_connections("s1");

        let snapshot = registry.get("s1").unwrap();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.active_connections, 1);

        balancer.decrement_connections("s1");
        assert_eq!(registry.active_connections("s1"), 0);
    }
}
