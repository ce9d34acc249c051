use crate::config::model::{GatewayConfig, ServiceInfo};
use std::sync::Arc;

/// 服务注册表
///
/// 保存网关当前已知的后端服务实例。条目按声明顺序保存，
/// 外部的服务发现/健康探测组件通过 `upsert`/`set_healthy` 推送变更。
pub struct ServiceRegistry {
    services: Arc<std::sync::RwLock<Vec<ServiceInfo>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    /// 从配置中声明的服务列表创建注册表
    pub fn from_config(config: &GatewayConfig) -> Self {
        let registry = Self::new();
        if let Ok(mut services) = registry.services.write() {
            services.extend(config.services.iter().cloned());
        }
        tracing::info!("Service registry initialized with {} services", registry.len());
        registry
    }

    /// 获取当前所有服务的快照（保持声明顺序）
    pub fn snapshot(&self) -> Vec<ServiceInfo> {
        if let Ok(services) = self.services.read() {
            services.clone()
        } else {
            Vec::new()
        }
    }

    /// 按id查找服务
    pub fn get(&self, service_id: &str) -> Option<ServiceInfo> {
        if let Ok(services) = self.services.read() {
            services.iter().find(|s| s.id == service_id).cloned()
        } else {
            None
        }
    }

    /// 新增或替换一个服务条目
    pub fn upsert(&self, service: ServiceInfo) {
        if let Ok(mut services) = self.services.write() {
            match services.iter_mut().find(|s| s.id == service.id) {
                Some(existing) => {
                    tracing::debug!("Updating registry entry for service {}", service.id);
                    *existing = service;
                }
                None => {
                    tracing::debug!("Registering new service {}", service.id);
                    services.push(service);
                }
            }
        }
    }

    /// 移除一个服务条目
    pub fn remove(&self, service_id: &str) -> bool {
        if let Ok(mut services) = self.services.write() {
            let before = services.len();
            services.retain(|s| s.id != service_id);
            let removed = services.len() < before;
            if removed {
                tracing::info!("Removed service {} from registry", service_id);
            }
            removed
        } else {
            false
        }
    }

    /// 更新服务的存活标记，由外部健康探测调用
    pub fn set_healthy(&self, service_id: &str, healthy: bool) -> bool {
        if let Ok(mut services) = self.services.write() {
            if let Some(service) = services.iter_mut().find(|s| s.id == service_id) {
                if service.healthy != healthy {
                    if healthy {
                        tracing::info!("Marked service {} as healthy", service_id);
                    } else {
                        tracing::warn!("Marked service {} as unhealthy", service_id);
                    }
                }
                service.healthy = healthy;
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        if let Ok(services) = self.services.read() {
            services.len()
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service(id: &str, healthy: bool) -> ServiceInfo {
        ServiceInfo {
            id: id.to_string(),
            name: format!("Service {id}"),
            weight: 1,
            healthy,
            therapeutic_priority: false,
        }
    }

    #[test]
    fn test_snapshot_preserves_declaration_order() {
        let registry = ServiceRegistry::new();
        registry.upsert(create_test_service("svc-a", true));
        registry.upsert(create_test_service("svc-b", true));
        registry.upsert(create_test_service("svc-c", true));

        let ids: Vec<String> = registry.snapshot().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["svc-a", "svc-b", "svc-c"]);
    }

    #[test]
    fn test_upsert_replaces_existing_entry() {
        let registry = ServiceRegistry::new();
        registry.upsert(create_test_service("svc-a", true));

        let mut updated = create_test_service("svc-a", true);
        updated.weight = 5;
        registry.upsert(updated);

        assert_eq!(registry.len(), 1);
        let service = registry.get("svc-a").unwrap();
        assert_eq!(service.weight, 5);
    }

    #[test]
    fn test_set_healthy_flips_flag() {
        let registry = ServiceRegistry::new();
        registry.upsert(create_test_service("svc-a", true));

        assert!(registry.set_healthy("svc-a", false));
        assert!(!registry.get("svc-a").unwrap().healthy);

        assert!(registry.set_healthy("svc-a", true));
        assert!(registry.get("svc-a").unwrap().healthy);
    }

    #[test]
    fn test_set_healthy_unknown_service() {
        let registry = ServiceRegistry::new();
        assert!(!registry.set_healthy("ghost", false));
    }

    #[test]
    fn test_remove_service() {
        let registry = ServiceRegistry::new();
        registry.upsert(create_test_service("svc-a", true));
        registry.upsert(create_test_service("svc-b", true));

        assert!(registry.remove("svc-a"));
        assert!(!registry.remove("svc-a"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("svc-a").is_none());
    }
}
