use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    #[serde(default)]
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub balance: BalanceSettings,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// 后端服务实例描述
///
/// `healthy` 由外部健康探测维护，核心只读取它
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default)]
    pub therapeutic_priority: bool,
}

/// 负载均衡配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BalanceSettings {
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
}

impl Default for BalanceSettings {
    fn default() -> Self {
        Self {
            strategy: LoadBalanceStrategy::default(),
        }
    }
}

/// 负载均衡策略
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// 轮询
    RoundRobin,
    /// 平滑加权轮询
    WeightedRoundRobin,
    /// 最少连接数（带治疗/危机缩放）
    LeastConnections,
    /// 治疗流量优先
    TherapeuticPriority,
    /// 基于健康评分的加权随机（默认，未知值也回退到这里）
    ///
    /// `#[serde(other)]` 要求该变体位于枚举末尾。
    #[default]
    #[serde(other)]
    HealthBased,
}

/// 熔断器配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后熔断
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// 熔断后多久允许探测恢复
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
    /// 半开状态下连续成功多少次后闭合
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// 单次调用超时（由调用方强制执行）
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    /// 治疗服务的更严格失败阈值
    #[serde(default = "default_therapeutic_failure_threshold")]
    pub therapeutic_failure_threshold: u32,
    /// 治疗服务的更快恢复时间
    #[serde(default = "default_therapeutic_recovery_timeout")]
    pub therapeutic_recovery_timeout_seconds: u64,
    /// 危机请求是否可以穿透熔断
    #[serde(default = "default_true")]
    pub crisis_bypass: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
            call_timeout_seconds: default_call_timeout(),
            therapeutic_failure_threshold: default_therapeutic_failure_threshold(),
            therapeutic_recovery_timeout_seconds: default_therapeutic_recovery_timeout(),
            crisis_bypass: true,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }

    pub fn therapeutic_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.therapeutic_recovery_timeout_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    3
}

fn default_call_timeout() -> u64 {
    30
}

fn default_therapeutic_failure_threshold() -> u32 {
    3
}

fn default_therapeutic_recovery_timeout() -> u64 {
    30
}

impl GatewayConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        // 验证services
        let mut seen_ids = HashSet::new();
        for service in &self.services {
            self.validate_service_config(service)?;

            if !seen_ids.insert(service.id.as_str()) {
                anyhow::bail!("Duplicate service id '{}' in services list", service.id);
            }
        }

        // 验证熔断器配置
        self.validate_circuit_breaker_config()?;

        Ok(())
    }

    /// 验证单个服务条目的有效性
    fn validate_service_config(&self, service: &ServiceInfo) -> Result<()> {
        if service.id.is_empty() {
            anyhow::bail!("Service has empty id");
        }

        if service.name.is_empty() {
            anyhow::bail!("Service '{}' has empty name", service.id);
        }

        if service.id.contains(' ') || service.id.contains('\t') || service.id.contains('\n') {
            anyhow::bail!(
                "Service has invalid id format: '{}' (cannot contain whitespace)",
                service.id
            );
        }

        if service.weight == 0 {
            anyhow::bail!(
                "Service '{}' has invalid weight: 0 (must be positive)",
                service.id
            );
        }

        if service.weight > 100 {
            anyhow::bail!(
                "Service '{}' has weight too large: {} (maximum 100)",
                service.id,
                service.weight
            );
        }

        Ok(())
    }

    /// 验证熔断器参数的有效性
    fn validate_circuit_breaker_config(&self) -> Result<()> {
        let cb = &self.circuit_breaker;

        if cb.failure_threshold == 0 {
            anyhow::bail!("Circuit breaker has invalid failure_threshold: cannot be 0");
        }

        if cb.success_threshold == 0 {
            anyhow::bail!("Circuit breaker has invalid success_threshold: cannot be 0");
        }

        if cb.therapeutic_failure_threshold == 0 {
            anyhow::bail!(
                "Circuit breaker has invalid therapeutic_failure_threshold: cannot be 0"
            );
        }

        if cb.recovery_timeout_seconds == 0 {
            anyhow::bail!("Circuit breaker has invalid recovery_timeout_seconds: cannot be 0");
        }

        if cb.therapeutic_recovery_timeout_seconds == 0 {
            anyhow::bail!(
                "Circuit breaker has invalid therapeutic_recovery_timeout_seconds: cannot be 0"
            );
        }

        if cb.call_timeout_seconds == 0 {
            anyhow::bail!("Circuit breaker has invalid call_timeout_seconds: cannot be 0");
        }

        if cb.call_timeout_seconds > 300 {
            anyhow::bail!(
                "Circuit breaker has call_timeout_seconds too large: {} (maximum 300 seconds)",
                cb.call_timeout_seconds
            );
        }

        Ok(())
    }

    /// 获取指定服务的配置
    pub fn get_service(&self, service_id: &str) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.id == service_id)
    }

    /// 获取所有标记为治疗优先的服务
    pub fn therapeutic_services(&self) -> Vec<&ServiceInfo> {
        self.services
            .iter()
            .filter(|s| s.therapeutic_priority)
            .collect()
    }
}
