use haven_core::config::model::{CircuitBreakerConfig, ServiceInfo};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 半开状态下判定健康所需的最低成功率
const HALF_OPEN_SUCCESS_RATIO: f64 = 0.7;

/// 断路器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// 正常放行
    Closed,
    /// 熔断，拒绝请求
    Open,
    /// 恢复探测中
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// 断路器拒绝请求时返回的错误
#[derive(Debug, Error)]
#[error("Circuit breaker rejected request to service '{service_name}' (state: {state})")]
pub struct CircuitBreakerError {
    pub service_name: String,
    pub state: CircuitState,
}

/// 断路器累计指标
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_failure_at: Option<Instant>,
    pub last_success_at: Option<Instant>,
    pub state_changed_at: Instant,
}

impl CircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            state_changed_at: Instant::now(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.successful_requests as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 断路器运行参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    pub therapeutic_failure_threshold: u32,
    pub therapeutic_recovery_timeout: Duration,
    pub crisis_bypass: bool,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
            therapeutic_failure_threshold: 3,
            therapeutic_recovery_timeout: Duration::from_secs(30),
            crisis_bypass: true,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout(),
            success_threshold: config.success_threshold,
            therapeutic_failure_threshold: config.therapeutic_failure_threshold,
            therapeutic_recovery_timeout: config.therapeutic_recovery_timeout(),
            crisis_bypass: config.crisis_bypass,
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    metrics: CircuitBreakerMetrics,
}

/// 单个服务的断路器
///
/// 状态机：Closed -> Open -> HalfOpen -> Closed。
/// 状态与指标共用一把锁，锁内只做内存更新，不执行任何IO。
pub struct CircuitBreaker {
    service_id: String,
    service_name: String,
    therapeutic_service: bool,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service: &ServiceInfo, mut settings: BreakerSettings) -> Self {
        // 治疗优先服务整体采用治疗专用的阈值和恢复窗口
        if service.therapeutic_priority {
            settings.failure_threshold = settings.therapeutic_failure_threshold;
            settings.recovery_timeout = settings.therapeutic_recovery_timeout;
        }

        Self {
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            therapeutic_service: service.therapeutic_priority,
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                metrics: CircuitBreakerMetrics::new(),
            }),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    /// 申请一次调用许可
    ///
    /// 被拒绝的请求不计入total_requests。Open状态下恢复窗口从最近一次
    /// 失败与最近一次状态变更中较晚者起算；危机请求在开启旁通时即使
    /// 熔断也放行，且不改变状态。
    pub fn try_acquire(
        &self,
        therapeutic_request: bool,
        crisis_mode: bool,
    ) -> Result<CallPermit<'_>, CircuitBreakerError> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let reference = match inner.metrics.last_failure_at {
                Some(at) => at.max(inner.metrics.state_changed_at),
                None => inner.metrics.state_changed_at,
            };

            if reference.elapsed() >= self.settings.recovery_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.metrics.state_changed_at = Instant::now();
                inner.metrics.consecutive_successes = 0;
                tracing::info!(
                    "Circuit breaker for service {} transitioning to half-open",
                    self.service_name
                );
            } else if crisis_mode && self.settings.crisis_bypass {
                tracing::warn!(
                    "Crisis bypass engaged: admitting request to service {} while circuit is open",
                    self.service_name
                );
            } else {
                return Err(CircuitBreakerError {
                    service_name: self.service_name.clone(),
                    state: CircuitState::Open,
                });
            }
        }

        inner.metrics.total_requests += 1;
        Ok(CallPermit {
            breaker: self,
            therapeutic: therapeutic_request,
            outcome_recorded: false,
        })
    }

    /// 以断路器保护执行一次异步操作
    pub async fn call<T, F, Fut>(
        &self,
        therapeutic_request: bool,
        crisis_mode: bool,
        operation: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let permit = self.try_acquire(therapeutic_request, crisis_mode)?;
        let result = operation().await;
        permit.complete(&result);
        result
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.metrics.successful_requests += 1;
        inner.metrics.consecutive_successes += 1;
        inner.metrics.consecutive_failures = 0;
        inner.metrics.last_success_at = Some(now);

        if inner.state == CircuitState::HalfOpen
            && inner.metrics.consecutive_successes >= self.settings.success_threshold
        {
            inner.state = CircuitState::Closed;
            inner.metrics.state_changed_at = now;
            inner.metrics.consecutive_successes = 0;
            tracing::info!(
                "Circuit breaker for service {} closed after successful probes",
                self.service_name
            );
        }
    }

    fn record_failure(&self, therapeutic_request: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.metrics.failed_requests += 1;
        inner.metrics.consecutive_failures += 1;
        inner.metrics.consecutive_successes = 0;
        inner.metrics.last_failure_at = Some(now);

        let threshold = if therapeutic_request && self.therapeutic_service {
            self.settings.therapeutic_failure_threshold
        } else {
            self.settings.failure_threshold
        };

        match inner.state {
            CircuitState::Closed => {
                if inner.metrics.consecutive_failures >= threshold {
                    Self::open_locked(&mut inner, now);
                    tracing::warn!(
                        "Circuit breaker opened for service {} after {} consecutive failures",
                        self.service_name,
                        inner.metrics.consecutive_failures
                    );
                }
            }
            CircuitState::HalfOpen => {
                Self::open_locked(&mut inner, now);
                tracing::warn!(
                    "Circuit breaker reopened for service {} after failed probe",
                    self.service_name
                );
            }
            CircuitState::Open => {}
        }
    }

    fn open_locked(inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.metrics.state_changed_at = now;
        // 熔断时刻必须有失败时间戳，恢复窗口才有确定起点
        if inner.metrics.last_failure_at.is_none() {
            inner.metrics.last_failure_at = Some(now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    /// 服务当前是否可参与路由
    pub fn is_healthy(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                inner.metrics.total_requests == 0
                    || inner.metrics.success_rate() >= HALF_OPEN_SUCCESS_RATIO
            }
        }
    }

    /// 手动熔断
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        Self::open_locked(&mut inner, Instant::now());
        tracing::warn!(
            "Circuit breaker for service {} forced open",
            self.service_name
        );
    }

    /// 手动恢复放行，保留累计计数
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.metrics.state_changed_at = Instant::now();
        inner.metrics.consecutive_failures = 0;
        inner.metrics.consecutive_successes = 0;
        tracing::warn!(
            "Circuit breaker for service {} forced closed",
            self.service_name
        );
    }

    /// 重置为初始状态，清空全部指标
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.metrics = CircuitBreakerMetrics::new();
        tracing::info!("Circuit breaker for service {} reset", self.service_name);
    }
}

/// 一次调用的许可凭证
///
/// 必须通过succeed/fail/complete上报结果；未上报就释放时按失败处理，
/// 取消或panic的调用因此不会被漏记。
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    therapeutic: bool,
    outcome_recorded: bool,
}

impl CallPermit<'_> {
    pub fn succeed(mut self) {
        self.outcome_recorded = true;
        self.breaker.record_success();
    }

    pub fn fail(mut self) {
        self.outcome_recorded = true;
        self.breaker.record_failure(self.therapeutic);
    }

    pub fn complete<T, E>(self, result: &Result<T, E>) {
        if result.is_ok() {
            self.succeed();
        } else {
            self.fail();
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.outcome_recorded {
            self.breaker.record_failure(self.therapeutic);
        }
    }
}
