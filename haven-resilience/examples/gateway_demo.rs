use haven_core::config::model::{
    BalanceSettings, CircuitBreakerConfig, GatewayConfig, LoadBalanceStrategy, ServiceInfo,
};
use haven_core::registry::ServiceRegistry;
use haven_resilience::{RequestClass, ResilienceService};
use std::time::Duration;
use tokio::time::sleep;

/// 创建演示配置
fn create_demo_config() -> GatewayConfig {
    GatewayConfig {
        services: vec![
            ServiceInfo {
                id: "chat-api".to_string(),
                name: "Chat API".to_string(),
                weight: 2,
                healthy: true,
                therapeutic_priority: false,
            },
            ServiceInfo {
                id: "therapy-core".to_string(),
                name: "Therapy Core".to_string(),
                weight: 1,
                healthy: true,
                therapeutic_priority: true,
            },
            ServiceInfo {
                id: "crisis-line".to_string(),
                name: "Crisis Line".to_string(),
                weight: 1,
                healthy: true,
                therapeutic_priority: true,
            },
        ],
        balance: BalanceSettings {
            strategy: LoadBalanceStrategy::TherapeuticPriority,
        },
        // 较短的熔断窗口用于演示
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_seconds: 2,
            success_threshold: 2,
            call_timeout_seconds: 10,
            therapeutic_failure_threshold: 2,
            therapeutic_recovery_timeout_seconds: 1,
            crisis_bypass: true,
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🚀 Starting Resilient Gateway Demo");

    let config = create_demo_config();
    let registry = ServiceRegistry::from_config(&config);
    let router = ResilienceService::new(config)?;
    let services = registry.snapshot();

    println!("📋 Configuration loaded with {} services:", services.len());
    for service in &services {
        println!(
            "  - {} (weight: {}, therapeutic: {})",
            service.id, service.weight, service.therapeutic_priority
        );
    }

    // 演示1: 混合流量路由
    println!("\n🔄 Demo 1: Routing mixed traffic...");
    for i in 0..4 {
        let routed = router
            .route_call(&services, RequestClass::standard(), |service| async move {
                sleep(Duration::from_millis(20)).await;
                Ok(format!("standard reply from {}", service.id))
            })
            .await?;
        println!(
            "  #{} standard    -> {} ({:?})",
            i + 1,
            routed.service.id,
            routed.elapsed
        );
    }
    for i in 0..4 {
        let routed = router
            .route_call(&services, RequestClass::therapeutic(), |service| async move {
                sleep(Duration::from_millis(20)).await;
                Ok(format!("therapeutic reply from {}", service.id))
            })
            .await?;
        println!("  #{} therapeutic -> {}", i + 1, routed.service.id);
    }

    // 演示2: 连续失败触发熔断
    println!("\n🔥 Demo 2: Breaking therapy-core with consecutive failures...");
    let therapy_core = services[1].clone();
    let breakers = router.circuit_breakers().clone();
    for _ in 0..2 {
        let result = breakers
            .call_service::<(), _, _>(&therapy_core, true, false, || async {
                anyhow::bail!("simulated outage")
            })
            .await;
        println!("  call failed: {}", result.unwrap_err());
    }
    let breaker = breakers.breaker_for(&therapy_core).await;
    println!("  ❌ therapy-core breaker state: {}", breaker.state());

    let healthy = router.healthy_services(&services).await;
    println!(
        "  📉 healthy services now: {:?}",
        healthy.iter().map(|s| s.id.as_str()).collect::<Vec<_>>()
    );

    // 演示3: 危机流量旁通熔断
    println!("\n🚨 Demo 3: Crisis traffic bypasses an open breaker...");
    let crisis_line = services[2].clone();
    breakers.breaker_for(&crisis_line).await.force_open();
    println!("  both therapeutic services are now broken");

    let routed = router
        .route_call(&services, RequestClass::crisis(), |service| async move {
            sleep(Duration::from_millis(10)).await;
            Ok(format!("crisis session held by {}", service.id))
        })
        .await?;
    println!("  ✅ crisis request served: {}", routed.value);

    // 演示4: 恢复窗口过后半开探测，连续成功恢复放行
    println!("\n⏳ Demo 4: Waiting for the recovery window...");
    sleep(Duration::from_millis(1200)).await;
    for _ in 0..2 {
        breakers
            .call_service(&therapy_core, true, false, || async { Ok(()) })
            .await?;
    }
    println!(
        "  ✅ therapy-core breaker state: {}",
        breakers.breaker_for(&therapy_core).await.state()
    );

    // 最终健康概要
    println!("\n📊 Final health summary:");
    let summary = router.health_summary().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    println!("✨ Demo completed successfully!");
    Ok(())
}
