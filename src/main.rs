use taba_chan::{config, monitor, registry, service};

use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("Aggregation daemon starting");

    let cfg = config::GlobalConfig::load()?;

    // 호스트 레지스트리 로드 — 실패해도 빈 레지스트리로 기동
    let mut store = registry::HostStore::new(&cfg.hosts_file());
    if let Err(e) = store.load() {
        tracing::warn!("Failed to load host registry: {}", e);
    }
    let store = Arc::new(RwLock::new(store));

    // 백그라운드 도달 가능성 모니터 시작
    let status_monitor = Arc::new(monitor::StatusMonitor::new(
        store.clone(),
        cfg.monitor_config(),
    ));
    status_monitor.start().await;

    let fleet = service::FleetService::new(store.clone(), status_monitor.clone())
        .with_policy(cfg.connect_timeout(), cfg.retry_policy());

    // 기동 요약
    let hosts = fleet.list_hosts().await;
    tracing::info!("Managing {} supervisord hosts", hosts.len());
    for host in &hosts {
        tracing::info!("  - {} ({}:{}) [{}]", host.name, host.ip, host.port, host.status);
    }

    // Graceful shutdown: Ctrl+C 시 모니터를 멈추고 종료
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping monitor...");
    status_monitor.stop().await;

    tracing::info!("Aggregation daemon shutting down");
    Ok(())
}
