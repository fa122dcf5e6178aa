//! 호스트 도달 가능성 모니터
//!
//! 주기마다 레지스트리의 모든 호스트에 대해 빠른 getState 프로브를 동시에
//! 실행하고, 결과를 잠금 하나로 보호되는 상태 캐시에 기록합니다. 요청 처리
//! 경로는 이 캐시의 복사본만 읽으므로 죽은 호스트 때문에 블로킹되지 않습니다.
//!
//! 프로브는 재시도 없이 1회, 짧은 타임아웃으로만 수행합니다. 재시도는 사용자
//! 트리거 작업의 몫이고, 폴링은 한 주기의 지연이 유계여야 하기 때문입니다.

use crate::protocol::client::SupervisorClient;
use crate::registry::{HostDescriptor, HostStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// 호스트 하나의 상태 레코드 — 접근자는 항상 복사본을 반환
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostStatus {
    pub reachable: bool,
    pub last_check: Option<SystemTime>,
    /// reachable이 뒤집힌 마지막 시각. 첫 관측도 한 번의 전이로 취급.
    pub last_change: Option<SystemTime>,
}

impl Default for HostStatus {
    fn default() -> Self {
        Self {
            reachable: false,
            last_check: None,
            last_change: None,
        }
    }
}

/// 모니터 설정
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// 폴링 주기
    pub interval: Duration,
    /// 프로브 1회의 I/O 타임아웃 (짧게 유지)
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// 백그라운드 도달 가능성 모니터
pub struct StatusMonitor {
    store: Arc<RwLock<HostStore>>,
    status: Arc<Mutex<HashMap<String, HostStatus>>>,
    config: MonitorConfig,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StatusMonitor {
    pub fn new(store: Arc<RwLock<HostStore>>, config: MonitorConfig) -> Self {
        Self {
            store,
            status: Arc::new(Mutex::new(HashMap::new())),
            config,
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// 모니터링 루프 시작 — 이미 실행 중이면 no-op
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::debug!("Status monitor already running");
            return;
        }

        let monitor = self.clone();
        tracing::info!(
            "Starting status monitor (interval: {:?}, probe timeout: {:?})",
            self.config.interval,
            self.config.probe_timeout
        );
        *task = Some(tokio::spawn(async move {
            loop {
                monitor.poll_all_once().await;
                tokio::select! {
                    _ = monitor.cancel.cancelled() => break,
                    _ = tokio::time::sleep(monitor.config.interval) => {}
                }
            }
            tracing::info!("Status monitor loop exited");
        }));
    }

    /// 루프 종료를 신호하고 완료를 기다림 — 반환 후에는 진행 중인 폴링이 없음
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("Status monitor stopped");
    }

    /// 한 주기: 레지스트리의 모든 호스트를 동시에 프로브하고 전부 기록
    ///
    /// 다음 주기는 이 함수가 끝난 뒤에야 시작되므로 폴링이 겹쳐 쌓이지 않고,
    /// 상태의 최대 신선도 지연은 주기 + 프로브 타임아웃으로 유계입니다.
    pub async fn poll_all_once(&self) {
        let hosts = self.store.read().await.all();
        if hosts.is_empty() {
            return;
        }

        let timeout = self.config.probe_timeout;
        let mut handles = Vec::with_capacity(hosts.len());
        for (id, host) in hosts {
            handles.push(tokio::spawn(async move {
                let reachable = probe_host(&host, timeout).await;
                (id, reachable)
            }));
        }

        for handle in handles {
            if let Ok((id, reachable)) = handle.await {
                self.record(&id, reachable);
            }
        }
    }

    /// 프로브 결과 기록 — 잠금은 맵 갱신 동안만 유지
    fn record(&self, host_id: &str, reachable: bool) {
        let now = SystemTime::now();
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());

        let previous = status.get(host_id).copied();
        let changed = match previous {
            Some(prev) => prev.reachable != reachable,
            None => true, // 첫 관측
        };

        let last_change = if changed {
            Some(now)
        } else {
            previous.and_then(|p| p.last_change)
        };

        status.insert(
            host_id.to_string(),
            HostStatus {
                reachable,
                last_check: Some(now),
                last_change,
            },
        );
        drop(status);

        if changed {
            tracing::info!(
                "Host {} is now {}",
                host_id,
                if reachable { "online" } else { "offline" }
            );
        } else {
            tracing::debug!("Host {} unchanged ({})", host_id, reachable);
        }
    }

    /// 단일 호스트 상태 — 한 번도 폴링되지 않았으면 기본값
    pub fn status_of(&self, host_id: &str) -> HostStatus {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.get(host_id).copied().unwrap_or_default()
    }

    /// 전체 상태의 복사본
    pub fn all_statuses(&self) -> HashMap<String, HostStatus> {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.clone()
    }
}

/// 단일 시도, 짧은 타임아웃의 도달 가능성 프로브
///
/// ureq는 블로킹이므로 전용 블로킹 스레드풀에서 실행합니다.
async fn probe_host(host: &HostDescriptor, timeout: Duration) -> bool {
    let host = host.clone();
    tokio::task::spawn_blocking(move || match SupervisorClient::connect(&host, timeout) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("Probe failed for {}: {}", host.id, e);
            false
        }
    })
    .await
    .unwrap_or(false)
}
