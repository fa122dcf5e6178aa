//! 요청 처리 계층이 사용하는 단일 진입점
//!
//! 네트워크는 항상 SupervisorClient를 통해서만 건드립니다. 목록 조회는
//! 관대하게(실패 시 빈 결과 + 로그), 제어/로그 읽기는 엄격하게(컨텍스트가
//! 붙은 오류 전파) 동작합니다.

use crate::monitor::StatusMonitor;
use crate::protocol::client::SupervisorClient;
use crate::protocol::{LogKind, ProcessSnapshot, ProtocolError, RetryPolicy};
use crate::registry::{HostDescriptor, HostStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

/// 프로세스 제어 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessAction {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "stop")]
    Stop,
    #[serde(rename = "restart")]
    Restart,
}

impl std::fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Restart => write!(f, "restart"),
        }
    }
}

/// 서비스 계층 오류 — 실패한 작업의 전체 컨텍스트를 담음
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Host '{0}' not found")]
    HostNotFound(String),

    #[error("Failed to {action} process '{process}' on host '{host}': {source}")]
    ActionFailed {
        host: String,
        process: String,
        action: ProcessAction,
        source: ProtocolError,
    },

    #[error("Failed to read {kind} log of process '{process}' on host '{host}': {source}")]
    LogReadFailed {
        host: String,
        process: String,
        kind: LogKind,
        source: ProtocolError,
    },
}

/// 목록 응답용 호스트 요약 — password 필드 자체가 없음
#[derive(Debug, Clone, Serialize)]
pub struct HostSummary {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub username: String,
    /// "connected" / "disconnected" — 모니터 캐시에서 읽음, 새로 프로브하지 않음
    pub status: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl HostSummary {
    fn from_descriptor(host: &HostDescriptor, reachable: bool) -> Self {
        Self {
            id: host.id.clone(),
            name: host.name.clone(),
            ip: host.ip.clone(),
            port: host.port,
            username: host.username.clone(),
            status: if reachable { "connected" } else { "disconnected" }.to_string(),
            description: host.description.clone(),
            tags: host.tags.clone(),
        }
    }
}

/// 다중 호스트 supervisord 집계 서비스
pub struct FleetService {
    store: Arc<RwLock<HostStore>>,
    monitor: Arc<StatusMonitor>,
    connect_timeout: Duration,
    retry: RetryPolicy,
}

impl FleetService {
    pub fn new(store: Arc<RwLock<HostStore>>, monitor: Arc<StatusMonitor>) -> Self {
        Self {
            store,
            monitor,
            connect_timeout: crate::protocol::transport::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// 타임아웃/재시도 정책 교체 (테스트에서 지연 0으로 주입)
    pub fn with_policy(mut self, connect_timeout: Duration, retry: RetryPolicy) -> Self {
        self.connect_timeout = connect_timeout;
        self.retry = retry;
        self
    }

    /// 전체 호스트 요약 — 레지스트리 항목당 정확히 하나, 시크릿 제외
    ///
    /// 상태는 모니터 캐시에서만 읽으므로 죽은 호스트가 있어도 빠르게 반환됩니다.
    pub async fn list_hosts(&self) -> Vec<HostSummary> {
        let hosts = self.store.read().await.all();
        let statuses = self.monitor.all_statuses();

        hosts
            .values()
            .map(|host| {
                let reachable = statuses
                    .get(&host.id)
                    .map(|s| s.reachable)
                    .unwrap_or(false);
                HostSummary::from_descriptor(host, reachable)
            })
            .collect()
    }

    /// 단일 호스트 요약
    pub async fn get_host(&self, host_id: &str) -> Option<HostSummary> {
        let host = self.store.read().await.get(host_id)?;
        let reachable = self.monitor.status_of(host_id).reachable;
        Some(HostSummary::from_descriptor(&host, reachable))
    }

    /// 호스트의 프로세스 목록 — 관대한 정책
    ///
    /// 연결/인증 실패는 빈 목록으로 강등하고 error 로그만 남깁니다. 체계적인
    /// 장애 여부는 호출자가 모니터 캐시와 교차 확인해야 합니다.
    /// HostNotFound만은 호출자 실수이므로 그대로 전파합니다.
    pub async fn list_processes(
        &self,
        host_id: &str,
    ) -> Result<Vec<ProcessSnapshot>, ServiceError> {
        let host = self.resolve(host_id).await?;
        let timeout = self.connect_timeout;
        let retry = self.retry;

        let result = tokio::task::spawn_blocking(move || {
            let client = SupervisorClient::connect_with_retry(&host, timeout, &retry)?;
            client.list_processes()
        })
        .await;

        match result {
            Ok(Ok(processes)) => Ok(processes),
            Ok(Err(e)) => {
                if e.is_offline() {
                    tracing::error!("Host {} unreachable while listing processes: {}", host_id, e);
                } else {
                    tracing::error!("Failed to list processes on {}: {}", host_id, e);
                }
                Ok(Vec::new())
            }
            Err(e) => {
                tracing::error!("Process listing task for {} failed: {}", host_id, e);
                Ok(Vec::new())
            }
        }
    }

    /// 프로세스 제어 — 엄격한 정책, 모든 실패가 컨텍스트와 함께 전파됨
    pub async fn control_process(
        &self,
        host_id: &str,
        process: &str,
        action: ProcessAction,
    ) -> Result<(), ServiceError> {
        let host = self.resolve(host_id).await?;
        tracing::info!("{} process '{}' on host {}", action, process, host_id);

        let timeout = self.connect_timeout;
        let retry = self.retry;
        let name = process.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let client = SupervisorClient::connect_with_retry(&host, timeout, &retry)?;
            match action {
                ProcessAction::Start => client.start_process(&name),
                ProcessAction::Stop => client.stop_process(&name),
                ProcessAction::Restart => client.restart_process(&name),
            }
        })
        .await
        .unwrap_or_else(|e| {
            Err(ProtocolError::ConnectionError(format!(
                "Control task failed: {}",
                e
            )))
        });

        result.map_err(|source| {
            let err = ServiceError::ActionFailed {
                host: host_id.to_string(),
                process: process.to_string(),
                action,
                source,
            };
            tracing::error!("{}", err);
            err
        })
    }

    /// 프로세스 로그 읽기 — 제어와 같은 엄격한 정책
    pub async fn read_process_log(
        &self,
        host_id: &str,
        process: &str,
        kind: LogKind,
    ) -> Result<String, ServiceError> {
        let host = self.resolve(host_id).await?;
        let timeout = self.connect_timeout;
        let retry = self.retry;
        let name = process.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let client = SupervisorClient::connect_with_retry(&host, timeout, &retry)?;
            client.read_log(&name, kind)
        })
        .await
        .unwrap_or_else(|e| {
            Err(ProtocolError::ConnectionError(format!(
                "Log read task failed: {}",
                e
            )))
        });

        result.map_err(|source| {
            let err = ServiceError::LogReadFailed {
                host: host_id.to_string(),
                process: process.to_string(),
                kind,
                source,
            };
            tracing::error!("{}", err);
            err
        })
    }

    async fn resolve(&self, host_id: &str) -> Result<HostDescriptor, ServiceError> {
        self.store
            .read()
            .await
            .get(host_id)
            .ok_or_else(|| ServiceError::HostNotFound(host_id.to_string()))
    }
}
