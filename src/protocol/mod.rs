pub mod xmlrpc;
pub mod transport;
pub mod client;

use std::time::Duration;
use thiserror::Error;
use serde::{Deserialize, Serialize};

/// supervisord 통신 오류 타입
///
/// 호출자는 AuthError/ConnectionError(호스트 오프라인 취급)와
/// RemoteFault(작업 자체의 실패, 사용자에게 보고)를 구분해야 합니다.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// supervisord가 정상 응답했지만 작업이 거부된 경우 (XML-RPC fault)
    /// 예: 이미 실행 중인 프로세스를 start, 존재하지 않는 프로세스 이름
    #[error("Supervisor fault {code}: {message}")]
    RemoteFault { code: i64, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionError(_) => "CONNECTION_ERROR",
            Self::AuthError(_) => "AUTH_ERROR",
            Self::RemoteFault { .. } => "REMOTE_FAULT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// 호스트 오프라인으로 취급할 오류인지 여부
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::AuthError(_))
    }
}

/// supervisord 데몬 자체의 상태 (supervisor.getState 응답)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorState {
    pub code: i64,
    pub name: String,
}

/// 원격 프로세스 하나의 스냅샷 — 매 조회마다 새로 만들어지며 캐시되지 않음
///
/// supervisord 응답에서 빠진 필드는 조회 전체를 실패시키는 대신
/// 보수적 기본값("Unknown", 0, 빈 문자열)으로 채웁니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub name: String,
    pub state: i64,
    pub statename: String,
    pub pid: u32,
    pub description: String,
    #[serde(default)]
    pub stdout_logfile: String,
    #[serde(default)]
    pub stderr_logfile: String,
}

impl ProcessSnapshot {
    /// getAllProcessInfo / getProcessInfo 구조체 하나에서 변환
    pub fn from_value(value: &xmlrpc::Value) -> Self {
        Self {
            name: value.member_str("name").unwrap_or("Unknown").to_string(),
            state: value.member_i64("state").unwrap_or(0),
            statename: value.member_str("statename").unwrap_or("Unknown").to_string(),
            pid: value.member_i64("pid").unwrap_or(0).max(0) as u32,
            description: value.member_str("description").unwrap_or("").to_string(),
            stdout_logfile: value.member_str("stdout_logfile").unwrap_or("").to_string(),
            stderr_logfile: value.member_str("stderr_logfile").unwrap_or("").to_string(),
        }
    }
}

/// 로그 종류 (stdout/stderr)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    #[serde(rename = "stdout")]
    Stdout,
    #[serde(rename = "stderr")]
    Stderr,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// 연결 재시도 정책
///
/// 사용자 트리거 작업(connect_with_retry)에만 적용됩니다.
/// 백그라운드 상태 폴링은 재시도 없이 1회만 시도해야 폴링 지연이 유계로 유지됩니다.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 테스트용: 지연 없는 정책
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
        }
    }
}
