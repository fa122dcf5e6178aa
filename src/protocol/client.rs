//! supervisord 원격 호출 클라이언트
//!
//! AuthTransport 위에 타입이 있는 호출 표면을 얹고, 연결 검증과 유계 재시도,
//! 일관된 오류 변환을 담당합니다. 동기(블로킹) 클라이언트이므로 tokio 컨텍스트
//! 에서는 `spawn_blocking`으로 감싸서 사용합니다.

use super::transport::AuthTransport;
use super::xmlrpc::{self, Value};
use super::{LogKind, ProcessSnapshot, ProtocolError, RetryPolicy, SupervisorState};
use crate::registry::HostDescriptor;
use std::time::Duration;

/// 로그 조회 시 읽는 최대 바이트 수
pub const LOG_READ_BYTES: i64 = 16384;

/// 한 호스트의 supervisord에 대한 연결 검증이 끝난 클라이언트
#[derive(Debug)]
pub struct SupervisorClient {
    host_key: String,
    transport: AuthTransport,
}

impl SupervisorClient {
    /// 연결을 생성하고 getState 프로브로 즉시 검증
    ///
    /// 인증 실패(HTTP 401)는 AuthError, 그 외 모든 실패는 ConnectionError.
    pub fn connect(host: &HostDescriptor, timeout: Duration) -> Result<Self, ProtocolError> {
        host.validate()?;

        let host_key = format!("{}:{}", host.ip, host.port);
        let client = Self {
            transport: AuthTransport::new(&host.username, &host.password, timeout),
            host_key,
        };

        // 자격 증명/도달 가능성을 즉시 확인
        let state = client.get_state()?;
        tracing::debug!(
            "Connected to supervisor at {} (state: {})",
            client.host_key,
            state.name
        );
        Ok(client)
    }

    /// 유계 재시도를 걸어 연결
    ///
    /// AuthError/ConfigError는 재시도해도 달라지지 않으므로 즉시 반환합니다.
    /// 시도 횟수를 소진하면 마지막 오류를 ConnectionError로 감싸 반환합니다.
    pub fn connect_with_retry(
        host: &HostDescriptor,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Self, ProtocolError> {
        let mut last_error = String::new();

        for attempt in 1..=policy.attempts.max(1) {
            match Self::connect(host, timeout) {
                Ok(client) => return Ok(client),
                Err(e @ ProtocolError::AuthError(_)) => return Err(e),
                Err(e @ ProtocolError::ConfigError(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt,
                        policy.attempts,
                        host.id,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < policy.attempts {
                        std::thread::sleep(policy.delay);
                    }
                }
            }
        }

        Err(ProtocolError::ConnectionError(format!(
            "Failed to connect after {} attempts. Last error: {}",
            policy.attempts, last_error
        )))
    }

    /// 공통 호출 경로: 요청 생성 → 전송 → 응답 파싱
    fn call(&self, method: &str, params: &[Value]) -> Result<Value, ProtocolError> {
        let body = xmlrpc::request(method, params);
        let raw = self.transport.send(&self.host_key, &body)?;
        xmlrpc::parse_response(&raw)
    }

    /// supervisor.getState — 도달 가능성 프로브로도 사용
    pub fn get_state(&self) -> Result<SupervisorState, ProtocolError> {
        let value = self.call("supervisor.getState", &[])?;
        Ok(SupervisorState {
            code: value.member_i64("statecode").unwrap_or(0),
            name: value
                .member_str("statename")
                .unwrap_or("Unknown")
                .to_string(),
        })
    }

    /// supervisor.getAllProcessInfo — 프로세스 전체 목록
    pub fn list_processes(&self) -> Result<Vec<ProcessSnapshot>, ProtocolError> {
        let value = self.call("supervisor.getAllProcessInfo", &[])?;
        let items = value.as_array().unwrap_or(&[]);
        Ok(items.iter().map(ProcessSnapshot::from_value).collect())
    }

    /// supervisor.getProcessInfo — 단일 프로세스 조회
    pub fn process_info(&self, name: &str) -> Result<ProcessSnapshot, ProtocolError> {
        let value = self.call(
            "supervisor.getProcessInfo",
            &[Value::Str(name.to_string())],
        )?;
        Ok(ProcessSnapshot::from_value(&value))
    }

    pub fn start_process(&self, name: &str) -> Result<(), ProtocolError> {
        self.call(
            "supervisor.startProcess",
            &[Value::Str(name.to_string())],
        )?;
        tracing::info!("Started process '{}' on {}", name, self.host_key);
        Ok(())
    }

    pub fn stop_process(&self, name: &str) -> Result<(), ProtocolError> {
        self.call("supervisor.stopProcess", &[Value::Str(name.to_string())])?;
        tracing::info!("Stopped process '{}' on {}", name, self.host_key);
        Ok(())
    }

    /// stop 후 start. 이미 멈춰 있는 프로세스를 재시작하는 경우가 흔하므로
    /// stop 단계의 오류는 삼키고(debug 로그만) start 단계의 오류만 전파합니다.
    pub fn restart_process(&self, name: &str) -> Result<(), ProtocolError> {
        if let Err(e) = self.stop_process(name) {
            tracing::debug!(
                "Ignoring stop failure during restart of '{}' on {}: {}",
                name,
                self.host_key,
                e
            );
        }
        self.start_process(name)
    }

    /// 프로세스 로그의 앞 `LOG_READ_BYTES` 바이트를 읽음
    pub fn read_log(&self, name: &str, kind: LogKind) -> Result<String, ProtocolError> {
        let method = match kind {
            LogKind::Stdout => "supervisor.readProcessStdoutLog",
            LogKind::Stderr => "supervisor.readProcessStderrLog",
        };
        let value = self.call(
            method,
            &[
                Value::Str(name.to_string()),
                Value::Int(0),
                Value::Int(LOG_READ_BYTES),
            ],
        )?;
        Ok(value.as_str().unwrap_or("").to_string())
    }
}
