//! supervisord XML-RPC 엔드포인트용 인증 트랜스포트
//!
//! 호스트별로 `ureq::Agent`를 캐시하여 TCP 연결을 재사용합니다. 여러 호스트를
//! 주기적으로 폴링하는 구조에서 매 호출마다 핸드셰이크를 새로 하지 않기 위한
//! 것이며, 캐시가 호스트 단위라서 느리거나 죽은 호스트가 다른 호스트의 연결에
//! 영향을 주지 않습니다.

use super::ProtocolError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use ureq::AgentBuilder;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// 모든 원격 호출에 적용되는 I/O 타임아웃 기본값
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Basic 인증이 붙는 호스트별 연결 캐시
pub struct AuthTransport {
    /// base64("user:pass") — 매 요청의 Authorization 헤더에 그대로 들어감
    auth: String,
    timeout: Duration,
    /// "ip:port" → 재사용 가능한 에이전트 (에이전트가 내부 연결 풀을 소유)
    agents: Mutex<HashMap<String, ureq::Agent>>,
}

impl AuthTransport {
    pub fn new(username: &str, password: &str, timeout: Duration) -> Self {
        Self {
            auth: BASE64.encode(format!("{}:{}", username, password)),
            timeout,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// 캐시된 에이전트를 반환하고, 없으면 타임아웃이 설정된 새 에이전트를 생성
    fn agent_for(&self, host_key: &str) -> ureq::Agent {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents
            .entry(host_key.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating connection agent for {}", host_key);
                AgentBuilder::new().timeout(self.timeout).build()
            })
            .clone()
    }

    /// XML-RPC 요청 본문을 `http://{host_key}/RPC2`로 전송
    ///
    /// HTTP 401은 AuthError, 그 외 비정상 상태/전송 실패는 ConnectionError.
    pub fn send(&self, host_key: &str, body: &str) -> Result<String, ProtocolError> {
        let url = format!("http://{}/RPC2", host_key);
        tracing::debug!("XML-RPC POST {} ({} bytes)", url, body.len());

        let agent = self.agent_for(host_key);
        let result = agent
            .post(&url)
            .set("Authorization", &format!("Basic {}", self.auth))
            .set("Content-Type", "text/xml")
            .send_string(body);

        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::Status(401, _)) => {
                return Err(ProtocolError::AuthError(format!(
                    "{} rejected credentials (HTTP 401)",
                    host_key
                )))
            }
            Err(ureq::Error::Status(code, _)) => {
                return Err(ProtocolError::ConnectionError(format!(
                    "{} returned HTTP {}",
                    host_key, code
                )))
            }
            Err(e) => {
                return Err(ProtocolError::ConnectionError(format!(
                    "Request to {} failed: {}",
                    host_key, e
                )))
            }
        };

        resp.into_string().map_err(|e| {
            ProtocolError::ConnectionError(format!("Failed to read response from {}: {}", host_key, e))
        })
    }

    /// 캐시된 모든 에이전트 해제 — 멱등
    pub fn close_all(&self) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        if !agents.is_empty() {
            tracing::debug!("Releasing {} cached connection agents", agents.len());
        }
        agents.clear();
    }
}

// 인증 토큰이 로그에 찍히지 않도록 Debug는 직접 구현
impl std::fmt::Debug for AuthTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTransport")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for AuthTransport {
    fn drop(&mut self) {
        self.close_all();
    }
}
