use crate::monitor::MonitorConfig;
use crate::protocol::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// 데몬 전역 설정 — config/global.toml
///
/// 파일이 없거나 파싱에 실패하면 전부 기본값으로 동작합니다.
#[derive(Deserialize, Debug, Clone)]
pub struct GlobalConfig {
    pub hosts_file: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub connect_attempts: Option<u32>,
    pub connect_delay_secs: Option<u64>,
}

impl GlobalConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("TABA_CONFIG_PATH")
            .unwrap_or_else(|_| "config/global.toml".to_string());
        let s = std::fs::read_to_string(path).unwrap_or_default();
        let cfg: Self = toml::from_str(&s).unwrap_or(Self {
            hosts_file: None,
            poll_interval_secs: None,
            probe_timeout_secs: None,
            connect_timeout_secs: None,
            connect_attempts: None,
            connect_delay_secs: None,
        });
        Ok(cfg)
    }

    pub fn hosts_file(&self) -> String {
        self.hosts_file
            .clone()
            .unwrap_or_else(|| "config/hosts.toml".to_string())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let default = MonitorConfig::default();
        MonitorConfig {
            interval: self
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default.interval),
            probe_timeout: self
                .probe_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default.probe_timeout),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::protocol::transport::DEFAULT_TIMEOUT)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            attempts: self.connect_attempts.unwrap_or(default.attempts),
            delay: self
                .connect_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(default.delay),
        }
    }
}
