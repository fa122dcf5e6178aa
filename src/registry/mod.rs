//! 호스트 레지스트리 — hosts.toml 관리
//!
//! supervisord 호스트의 접속 정보를 보관하는 유일한 소스입니다. 집계 계층은
//! 여기서 읽기만 하고, 추가/수정/삭제는 외부(운영자)에서만 일어납니다.

use crate::protocol::ProtocolError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// 원격 supervisord 호스트 하나의 접속 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// 고유 ID — 추가 시 "{ip}_{port}"로 파생되며 이후 불변.
    /// 파일에는 테이블 키로만 저장되고 로드 시 다시 주입됨.
    #[serde(skip)]
    pub id: String,
    /// 표시용 이름 (비어 있으면 "ip:port")
    #[serde(default)]
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl HostDescriptor {
    /// 필수 필드 검증 — 불충분한 항목은 ConfigError로 즉시 거부
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.ip.is_empty() {
            return Err(ProtocolError::ConfigError("missing field: ip".to_string()));
        }
        if self.port == 0 {
            return Err(ProtocolError::ConfigError(format!(
                "invalid port for {}: 0",
                self.ip
            )));
        }
        if self.username.is_empty() {
            return Err(ProtocolError::ConfigError(format!(
                "missing field: username for {}",
                self.ip
            )));
        }
        if self.password.is_empty() {
            return Err(ProtocolError::ConfigError(format!(
                "missing field: password for {}",
                self.ip
            )));
        }
        Ok(())
    }

    /// "ip:port" — 트랜스포트 캐시 키와 기본 표시 이름으로 사용
    pub fn host_key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// 추가 시 파생되는 고유 ID
    pub fn derive_id(&self) -> String {
        format!("{}_{}", self.ip, self.port)
    }
}

/// hosts.toml의 파일 포맷
#[derive(Debug, Default, Serialize, Deserialize)]
struct HostsFile {
    #[serde(default)]
    hosts: BTreeMap<String, HostDescriptor>,
}

/// 호스트 저장소 — hosts.toml 관리
pub struct HostStore {
    file_path: PathBuf,
    hosts: BTreeMap<String, HostDescriptor>,
}

impl HostStore {
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: PathBuf::from(file_path),
            hosts: BTreeMap::new(),
        }
    }

    /// 파일에서 호스트 로드 — 파일이 없으면 빈 레지스트리로 시작
    pub fn load(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            tracing::info!("Host registry file does not exist, starting empty");
            self.hosts = BTreeMap::new();
            return Ok(());
        }

        let content = fs::read_to_string(&self.file_path)?;
        let file: HostsFile = toml::from_str(&content)?;
        self.hosts = file.hosts;
        // 테이블 키가 곧 ID
        for (id, host) in self.hosts.iter_mut() {
            host.id = id.clone();
            if host.name.is_empty() {
                host.name = format!("{}:{}", host.ip, host.port);
            }
        }
        tracing::info!("Loaded {} hosts from registry", self.hosts.len());
        Ok(())
    }

    /// 파일에 호스트 저장
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = HostsFile {
            hosts: self.hosts.clone(),
        };
        let content = toml::to_string_pretty(&file)?;
        fs::write(&self.file_path, content)?;
        tracing::info!("Saved {} hosts to registry", self.hosts.len());
        Ok(())
    }

    /// 호스트 추가 — 검증 후 ID 파생, 중복 거부
    pub fn add(&mut self, mut host: HostDescriptor) -> Result<String> {
        host.validate()?;
        let id = host.derive_id();
        if self.hosts.contains_key(&id) {
            anyhow::bail!("Host {} already exists", id);
        }
        host.id = id.clone();
        if host.name.is_empty() {
            host.name = host.host_key();
        }
        self.hosts.insert(id.clone(), host);
        self.save()?;
        Ok(id)
    }

    /// 호스트 수정 — ID는 불변
    pub fn update(&mut self, id: &str, mut host: HostDescriptor) -> Result<()> {
        host.validate()?;
        if !self.hosts.contains_key(id) {
            anyhow::bail!("Host not found: {}", id);
        }
        host.id = id.to_string();
        if host.name.is_empty() {
            host.name = host.host_key();
        }
        self.hosts.insert(id.to_string(), host);
        self.save()?;
        Ok(())
    }

    /// 호스트 삭제
    pub fn remove(&mut self, id: &str) -> Result<()> {
        if self.hosts.remove(id).is_none() {
            anyhow::bail!("Host not found: {}", id);
        }
        self.save()?;
        Ok(())
    }

    /// 단일 호스트 조회
    pub fn get(&self, id: &str) -> Option<HostDescriptor> {
        self.hosts.get(id).cloned()
    }

    /// 전체 호스트 조회 (복사본)
    pub fn all(&self) -> BTreeMap<String, HostDescriptor> {
        self.hosts.clone()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
