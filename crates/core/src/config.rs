//! 설정 관리 — proxyneigh.toml 파싱 및 런타임 설정
//!
//! [`ProxyneighConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`PROXYNEIGH_LXD_SOCKET_PATH=/run/lxd.sock` 형식)
//! 3. 설정 파일 (`proxyneigh.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), proxyneigh_core::error::ProxyneighError> {
//! use proxyneigh_core::config::ProxyneighConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ProxyneighConfig::load("proxyneigh.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ProxyneighConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ProxyneighError};

/// proxyneigh 통합 설정
///
/// `proxyneigh.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyneighConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// LXD 연결 설정
    #[serde(default)]
    pub lxd: LxdConfig,
}

impl ProxyneighConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ProxyneighError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ProxyneighError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProxyneighError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ProxyneighError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ProxyneighError> {
        toml::from_str(toml_str).map_err(|e| {
            ProxyneighError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PROXYNEIGH_{SECTION}_{FIELD}`
    /// 예: `PROXYNEIGH_LXD_SOCKET_PATH=/run/lxd/unix.socket`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PROXYNEIGH_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "PROXYNEIGH_GENERAL_LOG_FORMAT",
        );

        // LXD
        override_string(&mut self.lxd.socket_path, "PROXYNEIGH_LXD_SOCKET_PATH");
        override_u64(&mut self.lxd.timeout_secs, "PROXYNEIGH_LXD_TIMEOUT_SECS");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ProxyneighError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        // LXD 소켓 검증
        if self.lxd.socket_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "lxd.socket_path".to_owned(),
                reason: "socket_path must not be empty".to_owned(),
            }
            .into());
        }

        if self.lxd.timeout_secs == 0 || self.lxd.timeout_secs > MAX_LXD_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue {
                field: "lxd.timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_LXD_TIMEOUT_SECS}"),
            }
            .into());
        }

        Ok(())
    }
}

/// LXD 요청 타임아웃 상한 (초)
const MAX_LXD_TIMEOUT_SECS: u64 = 300;

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// LXD 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LxdConfig {
    /// LXD 유닉스 소켓 경로
    pub socket_path: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for LxdConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/lib/lxd/unix.socket".to_owned(),
            timeout_secs: 15,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
